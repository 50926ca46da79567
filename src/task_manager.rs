//! Task management for async service lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the long-lived service tasks.
///
/// Every task gets a child of `global_token`; shutting down cancels the
/// parent and waits for each task in turn.
pub struct TaskManager {
    tasks: HashMap<String, JoinHandle<Result<()>>>,
    pub global_token: CancellationToken,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
        }
    }

    /// Spawns and registers a task with the given name.
    pub async fn spawn_task<F, Fut>(&mut self, name: String, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let task_token = self.global_token.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            info!("Starting task: {task_name}");
            match task_fn(task_token).await {
                Ok(()) => {
                    info!("Task '{task_name}' completed");
                    Ok(())
                }
                Err(e) => {
                    error!("Task '{task_name}' failed: {e:#}");
                    Err(e)
                }
            }
        });

        if self.tasks.insert(name.clone(), handle).is_some() {
            warn!("Task '{name}' replaced an existing task with the same name");
        }
        Ok(())
    }

    /// Cancels all registered tasks and waits for them.
    ///
    /// Returns the first error encountered, if any.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());

        self.global_token.cancel();

        let mut first_error = None;
        for (name, handle) in self.tasks.drain() {
            let error = match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(e))) => e.context(format!("Task '{name}' failed")),
                Ok(Err(e)) => anyhow!("Task '{name}' panicked: {e}"),
                Err(_) => anyhow!("Task '{name}' did not stop within {SHUTDOWN_TIMEOUT:?}"),
            };
            warn!("{error:#}");
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(error) => Err(error).context("One or more tasks failed during shutdown"),
            None => {
                info!("All tasks stopped");
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
