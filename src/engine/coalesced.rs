use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Slot holding at most one cancellable background task.
///
/// Tasks receive a [`CancellationToken`] and are expected to check it at
/// every suspension point. Swapping happens under one lock, so two callers
/// can never both leave a task running in the slot.
#[derive(Default)]
pub struct CoalescedTask {
    slot: Mutex<Option<Running>>,
}

impl CoalescedTask {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels whatever is in the slot and starts `task` in its place.
    pub fn replace<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            previous.token.cancel();
        }
        *slot = Some(Self::start(task));
    }

    /// Starts `task` unless a previous one is still running.
    ///
    /// Returns `false` when the running task was kept.
    pub fn spawn_if_idle<F, Fut>(&self, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }
        *slot = Some(Self::start(task));
        true
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.lock().take() {
            previous.token.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished() && !r.token.is_cancelled())
    }

    fn start<F, Fut>(task: F) -> Running
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));
        Running { token, handle }
    }
}

impl Drop for CoalescedTask {
    fn drop(&mut self) {
        if let Some(running) = self.lock().take() {
            running.token.cancel();
        }
    }
}
