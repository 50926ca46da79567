use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Base trait for providers that build components asynchronously.
///
/// # Example
///
/// ```no_run
/// use kb_backlightd::providers::traits::AsyncProvider;
///
/// struct PathProvider;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<String> for PathProvider {
///     async fn provide(&self) -> anyhow::Result<String> {
///         Ok("/var/lib/kb_backlightd".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// Trait for services that can be started through TaskManager.
///
/// # Example
///
/// ```no_run
/// use kb_backlightd::providers::traits::ServiceProvider;
/// use kb_backlightd::task_manager::TaskManager;
/// use anyhow::Result;
///
/// struct HeartbeatService;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for HeartbeatService {
///     async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
///         task_manager.spawn_task("heartbeat".to_string(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         }).await
///     }
///
///     fn name(&self) -> &'static str { "HeartbeatService" }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Starts the service in TaskManager.
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    /// Returns service name for logging and management.
    fn name(&self) -> &'static str;

    /// Returns startup priority (higher numbers start first).
    fn priority(&self) -> i32 {
        0
    }

    /// Indicates if service is critical for system operation.
    fn is_critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };
    use tokio::time::{Duration, sleep};
    use tokio_util::sync::CancellationToken;

    struct FixedProvider(u8);

    #[async_trait]
    impl AsyncProvider<u8> for FixedProvider {
        async fn provide(&self) -> Result<u8> {
            Ok(self.0)
        }
    }

    struct FlagService {
        name: &'static str,
        priority: i32,
        critical: bool,
        ran: Arc<AtomicBool>,
    }

    impl FlagService {
        fn new(name: &'static str, priority: i32, critical: bool) -> Self {
            Self {
                name,
                priority,
                critical,
                ran: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl ServiceProvider for FlagService {
        async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
            let ran = self.ran.clone();
            task_manager
                .spawn_task(self.name.to_string(), move |_token: CancellationToken| async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .await
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn is_critical(&self) -> bool {
            self.critical
        }
    }

    struct BrokenService;

    #[async_trait]
    impl ServiceProvider for BrokenService {
        async fn start(&self, _task_manager: &mut TaskManager) -> Result<()> {
            Err(anyhow!("no session bus"))
        }

        fn name(&self) -> &'static str {
            "BrokenService"
        }
    }

    #[tokio::test]
    async fn async_provider_yields_value() {
        let provider: Box<dyn AsyncProvider<u8>> = Box::new(FixedProvider(2));
        assert_eq!(provider.provide().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn service_start_spawns_its_task() {
        let mut task_manager = TaskManager::new();
        let service = FlagService::new("flag", 5, false);

        service.start(&mut task_manager).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        assert!(service.ran.load(Ordering::SeqCst));
        assert!(task_manager.is_running("flag"));
    }

    #[tokio::test]
    async fn defaults_are_low_priority_and_optional() {
        assert_eq!(BrokenService.priority(), 0);
        assert!(!BrokenService.is_critical());
    }

    #[tokio::test]
    async fn failing_start_reports_error() {
        let mut task_manager = TaskManager::new();
        let err = BrokenService.start(&mut task_manager).await.unwrap_err();
        assert!(err.to_string().contains("no session bus"));
        assert_eq!(task_manager.active_count(), 0);
    }

    #[test]
    fn services_sort_by_priority() {
        let mut services = vec![
            FlagService::new("input", 3, false),
            FlagService::new("poll", 10, true),
            FlagService::new("session", 7, false),
        ];
        services.sort_by_key(|s| std::cmp::Reverse(s.priority()));

        let names: Vec<_> = services.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["poll", "session", "input"]);
    }
}
