//! Slow drift poll of the hardware level.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState, error::BacklightError, providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Periodically reads the hardware so drift (a hotkey press missed by the
/// burst poll, firmware resets) turns into a learn candidate.
///
/// # Priority and Criticality
///
/// - **Priority**: 10 (highest)
/// - **Critical**: Yes
pub struct PollingServiceProvider {
    state: Arc<AppState>,
}

impl PollingServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for PollingServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let period = state.config().await.poll_interval();

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                run_polling_service(state, period, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "PollingService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}

async fn run_polling_service(
    state: Arc<AppState>,
    period: Duration,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(ticker);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Polling service cancelled");
                break;
            }
            Some(_) = ticks.next() => {
                match state.engine.poll().await {
                    Ok(changed) => {
                        if changed {
                            debug!("Slow poll observed a level change");
                        }
                    }
                    Err(e @ BacklightError::UnmappedValue { .. }) => {
                        warn!("Slow poll: {e} (profile may not match this firmware)");
                    }
                    Err(e) if e.is_transient() => warn!("Slow poll failed, retrying next tick: {e}"),
                    Err(e) => error!("Slow poll failed: {e}"),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{level::BacklightLevel, schedule::ScheduleConfig, test_utils::test_app};
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    #[tokio::test]
    async fn provider_metadata() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());
        let provider = PollingServiceProvider::new(app.state.clone());

        assert_eq!(provider.name(), "PollingService");
        assert_eq!(provider.priority(), 10);
        assert!(provider.is_critical());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_poll_learns_drift() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());
        app.state.engine.initial_sync().await.unwrap();

        let mut task_manager = TaskManager::new();
        PollingServiceProvider::new(app.state.clone())
            .start(&mut task_manager)
            .await
            .unwrap();

        app.keyboard.set_level(BacklightLevel::Low);
        sleep(Duration::from_millis(4_500)).await;

        assert_eq!(app.store.write_count(), 1);
        assert_eq!(app.state.engine.preferred_level().await, BacklightLevel::Low);
        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_failures_keep_the_service_alive() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());
        app.keyboard.fail_reads(true);

        let mut task_manager = TaskManager::new();
        PollingServiceProvider::new(app.state.clone())
            .start(&mut task_manager)
            .await
            .unwrap();
        sleep(Duration::from_secs(10)).await;

        assert!(task_manager.is_running("PollingService"));
        task_manager.shutdown_all().await.unwrap();
    }
}
