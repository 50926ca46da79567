//! Periodic auto-schedule re-evaluation.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tokio_util::sync::CancellationToken;

use crate::{app_context::AppState, providers::traits::ServiceProvider, task_manager::TaskManager};

/// Re-evaluates the day/night schedule on a timer so boundary crossings take
/// effect without any other trigger.
///
/// - **Priority**: 9
/// - **Critical**: No
pub struct AutoScheduleServiceProvider {
    state: Arc<AppState>,
}

impl AutoScheduleServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for AutoScheduleServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let period = state.config().await.auto_interval();

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                run_auto_schedule_service(state, period, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "AutoScheduleService"
    }

    fn priority(&self) -> i32 {
        9
    }
}

async fn run_auto_schedule_service(
    state: Arc<AppState>,
    period: Duration,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = IntervalStream::new(ticker);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Auto schedule service cancelled");
                break;
            }
            Some(_) = ticks.next() => {
                if state.engine.auto_reevaluate().await {
                    debug!("Auto schedule changed the preferred level");
                }
            }
        }
    }
    Ok(())
}
