//! Display power notifications from Mutter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use zbus::{Connection, proxy};

use crate::{
    event::{Event, EventBus, Trigger},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// `PowerSaveMode` value for a fully powered display.
const POWER_SAVE_ON: i32 = 0;

#[proxy(
    interface = "org.gnome.Mutter.DisplayConfig",
    default_service = "org.gnome.Mutter.DisplayConfig",
    default_path = "/org/gnome/Mutter/DisplayConfig",
    gen_blocking = false
)]
trait DisplayConfig {
    #[zbus(property)]
    fn power_save_mode(&self) -> zbus::Result<i32>;
}

/// Publishes [`Trigger::DisplayOn`] when the display leaves power saving.
///
/// - **Priority**: 6
/// - **Critical**: No
pub struct DisplayServiceProvider {
    event_bus: EventBus,
    connection: Connection,
}

impl DisplayServiceProvider {
    pub async fn new(event_bus: EventBus) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Failed to connect to the session bus")?;
        Ok(Self {
            event_bus,
            connection,
        })
    }
}

#[async_trait]
impl ServiceProvider for DisplayServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let event_bus = self.event_bus.clone();
        let connection = self.connection.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_display_service(event_bus, connection, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "DisplayEventsService"
    }

    fn priority(&self) -> i32 {
        6
    }
}

/// True when the display powered back on: any power-save mode to 0.
///
/// With no previous value nothing is known to have changed.
pub fn is_display_on_transition(previous: Option<i32>, now: i32) -> bool {
    matches!(previous, Some(prev) if prev != POWER_SAVE_ON) && now == POWER_SAVE_ON
}

async fn run_display_service(
    event_bus: EventBus,
    connection: Connection,
    cancel_token: CancellationToken,
) -> Result<()> {
    let display = DisplayConfigProxy::new(&connection).await?;
    let mut changes = display.receive_power_save_mode_changed().await;
    let mut last_mode = display.power_save_mode().await.ok();
    debug!("Initial display power save mode: {last_mode:?}");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Display events service cancelled");
                break;
            }
            change = changes.next() => {
                let Some(change) = change else {
                    warn!("Mutter PowerSaveMode stream closed");
                    break;
                };
                let mode = match change.get().await {
                    Ok(mode) => mode,
                    Err(e) => {
                        warn!("Unreadable PowerSaveMode change: {e}");
                        continue;
                    }
                };
                if is_display_on_transition(last_mode, mode) {
                    info!("Display powered on");
                    if let Err(e) = event_bus.publish(Event::Trigger(Trigger::DisplayOn)) {
                        warn!("Failed to publish display-on trigger: {e}");
                    }
                }
                last_mode = Some(mode);
            }
        }
    }
    Ok(())
}
