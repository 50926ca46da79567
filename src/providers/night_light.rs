//! GNOME Night Light as the night flag source.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use zbus::{Connection, proxy};

use crate::{
    app_context::AppState,
    event::{Event, EventBus, Trigger},
    night_flag::SharedNightFlag,
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

#[proxy(
    interface = "org.gnome.SettingsDaemon.Color",
    default_service = "org.gnome.SettingsDaemon.Color",
    default_path = "/org/gnome/SettingsDaemon/Color",
    gen_blocking = false
)]
trait NightLight {
    #[zbus(property)]
    fn night_light_active(&self) -> zbus::Result<bool>;
}

/// Mirrors `NightLightActive` into the shared night flag.
///
/// Registered only when `night_flag.kind` is `gnome`.
///
/// - **Priority**: 5
/// - **Critical**: No
pub struct NightLightServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
}

impl NightLightServiceProvider {
    pub async fn new(state: Arc<AppState>, event_bus: EventBus) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Failed to connect to the session bus")?;
        Ok(Self {
            state,
            event_bus,
            connection,
        })
    }
}

#[async_trait]
impl ServiceProvider for NightLightServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let flag = self.state.night_flag.clone();
        let event_bus = self.event_bus.clone();
        let connection = self.connection.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_night_light_service(flag, event_bus, connection, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "NightLightService"
    }

    fn priority(&self) -> i32 {
        5
    }
}

/// Stores a new flag value, announcing it only when it differs.
fn record(flag: &SharedNightFlag, event_bus: &EventBus, value: Option<bool>) {
    if !flag.set(value) {
        return;
    }
    info!("Night light flag is now {value:?}");
    if let Err(e) = event_bus.publish(Event::Trigger(Trigger::NightFlagChanged)) {
        warn!("Failed to publish night flag change: {e}");
    }
}

async fn run_night_light_service(
    flag: SharedNightFlag,
    event_bus: EventBus,
    connection: Connection,
    cancel_token: CancellationToken,
) -> Result<()> {
    let proxy = NightLightProxy::new(&connection).await?;
    let mut changes = proxy.receive_night_light_active_changed().await;

    match proxy.night_light_active().await {
        Ok(active) => record(&flag, &event_bus, Some(active)),
        Err(e) => warn!("Night light state unavailable: {e}"),
    }

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Night light service cancelled");
                break;
            }
            change = changes.next() => {
                let Some(change) = change else {
                    warn!("NightLightActive stream closed");
                    flag.set(None);
                    break;
                };
                match change.get().await {
                    Ok(active) => record(&flag, &event_bus, Some(active)),
                    Err(e) => {
                        warn!("Unreadable NightLightActive change: {e}");
                        record(&flag, &event_bus, None);
                    }
                }
            }
        }
    }
    Ok(())
}
