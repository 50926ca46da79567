//! D-Bus control surface on the session bus.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    interface::{BUS_NAME, BacklightInterface, OBJECT_PATH},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Exports [`BacklightInterface`] as `io.github.kb_backlightd`.
///
/// # Priority and Criticality
///
/// - **Priority**: 8
/// - **Critical**: Yes, once the bus connection exists. Without a session
///   bus the coordinator skips the service at creation time.
///
/// A `Stop` call publishes [`Event::SystemShutdown`].
pub struct DBusServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
}

impl DBusServiceProvider {
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
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let connection = self.connection.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_dbus_service(state, event_bus, connection, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "DBusService"
    }

    fn priority(&self) -> i32 {
        8
    }

    fn is_critical(&self) -> bool {
        true
    }
}

async fn run_dbus_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
    cancel_token: CancellationToken,
) -> Result<()> {
    let interface = BacklightInterface::new(
        state,
        event_bus.clone(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    let stop_requested = interface.stop.listen();

    connection
        .object_server()
        .at(OBJECT_PATH, interface)
        .await
        .context("Failed to export the D-Bus object")?;
    connection
        .request_name(BUS_NAME)
        .await
        .with_context(|| format!("Failed to acquire bus name {BUS_NAME}"))?;
    info!("Serving {BUS_NAME} at {OBJECT_PATH}");

    tokio::select! {
        () = cancel_token.cancelled() => {
            info!("D-Bus service cancelled");
        }
        () = stop_requested => {
            info!("Stop requested over D-Bus");
            if let Err(e) = event_bus.publish(Event::SystemShutdown) {
                warn!("Failed to publish shutdown request: {e}");
            }
        }
    }

    if let Err(e) = connection.release_name(BUS_NAME).await {
        warn!("Failed to release {BUS_NAME}: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{level::BacklightLevel, schedule::ScheduleConfig, test_utils::test_app};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn provider_metadata_when_bus_is_available() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());

        // CI machines usually have no session bus.
        match DBusServiceProvider::new(app.state.clone(), EventBus::new()).await {
            Ok(provider) => {
                assert_eq!(provider.name(), "DBusService");
                assert_eq!(provider.priority(), 8);
                assert!(provider.is_critical());
            }
            Err(e) => println!("Session bus unavailable: {e:#}"),
        }
    }
}
