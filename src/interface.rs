use std::sync::Arc;

use event_listener::Event as StopEvent;
use log::{info, warn};
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::{
    app_context::AppState,
    error::BacklightError,
    event::{Event, EventBus, Trigger},
    level::BacklightLevel,
};

pub const OBJECT_PATH: &str = "/io/github/kb_backlightd";
pub const BUS_NAME: &str = "io.github.kb_backlightd";

pub struct BacklightInterface {
    state: Arc<AppState>,
    event_bus: EventBus,
    version: String,

    pub stop: StopEvent,
}

impl BacklightInterface {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, version: String) -> Self {
        Self {
            state,
            event_bus,
            version,
            stop: StopEvent::new(),
        }
    }
}

fn to_fdo(err: BacklightError) -> fdo::Error {
    match err {
        BacklightError::InvalidLevel(_) => fdo::Error::InvalidArgs(err.to_string()),
        other => fdo::Error::Failed(other.to_string()),
    }
}

#[interface(name = "io.github.kb_backlightd1")]
impl BacklightInterface {
    #[zbus(signal)]
    async fn stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    async fn stop(&self, #[zbus(signal_emitter)] emitter: SignalEmitter<'_>) -> fdo::Result<()> {
        emitter.stopped().await?;
        self.stop.notify(1);

        Ok(())
    }

    async fn get_level(&self) -> fdo::Result<u8> {
        self.state
            .engine
            .current_level()
            .await
            .map(u8::from)
            .map_err(to_fdo)
    }

    async fn set_level(&self, level: u8) -> fdo::Result<()> {
        let level = BacklightLevel::try_from(level).map_err(to_fdo)?;
        info!("D-Bus request: set level {level}");
        self.state.engine.select_level(level).await.map_err(to_fdo)
    }

    /// Returns whether the hardware had to be changed.
    async fn reset_to_preferred(&self) -> fdo::Result<bool> {
        self.state
            .engine
            .reset_to_preferred()
            .await
            .map_err(to_fdo)
    }

    /// Entry point for external event sources. Unknown names are ignored
    /// and reported as `false`.
    async fn notify_trigger(&self, name: &str) -> bool {
        let Some(trigger) = Trigger::parse(name) else {
            warn!("Ignoring unknown trigger '{name}'");
            return false;
        };
        if let Err(e) = self.event_bus.publish(Event::Trigger(trigger)) {
            warn!("Failed to publish {trigger}: {e}");
            return false;
        }
        true
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }

    #[zbus(property)]
    async fn preferred_level(&self) -> u8 {
        self.state.engine.preferred_level().await.into()
    }

    #[zbus(property)]
    async fn auto_enabled(&self) -> bool {
        self.state.engine.schedule().await.auto_enabled
    }

    #[zbus(property)]
    async fn set_auto_enabled(&mut self, enabled: bool) -> fdo::Result<()> {
        let mut schedule = self.state.engine.schedule().await;
        schedule.auto_enabled = enabled;
        self.state
            .schedule_store
            .save(&schedule)
            .map_err(|e| fdo::Error::Failed(format!("{e:#}")))?;
        self.state.engine.reconfigure(schedule).await;
        Ok(())
    }
}
