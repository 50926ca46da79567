//! System coordinator for service lifecycle and event routing.

use std::{ops::ControlFlow, sync::Arc};

use anyhow::{Context, Result, anyhow, bail};
use log::{info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::error::RecvError,
};

use crate::{
    app_context::AppState,
    config::{Config, ConfigManager, NightFlagCfg},
    event::{Event, EventBus, Trigger},
    providers::{
        AppStateProvider, AsyncProvider, AutoScheduleServiceProvider, DBusServiceProvider,
        DisplayServiceProvider, FileWatchServiceProvider, InputServiceProvider,
        NightLightServiceProvider, PollingServiceProvider, ServiceProvider,
        SessionServiceProvider, WatchTarget,
    },
    task_manager::TaskManager,
};

/// Owns the application state, the services and the event loop.
///
/// Watchers publish on the [`EventBus`]; the main loop is the only place
/// that hands triggers to the engine, so trigger handling is serialized.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Opens the device, syncs with the hardware and registers services.
    ///
    /// Fails only when the application state cannot be built (config or no
    /// supported driver).
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager)
            .provide()
            .await
            .context("Failed to initialize application state")?;

        if let Err(e) = state.engine.initial_sync().await {
            warn!("Initial hardware read failed, learning waits for the first poll: {e}");
        }

        let config = state.config_manager().clone_config().await;
        self.service_providers = build_providers(&state, &self.event_bus, &config).await;
        self.shared_state = Some(state);

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
        Ok(())
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {e}",
                        provider.name()
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Applies the startup trigger, then routes events until a shutdown
    /// request (Ctrl+C, SIGTERM or D-Bus `Stop`).
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        self.state()?
            .engine
            .handle_trigger(Trigger::ProcessStart)
            .await;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for Ctrl+C")?;
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break;
                }
                event = event_rx.recv() => {
                    if self.handle_event(event).await?.is_break() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Main event loop terminated");
        Ok(())
    }

    async fn handle_event(
        &mut self,
        event_result: Result<Event, RecvError>,
    ) -> Result<ControlFlow<()>> {
        match event_result {
            Ok(Event::Trigger(trigger)) => {
                info!("Trigger: {trigger}");
                self.state()?.engine.handle_trigger(trigger).await;
            }
            Ok(Event::ScheduleChanged) => {
                let state = self.state()?;
                let schedule = state.schedule_store.load();
                if state.engine.reconfigure(schedule).await {
                    info!("Applied schedule from {}", state.schedule_store.path().display());
                }
            }
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                return Ok(ControlFlow::Break(()));
            }
            Err(RecvError::Closed) => {
                bail!("Event bus channel closed unexpectedly");
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn state(&self) -> Result<&Arc<AppState>> {
        self.shared_state
            .as_ref()
            .ok_or_else(|| anyhow!("System not properly initialized"))
    }

    /// Stops engine tasks, then services, then releases the device.
    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Some(state) = &self.shared_state {
            state.engine.shutdown();
        }
        if let Err(e) = self.task_manager.shutdown_all().await {
            warn!("Error during task shutdown: {e:#}");
        }
        self.service_providers.clear();
        self.shared_state = None;

        info!("Shutdown complete");
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}

/// Builds the service set the configuration asks for, sorted by priority.
///
/// Bus-backed services that cannot connect are skipped with a warning.
async fn build_providers(
    state: &Arc<AppState>,
    event_bus: &EventBus,
    config: &Config,
) -> Vec<Box<dyn ServiceProvider>> {
    let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
        Box::new(PollingServiceProvider::new(state.clone())),
        Box::new(AutoScheduleServiceProvider::new(state.clone())),
    ];

    let mut targets = vec![WatchTarget::new(
        state.schedule_store.path(),
        Event::ScheduleChanged,
    )];
    if let NightFlagCfg::File { path, .. } = &config.night_flag {
        targets.push(WatchTarget::new(
            path,
            Event::Trigger(Trigger::NightFlagChanged),
        ));
    }
    providers.push(Box::new(FileWatchServiceProvider::new(
        event_bus.clone(),
        targets,
    )));

    if config.input.enabled {
        providers.push(Box::new(InputServiceProvider::new(
            event_bus.clone(),
            config.input.clone(),
        )));
    }

    if config.session_events {
        match SessionServiceProvider::new(event_bus.clone()).await {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => warn!("Skipping session events: {e:#}"),
        }
    }

    if config.display_events {
        match DisplayServiceProvider::new(event_bus.clone()).await {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => warn!("Skipping display events: {e:#}"),
        }
    }

    if config.night_flag == NightFlagCfg::Gnome {
        match NightLightServiceProvider::new(state.clone(), event_bus.clone()).await {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => warn!("Skipping GNOME night light, flag stays unknown: {e:#}"),
        }
    }

    if config.enable_dbus {
        match DBusServiceProvider::new(state.clone(), event_bus.clone()).await {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => warn!("Failed to create D-Bus service provider, skipping: {e:#}"),
        }
    }

    providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        level::BacklightLevel,
        schedule::ScheduleConfig,
        test_utils::{TestApp, test_app},
    };
    use pretty_assertions::assert_eq;

    fn local_only() -> Config {
        Config {
            session_events: false,
            display_events: false,
            enable_dbus: false,
            input: crate::config::InputCfg {
                enabled: false,
                ..Default::default()
            },
            ..Config::default()
        }
    }

    fn coordinator_for(app: &TestApp) -> SystemCoordinator {
        let mut coordinator = SystemCoordinator::new();
        coordinator.shared_state = Some(app.state.clone());
        coordinator
    }

    #[tokio::test]
    async fn local_configuration_registers_core_services() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());

        let providers = build_providers(&app.state, &EventBus::new(), &local_only()).await;
        let names: Vec<_> = providers.iter().map(|p| p.name()).collect();

        assert_eq!(
            names,
            vec!["PollingService", "AutoScheduleService", "FileWatchService"]
        );
    }

    #[tokio::test]
    async fn schedule_change_reconfigures_engine() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());
        let mut coordinator = coordinator_for(&app);

        let schedule = ScheduleConfig {
            auto_enabled: true,
            ..ScheduleConfig::default()
        };
        app.state.schedule_store.save(&schedule).unwrap();

        let flow = coordinator
            .handle_event(Ok(Event::ScheduleChanged))
            .await
            .unwrap();

        assert!(flow.is_continue());
        assert!(app.state.engine.schedule().await.auto_enabled);
        assert_eq!(app.keyboard.level(), Some(BacklightLevel::Low));
    }

    #[tokio::test]
    async fn shutdown_event_breaks_the_loop() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());
        let mut coordinator = coordinator_for(&app);

        let flow = coordinator
            .handle_event(Ok(Event::SystemShutdown))
            .await
            .unwrap();
        assert!(flow.is_break());
    }

    #[tokio::test]
    async fn lagging_is_tolerated_but_closing_is_not() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());
        let mut coordinator = coordinator_for(&app);

        assert!(
            coordinator
                .handle_event(Err(RecvError::Lagged(3)))
                .await
                .unwrap()
                .is_continue()
        );
        assert!(coordinator.handle_event(Err(RecvError::Closed)).await.is_err());
    }

    #[tokio::test]
    async fn events_before_initialize_are_errors() {
        let mut coordinator = SystemCoordinator::new();
        let result = coordinator
            .handle_event(Ok(Event::Trigger(Trigger::Resume)))
            .await;
        assert!(result.is_err());
    }
}
