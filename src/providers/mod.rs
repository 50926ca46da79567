//! Service providers started by the coordinator.
//!
//! Each provider owns one long-lived task: a timer, a bus watcher or a
//! device reader. Watchers only publish [`Event`](crate::event::Event)s; the
//! coordinator routes them to the engine.

pub mod app_state;
pub mod auto_schedule;
pub mod dbus;
pub mod display;
pub mod file_watch;
pub mod input;
pub mod night_light;
pub mod polling;
pub mod session;
pub mod traits;

pub use app_state::AppStateProvider;
pub use auto_schedule::AutoScheduleServiceProvider;
pub use dbus::DBusServiceProvider;
pub use display::DisplayServiceProvider;
pub use file_watch::{FileWatchServiceProvider, WatchTarget};
pub use input::InputServiceProvider;
pub use night_light::NightLightServiceProvider;
pub use polling::PollingServiceProvider;
pub use session::SessionServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::{
        config::InputCfg,
        event::{Event, EventBus},
        level::BacklightLevel,
        schedule::ScheduleConfig,
        test_utils::test_app,
    };
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn local_providers_sort_by_priority() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());
        let event_bus = EventBus::new();

        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(InputServiceProvider::new(event_bus.clone(), InputCfg::default())),
            Box::new(AutoScheduleServiceProvider::new(app.state.clone())),
            Box::new(FileWatchServiceProvider::new(
                event_bus.clone(),
                vec![WatchTarget::new(
                    app.state.schedule_store.path(),
                    Event::ScheduleChanged,
                )],
            )),
            Box::new(PollingServiceProvider::new(app.state.clone())),
        ];
        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));

        let names: Vec<_> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "PollingService",
                "AutoScheduleService",
                "FileWatchService",
                "InputService"
            ]
        );
    }

    #[tokio::test]
    async fn only_the_poller_is_critical_among_local_providers() {
        let app = test_app(BacklightLevel::High, ScheduleConfig::default());
        let event_bus = EventBus::new();

        assert!(PollingServiceProvider::new(app.state.clone()).is_critical());
        assert!(!AutoScheduleServiceProvider::new(app.state.clone()).is_critical());
        assert!(!InputServiceProvider::new(event_bus.clone(), InputCfg::default()).is_critical());
        assert!(!FileWatchServiceProvider::new(event_bus, Vec::new()).is_critical());
    }
}
