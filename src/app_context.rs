//! Application state and global context management.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::{
    config::{Config, ConfigManager, NightFlagCfg},
    drivers::{BacklightController, IoctlOpener},
    engine::{Engine, EngineDeps},
    night_flag::{BlobNightFlag, NightFlagReader, NoNightFlag, SharedNightFlag},
    preference::FilePreferenceStore,
    schedule::{LocalClock, ScheduleStore},
};

/// Shared application state.
///
/// Holds the one engine instance (and through it the only handle to the
/// backlight device) plus the stores and caches services need.
pub struct AppState {
    pub config_manager: Arc<ConfigManager>,
    pub engine: Engine,
    pub schedule_store: ScheduleStore,
    /// Night-light state pushed by the GNOME watcher. Unused for other
    /// night flag sources.
    pub night_flag: SharedNightFlag,
}

impl AppState {
    /// Opens the backlight device and builds the engine from configuration.
    ///
    /// Fails with [`BacklightError::NoSupportedDriver`](crate::error::BacklightError)
    /// in the error chain when no driver profile opens.
    pub async fn new(config_manager: ConfigManager) -> Result<Self> {
        let config = config_manager.clone_config().await;

        let controller = BacklightController::open(&config.drivers, &IoctlOpener)
            .context("Failed to open keyboard backlight")?
            .with_settle_delay(config.settle_delay());

        let night_flag = SharedNightFlag::new();
        let reader = night_flag_reader(&config, &night_flag);
        let schedule_store = ScheduleStore::new(&config.schedule_path);
        let schedule = schedule_store.load();
        info!(
            "Schedule from {}: auto {}, mode {:?}",
            schedule_store.path().display(),
            schedule.auto_enabled,
            schedule.mode
        );

        let engine = Engine::new(
            controller,
            EngineDeps {
                store: Arc::new(FilePreferenceStore::new(&config.preference_path)),
                night_flag: reader,
                clock: Arc::new(LocalClock),
            },
            schedule,
            config.engine_timings(),
        );

        Ok(Self::from_parts(
            config_manager,
            engine,
            schedule_store,
            night_flag,
        ))
    }

    pub fn from_parts(
        config_manager: ConfigManager,
        engine: Engine,
        schedule_store: ScheduleStore,
        night_flag: SharedNightFlag,
    ) -> Self {
        Self {
            config_manager: Arc::new(config_manager),
            engine,
            schedule_store,
            night_flag,
        }
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }
}

fn night_flag_reader(config: &Config, shared: &SharedNightFlag) -> Arc<dyn NightFlagReader> {
    match &config.night_flag {
        NightFlagCfg::None => Arc::new(NoNightFlag),
        NightFlagCfg::Gnome => Arc::new(shared.clone()),
        NightFlagCfg::File { path, layout } => {
            Arc::new(BlobNightFlag::new(path, layout.layouts()))
        }
    }
}
