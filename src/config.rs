//! Configuration management for the kb_backlightd daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! that lists the candidate driver profiles and tunes the engine.

use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    drivers::DriverProfile, engine::EngineTimings, error::BacklightError,
    night_flag::BlobLayout,
};

/// Environment variable overriding the configuration location.
pub const CONFIG_ENV: &str = "KB_BACKLIGHTD_CONFIG";

/// Main configuration structure.
///
/// # Example
///
/// ```yaml
/// version: 1
/// poll_interval_ms: 4000
/// quiesce_ms: 800
/// reapply_offsets_ms: [0, 140, 520]
/// preference_path: /var/lib/kb_backlightd/preferred_level.json
/// schedule_path: /etc/kb_backlightd/schedule.yml
///
/// night_flag:
///   kind: gnome
///
/// input:
///   enabled: true
///   coalesce_ms: 250
///
/// drivers:
///   - principal: /dev/kbd_backlight0
///     description: "Vendor A keyboard light"
///     get_code: 0x222C
///     set_code: 0x2230
///     get_off: 0
///     get_low: 1
///     get_high: 2
///     set_off: 0x100
///     set_low: 0x101
///     set_high: 0x102
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Slow drift poll.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Samples taken by the post-input burst poll.
    #[serde(default = "defaults::burst_samples")]
    pub burst_samples: u32,

    #[serde(default = "defaults::burst_interval_ms")]
    pub burst_interval_ms: u64,

    /// No learning for this long after a wake-class trigger.
    #[serde(default = "defaults::quiesce_ms")]
    pub quiesce_ms: u64,

    /// An observed Off is learned only this soon after user input.
    #[serde(default = "defaults::off_learn_window_ms")]
    pub off_learn_window_ms: u64,

    #[serde(default = "defaults::reapply_offsets_ms")]
    pub reapply_offsets_ms: Vec<u64>,

    /// Delay between a write and its verifying read-back.
    #[serde(default = "defaults::settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Auto schedule re-evaluation period.
    #[serde(default = "defaults::auto_interval_seconds")]
    pub auto_interval_seconds: u64,

    #[serde(default = "defaults::preference_path")]
    pub preference_path: PathBuf,

    #[serde(default = "defaults::schedule_path")]
    pub schedule_path: PathBuf,

    #[serde(default)]
    pub night_flag: NightFlagCfg,

    #[serde(default)]
    pub input: InputCfg,

    /// Listen to logind for resume, suspend, unlock and console switches.
    #[serde(default = "defaults::enabled")]
    pub session_events: bool,

    /// Listen to the compositor for display power-on.
    #[serde(default = "defaults::enabled")]
    pub display_events: bool,

    /// Export the control interface on the session bus.
    #[serde(default = "defaults::enabled")]
    pub enable_dbus: bool,

    /// Candidate control surfaces, probed in order.
    #[serde(default)]
    pub drivers: Vec<DriverProfile>,
}

/// Where the blue-light-reduction flag comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NightFlagCfg {
    /// No flag; flag-based schedules always see day.
    #[default]
    None,
    /// GNOME Night Light over the session bus.
    Gnome,
    /// Exported state blob, decoded with versioned layouts.
    File {
        path: PathBuf,
        #[serde(default)]
        layout: LayoutChoice,
    },
}

/// Blob layout selection for [`NightFlagCfg::File`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutChoice {
    /// Try every known layout, oldest first.
    #[default]
    Auto,
    Legacy,
    Modern,
}

impl LayoutChoice {
    pub fn layouts(self) -> Vec<BlobLayout> {
        match self {
            Self::Auto => vec![BlobLayout::Legacy, BlobLayout::Modern],
            Self::Legacy => vec![BlobLayout::Legacy],
            Self::Modern => vec![BlobLayout::Modern],
        }
    }
}

/// Raw input activity detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCfg {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Pulses closer together than this collapse into one.
    #[serde(default = "defaults::input_coalesce_ms")]
    pub coalesce_ms: u64,

    /// Event devices to read. Empty means every `/dev/input/event*`.
    #[serde(default)]
    pub devices: Vec<PathBuf>,
}

impl Default for InputCfg {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            coalesce_ms: defaults::input_coalesce_ms(),
            devices: Vec::new(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn poll_interval_ms() -> u64 {
        4000
    }

    pub fn burst_samples() -> u32 {
        10
    }

    pub fn burst_interval_ms() -> u64 {
        100
    }

    pub fn quiesce_ms() -> u64 {
        800
    }

    pub fn off_learn_window_ms() -> u64 {
        3000
    }

    pub fn reapply_offsets_ms() -> Vec<u64> {
        vec![0, 140, 520]
    }

    pub fn settle_delay_ms() -> u64 {
        40
    }

    pub fn auto_interval_seconds() -> u64 {
        30
    }

    pub fn preference_path() -> PathBuf {
        PathBuf::from("/var/lib/kb_backlightd/preferred_level.json")
    }

    pub fn schedule_path() -> PathBuf {
        PathBuf::from("/etc/kb_backlightd/schedule.yml")
    }

    pub fn input_coalesce_ms() -> u64 {
        250
    }

    pub fn enabled() -> bool {
        true
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            poll_interval_ms: defaults::poll_interval_ms(),
            burst_samples: defaults::burst_samples(),
            burst_interval_ms: defaults::burst_interval_ms(),
            quiesce_ms: defaults::quiesce_ms(),
            off_learn_window_ms: defaults::off_learn_window_ms(),
            reapply_offsets_ms: defaults::reapply_offsets_ms(),
            settle_delay_ms: defaults::settle_delay_ms(),
            auto_interval_seconds: defaults::auto_interval_seconds(),
            preference_path: defaults::preference_path(),
            schedule_path: defaults::schedule_path(),
            night_flag: NightFlagCfg::default(),
            input: InputCfg::default(),
            session_events: defaults::enabled(),
            display_events: defaults::enabled(),
            enable_dbus: defaults::enabled(),
            drivers: Vec::new(),
        }
    }
}

impl Config {
    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.drivers.is_empty() {
            bail!("No driver profiles configured");
        }

        let mut principals = HashSet::new();
        for profile in &self.drivers {
            profile.validate()?;
            if !principals.insert(profile.principal.as_str()) {
                bail!("Driver principal '{}' is listed twice", profile.principal);
            }
        }

        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("burst_interval_ms", self.burst_interval_ms),
            ("settle_delay_ms", self.settle_delay_ms),
            ("auto_interval_seconds", self.auto_interval_seconds),
            ("input.coalesce_ms", self.input.coalesce_ms),
        ] {
            if value == 0 {
                bail!("'{name}' must be greater than zero");
            }
        }

        if self.reapply_offsets_ms.is_empty() {
            bail!("'reapply_offsets_ms' needs at least one offset");
        }
        if self.reapply_offsets_ms.windows(2).any(|w| w[0] > w[1]) {
            bail!("'reapply_offsets_ms' must be in ascending order");
        }

        if let NightFlagCfg::File { path, .. } = &self.night_flag {
            if path.as_os_str().is_empty() {
                bail!("Night flag file path is empty");
            }
        }

        Ok(())
    }

    pub fn engine_timings(&self) -> EngineTimings {
        EngineTimings {
            quiesce: Duration::from_millis(self.quiesce_ms),
            off_learn_window: Duration::from_millis(self.off_learn_window_ms),
            reapply_offsets: self
                .reapply_offsets_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            burst_samples: self.burst_samples,
            burst_interval: Duration::from_millis(self.burst_interval_ms),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn auto_interval(&self) -> Duration {
        Duration::from_secs(self.auto_interval_seconds)
    }
}

fn locate_config() -> Result<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("kb_backlightd/config.yml");
        if cfg_dir.exists() {
            return Ok(cfg_dir);
        }
    }

    let etc = Path::new("/etc/kb_backlightd/config.yml");
    if etc.exists() {
        return Ok(etc.to_path_buf());
    }

    bail!("Configuration file not found in any standard location")
}

/// Loaded configuration plus the file it came from.
///
/// # Example
///
/// ```no_run
/// use kb_backlightd::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None).await?;
/// let poll = config_manager.get().await.poll_interval();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. KB_BACKLIGHTD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/kb_backlightd/config.yml or ~/.config/kb_backlightd/config.yml
    /// 4. /etc/kb_backlightd/config.yml
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate_config().context("No configuration file found")?,
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path)?;

        Ok(Self::new(config, config_path))
    }

    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            BacklightError::Config(format!("failed to parse YAML in {}: {e}", path.display()))
        })?;

        if config.version != 1 {
            return Err(BacklightError::Config(format!(
                "Unsupported config version {} in file: {}",
                config.version,
                path.display()
            ))
            .into());
        }

        config.validate().map_err(|e| {
            BacklightError::Config(format!("{} failed validation: {e:#}", path.display()))
        })?;

        Ok(config)
    }
}
