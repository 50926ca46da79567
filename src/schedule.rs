//! Day/night auto-schedule: configuration, persistence and evaluation.

use std::{
    fs,
    path::{Path, PathBuf},
    process,
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{level::BacklightLevel, night_flag::NightFlagReader};

/// How "day" is told apart from "night".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScheduleMode {
    /// Fixed wall-clock window.
    #[default]
    TimeBased,
    /// Night while the OS blue-light-reduction flag is on.
    #[serde(alias = "DayNightFlagBased")]
    FlagBased,
}

/// User-configured automatic level schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub day_level: BacklightLevel,
    pub night_level: BacklightLevel,
    pub mode: ScheduleMode,
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    pub auto_enabled: bool,
}

mod defaults {
    use super::*;

    pub fn day_start() -> NaiveTime {
        NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn day_end() -> NaiveTime {
        NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            day_level: BacklightLevel::Low,
            night_level: BacklightLevel::High,
            mode: ScheduleMode::TimeBased,
            day_start: defaults::day_start(),
            day_end: defaults::day_end(),
            auto_enabled: false,
        }
    }
}

impl ScheduleConfig {
    /// Whether `now` falls in the day span of a time-based schedule.
    ///
    /// `[day_start, day_end)` on a 24 hour wheel; a span with
    /// `day_start > day_end` wraps past midnight. The boundary is a hard
    /// instant and an empty span (`start == end`) is always night.
    pub fn is_day_at(&self, now: NaiveTime) -> bool {
        if self.day_start <= self.day_end {
            now >= self.day_start && now < self.day_end
        } else {
            now >= self.day_start || now < self.day_end
        }
    }
}

/// Level the schedule asks for at `now`.
///
/// The night flag is consulted only in [`ScheduleMode::FlagBased`]; an
/// unknown flag counts as day.
pub fn desired_level(
    config: &ScheduleConfig,
    now: NaiveTime,
    night_flag: &dyn NightFlagReader,
) -> BacklightLevel {
    let is_day = match config.mode {
        ScheduleMode::TimeBased => config.is_day_at(now),
        ScheduleMode::FlagBased => !night_flag.night_flag().unwrap_or(false),
    };

    if is_day {
        config.day_level
    } else {
        config.night_level
    }
}

/// Tolerant time-of-day parser.
pub fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    const FORMATS: [&str; 5] = ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p", "%I:%M:%S %p"];

    let text = text.trim();
    FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
}

/// Source of the local time of day.
pub trait WallClock: Send + Sync {
    fn time_of_day(&self) -> NaiveTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl WallClock for LocalClock {
    fn time_of_day(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// On-disk form. Every field is optional so a partially valid file still
/// yields a usable schedule.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredSchedule {
    #[serde(alias = "dayLevel")]
    day_level: Option<i64>,
    #[serde(alias = "nightLevel")]
    night_level: Option<i64>,
    mode: Option<ScheduleMode>,
    #[serde(alias = "dayStart")]
    day_start: Option<String>,
    #[serde(alias = "dayEnd")]
    day_end: Option<String>,
    #[serde(alias = "autoEnabled")]
    auto_enabled: Option<bool>,
}

impl From<StoredSchedule> for ScheduleConfig {
    fn from(stored: StoredSchedule) -> Self {
        let fallback = ScheduleConfig::default();
        let time = |value: Option<String>, default: NaiveTime| {
            value
                .and_then(|text| {
                    let parsed = parse_time_of_day(&text);
                    if parsed.is_none() {
                        warn!("Unparsable schedule time '{text}', using {default}");
                    }
                    parsed
                })
                .unwrap_or(default)
        };

        Self {
            day_level: stored
                .day_level
                .map_or(fallback.day_level, BacklightLevel::clamped),
            night_level: stored
                .night_level
                .map_or(fallback.night_level, BacklightLevel::clamped),
            mode: stored.mode.unwrap_or(fallback.mode),
            day_start: time(stored.day_start, fallback.day_start),
            day_end: time(stored.day_end, fallback.day_end),
            auto_enabled: stored.auto_enabled.unwrap_or(fallback.auto_enabled),
        }
    }
}

impl From<&ScheduleConfig> for StoredSchedule {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            day_level: Some(i64::from(u8::from(config.day_level))),
            night_level: Some(i64::from(u8::from(config.night_level))),
            mode: Some(config.mode),
            day_start: Some(config.day_start.format("%H:%M").to_string()),
            day_end: Some(config.day_end.format("%H:%M").to_string()),
            auto_enabled: Some(config.auto_enabled),
        }
    }
}

/// Schedule file shared with the settings UI.
///
/// ```yaml
/// day_level: 1
/// night_level: 2
/// mode: TimeBased     # or FlagBased
/// day_start: "08:00"
/// day_end: "20:00"
/// auto_enabled: true
/// ```
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the schedule; unreadable or corrupt files yield full defaults.
    pub fn load(&self) -> ScheduleConfig {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!("Schedule {} unreadable ({e}), using defaults", self.path.display());
                return ScheduleConfig::default();
            }
        };

        match serde_yaml::from_str::<Option<StoredSchedule>>(&content) {
            Ok(stored) => stored.unwrap_or_default().into(),
            Err(e) => {
                warn!("Corrupt schedule {}: {e}; using defaults", self.path.display());
                ScheduleConfig::default()
            }
        }
    }

    /// Writes the schedule atomically.
    pub fn save(&self, config: &ScheduleConfig) -> Result<()> {
        let yaml = serde_yaml::to_string(&StoredSchedule::from(config))
            .context("Failed to serialize schedule")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Other writers of the same file use their own temporary name.
        let tmp_path = self
            .path
            .with_extension(format!("yml.{}.tmp", process::id()));
        fs::write(&tmp_path, yaml)
            .with_context(|| format!("Failed to write temporary schedule {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to move schedule to {}", self.path.display()))?;

        info!("Schedule saved to: {}", self.path.display());
        Ok(())
    }
}
