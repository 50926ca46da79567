//! The three backlight steps the daemon knows about.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::BacklightError;

/// Keyboard backlight level.
///
/// Only these three values are valid on the wire and in storage. Anything
/// else read back from hardware or disk is an error, never a fourth state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BacklightLevel {
    Off = 0,
    Low = 1,
    #[default]
    High = 2,
}

impl BacklightLevel {
    /// Every level, in ascending order.
    pub const ALL: [BacklightLevel; 3] = [Self::Off, Self::Low, Self::High];

    /// Clamps an arbitrary integer into the valid range.
    pub fn clamped(value: i64) -> Self {
        match value {
            i64::MIN..=0 => Self::Off,
            1 => Self::Low,
            _ => Self::High,
        }
    }
}

impl TryFrom<u8> for BacklightLevel {
    type Error = BacklightError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Low),
            2 => Ok(Self::High),
            other => Err(BacklightError::InvalidLevel(other.to_string())),
        }
    }
}

impl From<BacklightLevel> for u8 {
    fn from(level: BacklightLevel) -> Self {
        level as u8
    }
}

impl FromStr for BacklightLevel {
    type Err = BacklightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "off" => Ok(Self::Off),
            "1" | "low" => Ok(Self::Low),
            "2" | "high" => Ok(Self::High),
            _ => Err(BacklightError::InvalidLevel(s.to_string())),
        }
    }
}

impl fmt::Display for BacklightLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "Off",
            Self::Low => "Low",
            Self::High => "High",
        };
        f.write_str(name)
    }
}
