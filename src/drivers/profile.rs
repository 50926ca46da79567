//! Declarative description of one candidate backlight control surface.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Deserializer, Serialize};

use crate::level::BacklightLevel;

/// One candidate hardware control surface.
///
/// All vendor variation lives in data: the control codes, an optional read
/// seed, and two raw value tables (one for reading, one for writing).
///
/// ```yaml
/// - principal: /dev/kbd_backlight0
///   description: "Vendor A keyboard light"
///   get_code: 0x222C
///   set_code: 0x2230
///   get_input_payload: 0x1
///   get_off: 0
///   get_low: 1
///   get_high: 2
///   set_off: 0x100
///   set_low: 0x101
///   set_high: 0x102
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverProfile {
    /// Handle-open target, usually a device node path.
    pub principal: String,
    pub description: String,

    #[serde(alias = "getCode", deserialize_with = "raw::literal")]
    pub get_code: u32,
    #[serde(alias = "setCode", deserialize_with = "raw::literal")]
    pub set_code: u32,

    /// Some protocols need a fixed token in the read request.
    #[serde(
        default,
        alias = "getInputPayload",
        deserialize_with = "raw::optional_literal",
        skip_serializing_if = "Option::is_none"
    )]
    pub get_input_payload: Option<u32>,

    #[serde(alias = "getOff", deserialize_with = "raw::literal")]
    pub get_off: u32,
    #[serde(alias = "getLow", deserialize_with = "raw::literal")]
    pub get_low: u32,
    #[serde(alias = "getHigh", deserialize_with = "raw::literal")]
    pub get_high: u32,

    #[serde(alias = "setOff", deserialize_with = "raw::literal")]
    pub set_off: u32,
    #[serde(alias = "setLow", deserialize_with = "raw::literal")]
    pub set_low: u32,
    #[serde(alias = "setHigh", deserialize_with = "raw::literal")]
    pub set_high: u32,
}

impl DriverProfile {
    /// Maps a raw value read back from hardware to a level.
    pub fn level_for_raw(&self, raw: u32) -> Option<BacklightLevel> {
        match raw {
            r if r == self.get_off => Some(BacklightLevel::Off),
            r if r == self.get_low => Some(BacklightLevel::Low),
            r if r == self.get_high => Some(BacklightLevel::High),
            _ => None,
        }
    }

    /// Raw value to write to request `level`.
    pub fn raw_for_level(&self, level: BacklightLevel) -> u32 {
        match level {
            BacklightLevel::Off => self.set_off,
            BacklightLevel::Low => self.set_low,
            BacklightLevel::High => self.set_high,
        }
    }

    /// Checks that both value tables are unambiguous.
    pub fn validate(&self) -> Result<()> {
        if self.principal.trim().is_empty() {
            bail!("Driver profile '{}' has an empty principal", self.description);
        }

        let distinct = |a: u32, b: u32, c: u32| a != b && b != c && a != c;
        if !distinct(self.get_off, self.get_low, self.get_high) {
            return Err(anyhow!(
                "Driver profile '{}' maps two levels to the same read value",
                self.principal
            ));
        }
        if !distinct(self.set_off, self.set_low, self.set_high) {
            return Err(anyhow!(
                "Driver profile '{}' maps two levels to the same write value",
                self.principal
            ));
        }
        Ok(())
    }
}

/// Numeric fields accept YAML integers as well as hex or decimal strings.
mod raw {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Literal {
        Number(u64),
        Text(String),
    }

    fn parse(literal: Literal) -> std::result::Result<u32, String> {
        let value = match literal {
            Literal::Number(n) => n,
            Literal::Text(text) => {
                let text = text.trim();
                let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
                    None => text.replace('_', "").parse::<u64>(),
                };
                parsed.map_err(|e| format!("invalid numeric literal '{text}': {e}"))?
            }
        };
        u32::try_from(value).map_err(|_| format!("value {value:#x} does not fit in 32 bits"))
    }

    pub fn literal<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
        parse(Literal::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }

    pub fn optional_literal<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<u32>, D::Error> {
        Option::<Literal>::deserialize(deserializer)?
            .map(parse)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
