//! Error taxonomy for hardware access and the user-facing operations.

use std::{io, process::ExitCode};

use crate::level::BacklightLevel;

/// Result alias for operations at the hardware boundary.
pub type Result<T> = std::result::Result<T, BacklightError>;

/// Errors raised by the device control layer and the explicit operations.
#[derive(thiserror::Error, Debug)]
pub enum BacklightError {
    /// None of the configured driver profiles could be opened.
    #[error("no supported keyboard backlight driver found (tried {attempted:?}): {last_error}")]
    NoSupportedDriver {
        attempted: Vec<String>,
        last_error: String,
    },

    #[error("control operation {code:#x} on {principal} failed: {source}")]
    Io {
        principal: String,
        code: u32,
        #[source]
        source: io::Error,
    },

    /// Hardware answered with a raw value the active profile does not know.
    /// Usually a profile/firmware mismatch.
    #[error("{principal} reported raw value {raw:#x}, which is not in the profile's level table")]
    UnmappedValue { principal: String, raw: u32 },

    #[error("requested backlight {requested} but hardware reports {observed}")]
    SetDidNotTakeEffect {
        requested: BacklightLevel,
        observed: BacklightLevel,
    },

    #[error("invalid backlight level '{0}' (expected 0, 1, 2, off, low or high)")]
    InvalidLevel(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BacklightError {
    /// Whether retrying on the next trigger may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::UnmappedValue { .. })
    }

    /// Process exit code for the CLI commands.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    pub(crate) fn exit_status(&self) -> u8 {
        match self {
            Self::InvalidLevel(_) => 2,
            Self::NoSupportedDriver { .. } => 3,
            Self::Io { .. } | Self::UnmappedValue { .. } | Self::SetDidNotTakeEffect { .. } => 4,
            Self::Config(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exit_statuses_follow_cli_contract() {
        assert_eq!(BacklightError::InvalidLevel("9".into()).exit_status(), 2);
        assert_eq!(
            BacklightError::NoSupportedDriver {
                attempted: vec![],
                last_error: String::new(),
            }
            .exit_status(),
            3
        );
        assert_eq!(
            BacklightError::UnmappedValue {
                principal: "/dev/kbd".into(),
                raw: 9,
            }
            .exit_status(),
            4
        );
        assert_eq!(BacklightError::Config("bad".into()).exit_status(), 1);
    }

    #[test]
    fn transient_errors_are_io_and_unmapped() {
        let io = BacklightError::Io {
            principal: "/dev/kbd".into(),
            code: 0x10,
            source: io::Error::other("busy"),
        };
        assert!(io.is_transient());
        assert!(
            !BacklightError::SetDidNotTakeEffect {
                requested: BacklightLevel::Low,
                observed: BacklightLevel::Off,
            }
            .is_transient()
        );
    }

    #[test]
    fn no_driver_message_lists_principals() {
        let err = BacklightError::NoSupportedDriver {
            attempted: vec!["/dev/a".into(), "/dev/b".into()],
            last_error: "permission denied".into(),
        };
        let text = err.to_string();
        assert!(text.contains("/dev/a"));
        assert!(text.contains("/dev/b"));
        assert!(text.contains("permission denied"));
    }
}
