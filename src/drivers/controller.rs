use std::time::Duration;

use log::{debug, info, warn};

use crate::{
    error::{BacklightError, Result},
    level::BacklightLevel,
};

use super::{
    device_io::{DeviceIO, DeviceOpener},
    profile::DriverProfile,
};

/// Default delay between a write and its verifying read-back.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(40);

/// The profile that opened successfully, together with its open handle.
pub struct ActiveBinding {
    pub profile: DriverProfile,
    device: Box<dyn DeviceIO>,
}

/// Uniform get/set access to whichever driver profile is present.
///
/// Owns the only handle to the device; dropping the controller closes it.
pub struct BacklightController {
    binding: ActiveBinding,
    settle_delay: Duration,
}

impl std::fmt::Debug for BacklightController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacklightController")
            .field("principal", &self.binding.profile.principal)
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

impl BacklightController {
    /// Probes `profiles` in order and binds to the first one whose handle
    /// opens. Later profiles are never attempted.
    ///
    /// # Errors
    ///
    /// [`BacklightError::NoSupportedDriver`] with every attempted principal
    /// and the last underlying error when nothing opens.
    pub fn open(profiles: &[DriverProfile], opener: &dyn DeviceOpener) -> Result<Self> {
        let mut attempted = Vec::with_capacity(profiles.len());
        let mut last_error = String::from("no driver profiles configured");

        for profile in profiles {
            attempted.push(profile.principal.clone());
            match opener.open(&profile.principal) {
                Ok(device) => {
                    info!(
                        "Using backlight driver '{}' at {}",
                        profile.description, profile.principal
                    );
                    return Ok(Self::from_binding(profile.clone(), device));
                }
                Err(e) => {
                    debug!("Driver candidate {} unavailable: {e}", profile.principal);
                    last_error = format!("{}: {e}", profile.principal);
                }
            }
        }

        Err(BacklightError::NoSupportedDriver {
            attempted,
            last_error,
        })
    }

    /// Wraps an already opened device.
    pub fn from_binding(profile: DriverProfile, device: Box<dyn DeviceIO>) -> Self {
        Self {
            binding: ActiveBinding { profile, device },
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Overrides the write settle delay. Zero is bumped to one millisecond.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay.max(Duration::from_millis(1));
        self
    }

    pub fn profile(&self) -> &DriverProfile {
        &self.binding.profile
    }

    /// Reads the current level from hardware.
    pub fn get_level(&self) -> Result<BacklightLevel> {
        let profile = &self.binding.profile;
        let raw = self
            .binding
            .device
            .control(profile.get_code, profile.get_input_payload)
            .map_err(|source| BacklightError::Io {
                principal: profile.principal.clone(),
                code: profile.get_code,
                source,
            })?;

        profile
            .level_for_raw(raw)
            .ok_or_else(|| BacklightError::UnmappedValue {
                principal: profile.principal.clone(),
                raw,
            })
    }

    /// Writes `level` and verifies it after the settle delay.
    ///
    /// Some firmware silently ignores writes in certain power states, so a
    /// protocol-level success is not trusted until the read-back agrees.
    pub async fn set_level(&self, level: BacklightLevel) -> Result<()> {
        let profile = &self.binding.profile;
        let raw = profile.raw_for_level(level);

        self.binding
            .device
            .control(profile.set_code, Some(raw))
            .map_err(|source| BacklightError::Io {
                principal: profile.principal.clone(),
                code: profile.set_code,
                source,
            })?;

        tokio::time::sleep(self.settle_delay).await;

        let observed = self.get_level()?;
        if observed != level {
            warn!("Backlight write of {level} did not stick, hardware reports {observed}");
            return Err(BacklightError::SetDidNotTakeEffect {
                requested: level,
                observed,
            });
        }
        Ok(())
    }

    /// Sets `level` only if hardware is not already there.
    ///
    /// Returns `true` when a write was issued.
    pub async fn reset_to(&self, level: BacklightLevel) -> Result<bool> {
        if self.get_level()? == level {
            return Ok(false);
        }
        self.set_level(level).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        drivers::device_io::MockDeviceIO,
        test_utils::{FakeKeyboard, RecordingOpener, test_profile},
    };
    use pretty_assertions::assert_eq;
    use std::io;

    fn controller_with(device: FakeKeyboard) -> BacklightController {
        BacklightController::from_binding(test_profile("/dev/fake0"), Box::new(device))
            .with_settle_delay(Duration::from_millis(1))
    }

    #[test]
    fn binds_to_first_openable_profile_and_stops() {
        let profiles = vec![
            test_profile("/dev/a"),
            test_profile("/dev/b"),
            test_profile("/dev/c"),
        ];
        let opener = RecordingOpener::succeeding_on(&["/dev/b", "/dev/c"]);

        let controller = BacklightController::open(&profiles, &opener).unwrap();

        assert_eq!(controller.profile().principal, "/dev/b");
        assert_eq!(opener.attempts(), vec!["/dev/a".to_string(), "/dev/b".to_string()]);
    }

    #[test]
    fn reports_every_attempt_when_nothing_opens() {
        let profiles = vec![test_profile("/dev/a"), test_profile("/dev/b")];
        let opener = RecordingOpener::succeeding_on(&[]);

        match BacklightController::open(&profiles, &opener) {
            Err(BacklightError::NoSupportedDriver {
                attempted,
                last_error,
            }) => {
                assert_eq!(attempted, vec!["/dev/a".to_string(), "/dev/b".to_string()]);
                assert!(last_error.contains("/dev/b"));
            }
            other => panic!("expected NoSupportedDriver, got {other:?}"),
        }
    }

    #[test]
    fn empty_profile_list_is_no_supported_driver() {
        let opener = RecordingOpener::succeeding_on(&[]);
        assert!(matches!(
            BacklightController::open(&[], &opener),
            Err(BacklightError::NoSupportedDriver { .. })
        ));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_every_level() {
        let keyboard = FakeKeyboard::new(test_profile("/dev/fake0"), BacklightLevel::Off);
        let controller = controller_with(keyboard.clone());

        for level in BacklightLevel::ALL {
            controller.set_level(level).await.unwrap();
            assert_eq!(controller.get_level().unwrap(), level);
        }
    }

    #[tokio::test]
    async fn ignored_write_is_detected() {
        let keyboard = FakeKeyboard::new(test_profile("/dev/fake0"), BacklightLevel::Low);
        keyboard.ignore_writes(true);
        let controller = controller_with(keyboard.clone());

        let err = controller.set_level(BacklightLevel::High).await.unwrap_err();
        assert!(matches!(
            err,
            BacklightError::SetDidNotTakeEffect {
                requested: BacklightLevel::High,
                observed: BacklightLevel::Low,
            }
        ));
    }

    #[tokio::test]
    async fn reset_to_current_level_never_writes() {
        let profile = test_profile("/dev/fake0");
        let get_code = profile.get_code;
        let set_code = profile.set_code;
        let high_raw = profile.get_high;

        let mut device = MockDeviceIO::new();
        device
            .expect_control()
            .withf(move |code, _| *code == get_code)
            .returning(move |_, _| Ok(high_raw));
        device
            .expect_control()
            .withf(move |code, _| *code == set_code)
            .times(0);

        let controller = BacklightController::from_binding(profile, Box::new(device));
        assert!(!controller.reset_to(BacklightLevel::High).await.unwrap());
    }

    #[tokio::test]
    async fn reset_to_other_level_writes_once() {
        let keyboard = FakeKeyboard::new(test_profile("/dev/fake0"), BacklightLevel::Off);
        let controller = controller_with(keyboard.clone());

        assert!(controller.reset_to(BacklightLevel::Low).await.unwrap());
        assert!(!controller.reset_to(BacklightLevel::Low).await.unwrap());
        assert_eq!(keyboard.write_count(), 1);
    }

    #[test]
    fn unmapped_raw_value_is_a_hard_error() {
        let keyboard = FakeKeyboard::new(test_profile("/dev/fake0"), BacklightLevel::Off);
        keyboard.force_raw(0xBAD);
        let controller = controller_with(keyboard);

        assert!(matches!(
            controller.get_level(),
            Err(BacklightError::UnmappedValue { raw: 0xBAD, .. })
        ));
    }

    #[test]
    fn read_sends_input_payload_when_profile_requires_it() {
        let mut profile = test_profile("/dev/fake0");
        profile.get_input_payload = Some(0x5A);
        let keyboard = FakeKeyboard::new(profile.clone(), BacklightLevel::Low);
        let controller = BacklightController::from_binding(profile, Box::new(keyboard));

        assert_eq!(controller.get_level().unwrap(), BacklightLevel::Low);
    }

    #[test]
    fn io_failure_carries_code_and_principal() {
        let mut device = MockDeviceIO::new();
        device
            .expect_control()
            .returning(|_, _| Err(io::Error::from_raw_os_error(libc::EIO)));
        let controller =
            BacklightController::from_binding(test_profile("/dev/fake0"), Box::new(device));

        match controller.get_level() {
            Err(BacklightError::Io {
                principal, code, ..
            }) => {
                assert_eq!(principal, "/dev/fake0");
                assert_eq!(code, test_profile("/dev/fake0").get_code);
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
