//! Shared fakes for unit tests.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use chrono::NaiveTime;
use tempfile::TempDir;

use crate::{
    app_context::AppState,
    config::{Config, ConfigManager},
    drivers::{BacklightController, DeviceIO, DeviceOpener, DriverProfile},
    engine::{Engine, EngineDeps, EngineTimings},
    level::BacklightLevel,
    night_flag::SharedNightFlag,
    preference::PreferenceStore,
    schedule::{ScheduleConfig, ScheduleStore, WallClock},
};

/// Profile with small, distinct codes and raw tables.
pub fn test_profile(principal: &str) -> DriverProfile {
    DriverProfile {
        principal: principal.to_string(),
        description: format!("test keyboard at {principal}"),
        get_code: 0x10,
        set_code: 0x11,
        get_input_payload: None,
        get_off: 0,
        get_low: 1,
        get_high: 2,
        set_off: 0x100,
        set_low: 0x101,
        set_high: 0x102,
    }
}

#[derive(Debug)]
struct KeyboardState {
    raw: u32,
    ignore_writes: bool,
    fail_reads: bool,
    writes: Vec<BacklightLevel>,
}

/// In-memory keyboard speaking a [`DriverProfile`].
///
/// Clones share state, so a test can keep one handle while the controller
/// owns another.
#[derive(Debug, Clone)]
pub struct FakeKeyboard {
    profile: DriverProfile,
    state: Arc<Mutex<KeyboardState>>,
}

impl FakeKeyboard {
    pub fn new(profile: DriverProfile, level: BacklightLevel) -> Self {
        let raw = Self::get_raw(&profile, level);
        Self {
            profile,
            state: Arc::new(Mutex::new(KeyboardState {
                raw,
                ignore_writes: false,
                fail_reads: false,
                writes: Vec::new(),
            })),
        }
    }

    fn get_raw(profile: &DriverProfile, level: BacklightLevel) -> u32 {
        match level {
            BacklightLevel::Off => profile.get_off,
            BacklightLevel::Low => profile.get_low,
            BacklightLevel::High => profile.get_high,
        }
    }

    /// Simulates firmware that acknowledges writes without acting on them.
    pub fn ignore_writes(&self, ignore: bool) {
        self.state.lock().unwrap().ignore_writes = ignore;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    /// Puts an arbitrary raw value behind the read code.
    pub fn force_raw(&self, raw: u32) {
        self.state.lock().unwrap().raw = raw;
    }

    /// Changes the level behind the driver's back, like a hotkey would.
    pub fn set_level(&self, level: BacklightLevel) {
        self.state.lock().unwrap().raw = Self::get_raw(&self.profile, level);
    }

    pub fn level(&self) -> Option<BacklightLevel> {
        self.profile.level_for_raw(self.state.lock().unwrap().raw)
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes.len()
    }

    pub fn writes(&self) -> Vec<BacklightLevel> {
        self.state.lock().unwrap().writes.clone()
    }
}

impl DeviceIO for FakeKeyboard {
    fn control(&self, code: u32, input: Option<u32>) -> io::Result<u32> {
        let mut state = self.state.lock().unwrap();

        if code == self.profile.get_code {
            if state.fail_reads {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            if input != self.profile.get_input_payload {
                return Err(io::Error::from_raw_os_error(libc::EINVAL));
            }
            return Ok(state.raw);
        }

        if code == self.profile.set_code {
            let requested = input.and_then(|raw| {
                BacklightLevel::ALL
                    .into_iter()
                    .find(|level| self.profile.raw_for_level(*level) == raw)
            });
            let Some(level) = requested else {
                return Err(io::Error::from_raw_os_error(libc::EINVAL));
            };
            state.writes.push(level);
            if !state.ignore_writes {
                state.raw = Self::get_raw(&self.profile, level);
            }
            return Ok(0);
        }

        Err(io::Error::from_raw_os_error(libc::ENOTTY))
    }
}

/// Opener that succeeds only for the listed principals and records every
/// attempt.
#[derive(Debug, Default)]
pub struct RecordingOpener {
    openable: Vec<String>,
    attempts: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub fn succeeding_on(principals: &[&str]) -> Self {
        Self {
            openable: principals.iter().map(|p| p.to_string()).collect(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

impl DeviceOpener for RecordingOpener {
    fn open(&self, principal: &str) -> io::Result<Box<dyn DeviceIO>> {
        self.attempts.lock().unwrap().push(principal.to_string());
        if self.openable.iter().any(|p| p == principal) {
            Ok(Box::new(FakeKeyboard::new(
                test_profile(principal),
                BacklightLevel::High,
            )))
        } else {
            Err(io::Error::from_raw_os_error(libc::ENOENT))
        }
    }
}

/// Preference store kept in memory, counting writes.
#[derive(Debug, Clone)]
pub struct MemoryPreferenceStore {
    level: Arc<Mutex<BacklightLevel>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryPreferenceStore {
    pub fn new(level: BacklightLevel) -> Self {
        Self {
            level: Arc::new(Mutex::new(level)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Changes the stored value as another process would, without counting.
    pub fn set_external(&self, level: BacklightLevel) {
        *self.level.lock().unwrap() = level;
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn read(&self) -> BacklightLevel {
        *self.level.lock().unwrap()
    }

    fn write(&self, level: BacklightLevel) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.level.lock().unwrap() = level;
    }
}

/// Wall clock pinned to a settable time of day.
#[derive(Debug, Clone)]
pub struct FixedClock(Arc<Mutex<NaiveTime>>);

impl FixedClock {
    pub fn at(hour: u32, minute: u32) -> Self {
        Self(Arc::new(Mutex::new(
            NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
        )))
    }

    pub fn set(&self, hour: u32, minute: u32) {
        *self.0.lock().unwrap() = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
    }
}

impl WallClock for FixedClock {
    fn time_of_day(&self) -> NaiveTime {
        *self.0.lock().unwrap()
    }
}

/// Fully wired application state over a fake keyboard.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub keyboard: FakeKeyboard,
    pub store: MemoryPreferenceStore,
    pub dir: TempDir,
}

pub fn test_app(level: BacklightLevel, schedule: ScheduleConfig) -> TestApp {
    let dir = TempDir::new().unwrap();
    let profile = test_profile("/dev/fake0");
    let keyboard = FakeKeyboard::new(profile.clone(), level);
    let store = MemoryPreferenceStore::new(BacklightLevel::High);
    let night_flag = SharedNightFlag::new();

    let schedule_store = ScheduleStore::new(dir.path().join("schedule.yml"));
    schedule_store.save(&schedule).unwrap();

    let controller = BacklightController::from_binding(profile.clone(), Box::new(keyboard.clone()))
        .with_settle_delay(std::time::Duration::from_millis(1));
    let engine = Engine::new(
        controller,
        EngineDeps {
            store: Arc::new(store.clone()),
            night_flag: Arc::new(night_flag.clone()),
            clock: Arc::new(FixedClock::at(12, 0)),
        },
        schedule,
        EngineTimings::default(),
    );

    let config = Config {
        schedule_path: schedule_store.path().to_path_buf(),
        drivers: vec![profile],
        ..Config::default()
    };
    let config_manager = ConfigManager::new(config, dir.path().join("config.yml"));

    TestApp {
        state: Arc::new(AppState::from_parts(
            config_manager,
            engine,
            schedule_store,
            night_flag,
        )),
        keyboard,
        store,
        dir,
    }
}
