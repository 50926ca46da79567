//! Durable, process-external slot holding the preferred backlight level.
//!
//! Other processes (a companion service, the CLI) read and write the same
//! file. Writers do not lock: the last writer wins. Readers never fail and
//! fall back to [`BacklightLevel::High`] on absence or corruption.

use std::{
    fs,
    path::{Path, PathBuf},
    process,
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::level::BacklightLevel;

/// Read/write access to the persisted preference.
pub trait PreferenceStore: Send + Sync {
    /// Current preference; the default on any error.
    fn read(&self) -> BacklightLevel;

    /// Best-effort persist. Failures are logged and swallowed.
    fn write(&self, level: BacklightLevel);
}

#[derive(Debug, Serialize)]
struct PreferenceRecord {
    preferred_level: u8,
}

/// Accepts the JSON record as well as a bare integer written by hand.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredPreference {
    Record { preferred_level: i64 },
    Bare(i64),
}

/// JSON-file backed preference store.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_read(&self) -> Result<Option<BacklightLevel>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let stored: StoredPreference = serde_json::from_str(content.trim())
            .with_context(|| format!("Corrupt preference record in {}", self.path.display()))?;

        let raw = match stored {
            StoredPreference::Record { preferred_level } => preferred_level,
            StoredPreference::Bare(value) => value,
        };
        Ok(u8::try_from(raw)
            .ok()
            .and_then(|v| BacklightLevel::try_from(v).ok()))
    }

    fn try_write(&self, level: BacklightLevel) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let record = serde_json::to_string(&PreferenceRecord {
            preferred_level: level.into(),
        })?;

        // Per-process temp name so concurrent writers never share a file.
        let tmp_path = self.path.with_extension(format!("json.{}.tmp", process::id()));
        fs::write(&tmp_path, record)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to move preference to {}", self.path.display()))?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn read(&self) -> BacklightLevel {
        match self.try_read() {
            Ok(Some(level)) => level,
            Ok(None) => {
                debug!(
                    "Out-of-range preference in {}, using default",
                    self.path.display()
                );
                BacklightLevel::default()
            }
            Err(e) => {
                debug!("{e:#}; using default preference");
                BacklightLevel::default()
            }
        }
    }

    fn write(&self, level: BacklightLevel) {
        match self.try_write(level) {
            Ok(()) => info!("Preferred backlight level saved: {level}"),
            Err(e) => warn!("Could not persist preferred level {level}: {e:#}"),
        }
    }
}
