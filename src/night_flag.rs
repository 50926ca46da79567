//! Readers for the OS blue-light-reduction ("night light") flag.
//!
//! The flag is only ever a day/night discriminator. An unknown state is
//! reported as `None` and treated as day by the evaluator, so no reader may
//! block or fail loudly.

use std::{
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use log::debug;
use serde::{Deserialize, Serialize};

/// Source of the current night-light state.
pub trait NightFlagReader: Send + Sync {
    /// `Some(true)` when blue-light reduction is active, `None` if unknown.
    fn night_flag(&self) -> Option<bool>;
}

/// Reader for systems without a night-light flag.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNightFlag;

impl NightFlagReader for NoNightFlag {
    fn night_flag(&self) -> Option<bool> {
        None
    }
}

const UNKNOWN: u8 = 0;
const OFF: u8 = 1;
const ON: u8 = 2;

/// Flag value cached from a push-style watcher (e.g. a D-Bus property).
#[derive(Debug, Clone, Default)]
pub struct SharedNightFlag(Arc<AtomicU8>);

impl SharedNightFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the new state; returns `true` if it differs from the old one.
    pub fn set(&self, value: Option<bool>) -> bool {
        let encoded = match value {
            None => UNKNOWN,
            Some(false) => OFF,
            Some(true) => ON,
        };
        self.0.swap(encoded, Ordering::AcqRel) != encoded
    }
}

impl NightFlagReader for SharedNightFlag {
    fn night_flag(&self) -> Option<bool> {
        match self.0.load(Ordering::Acquire) {
            OFF => Some(false),
            ON => Some(true),
            _ => None,
        }
    }
}

/// Header shared by every known CloudStore blob revision.
const BLOB_HEADER: [u8; 4] = [0x43, 0x42, 0x01, 0x00];

/// Empirical byte layouts of the exported night-light state blob.
///
/// The encoding is undocumented and has changed between OS builds, so each
/// revision is a separate strategy. A layout that does not recognise the
/// blob returns `None` instead of guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlobLayout {
    /// Older builds: state byte at offset 18, `0x15` on, `0x13` off.
    Legacy,
    /// Newer builds: `0x10 0x00` at offset 23 when on, absent when off.
    Modern,
}

impl BlobLayout {
    const LEGACY_STATE_OFFSET: usize = 18;
    const MODERN_MARKER_OFFSET: usize = 23;
    const MODERN_MIN_LEN: usize = 25;

    pub fn decode(self, blob: &[u8]) -> Option<bool> {
        if !blob.starts_with(&BLOB_HEADER) {
            return None;
        }
        match self {
            Self::Legacy => match blob.get(Self::LEGACY_STATE_OFFSET)? {
                0x15 => Some(true),
                0x13 => Some(false),
                _ => None,
            },
            Self::Modern => {
                if blob.len() < Self::MODERN_MIN_LEN {
                    return None;
                }
                let marker = &blob[Self::MODERN_MARKER_OFFSET..Self::MODERN_MARKER_OFFSET + 2];
                Some(marker == [0x10, 0x00])
            }
        }
    }
}

/// Reads the flag from a blob file using the first layout that recognises it.
#[derive(Debug, Clone)]
pub struct BlobNightFlag {
    path: PathBuf,
    layouts: Vec<BlobLayout>,
}

impl BlobNightFlag {
    pub fn new(path: impl Into<PathBuf>, layouts: Vec<BlobLayout>) -> Self {
        Self {
            path: path.into(),
            layouts,
        }
    }

    pub fn decode(&self, blob: &[u8]) -> Option<bool> {
        self.layouts.iter().find_map(|layout| layout.decode(blob))
    }
}

impl NightFlagReader for BlobNightFlag {
    fn night_flag(&self) -> Option<bool> {
        match fs::read(&self.path) {
            Ok(blob) => {
                let flag = self.decode(&blob);
                if flag.is_none() {
                    debug!(
                        "Unrecognised night-light blob layout in {} ({} bytes)",
                        self.path.display(),
                        blob.len()
                    );
                }
                flag
            }
            Err(e) => {
                debug!("Night-light blob {} unreadable: {e}", self.path.display());
                None
            }
        }
    }
}
