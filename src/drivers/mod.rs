//! Device control abstraction.
//!
//! Candidate control surfaces are plain [`DriverProfile`] records; the
//! [`BacklightController`] probes them in order and exposes uniform
//! get/set/reset operations over whichever one opened.

pub mod controller;
pub mod device_io;
pub mod profile;

pub use controller::{ActiveBinding, BacklightController, DEFAULT_SETTLE_DELAY};
pub use device_io::{DeviceIO, DeviceOpener, IoctlDevice, IoctlOpener};
pub use profile::DriverProfile;
