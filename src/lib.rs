//! # kb_backlightd
//!
//! A Linux daemon that keeps the keyboard backlight at the level the user
//! chose, across suspend/resume, unlock, display power changes and an
//! optional day/night schedule.
//!
//! ## Features
//!
//! - **Driver profiles**: ioctl-style get/set codes per control surface,
//!   probed in order from configuration
//! - **Learning**: hotkey changes are picked up as the new preference, except
//!   where firmware is known to drift (after wake, right after our own writes)
//! - **Wake re-apply**: staggered writes outlast firmware that resets the
//!   backlight a moment after resume
//! - **Auto schedule**: time-based or night-flag-based day/night levels
//! - **D-Bus interface**: control and external event injection
//!
//! ## Architecture
//!
//! - [`Engine`](engine::Engine) - reconciliation state machine
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - lifecycle and
//!   event routing
//! - [`EventBus`](event::EventBus) - watcher to coordinator channel
//! - Service providers for each signal source
//!
//! ## Example
//!
//! ```no_run
//! use kb_backlightd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod event;
pub mod interface;
pub mod level;
pub mod night_flag;
pub mod ops;
pub mod preference;
pub mod providers;
pub mod schedule;
pub mod task_manager;

#[cfg(test)]
mod test_utils;
