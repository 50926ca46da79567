//! One-shot commands: `get`, `set` and `reset`.
//!
//! Each command builds the same engine the daemon uses, so explicit
//! selection follows the daemon's persistence rules.

use anyhow::{Context, Result};
use log::info;

use crate::{
    app_context::AppState, cli::Command, config::ConfigManager, error::BacklightError,
    level::BacklightLevel,
};

pub async fn get(state: &AppState) -> Result<BacklightLevel, BacklightError> {
    state.engine.current_level().await
}

/// Persists (unless auto owns the preference) and applies `level`.
pub async fn set(state: &AppState, level: BacklightLevel) -> Result<(), BacklightError> {
    state.engine.select_level(level).await
}

/// Returns whether the hardware had to be written.
pub async fn reset(state: &AppState) -> Result<bool, BacklightError> {
    state.engine.reset_to_preferred().await
}

/// Validates the level argument of `set`; other commands carry none.
///
/// Callers run this before loading configuration or opening the device, so
/// a typo reports an invalid level even on machines without either.
pub fn requested_level(command: &Command) -> Result<Option<BacklightLevel>, BacklightError> {
    match command {
        Command::Set { level } => level.parse().map(Some),
        _ => Ok(None),
    }
}

/// Runs a one-shot command and prints its result.
pub async fn run_command(command: &Command, config_manager: ConfigManager) -> Result<()> {
    let requested = requested_level(command)?;

    let state = AppState::new(config_manager).await?;

    match (command, requested) {
        (Command::Get, _) => {
            let level = get(&state).await.context("Failed to read backlight level")?;
            println!("{}", u8::from(level));
        }
        (Command::Set { .. }, Some(level)) => {
            set(&state, level)
                .await
                .with_context(|| format!("Failed to set backlight to {level}"))?;
            info!("Backlight set to {level}");
        }
        (Command::Reset, _) => {
            let wrote = reset(&state)
                .await
                .context("Failed to restore preferred backlight level")?;
            let preferred = state.engine.preferred_level().await;
            info!(
                "Preferred level {preferred} {}",
                if wrote { "restored" } else { "already applied" }
            );
        }
        (other, _) => info!("Nothing to do for {other:?}"),
    }

    state.engine.shutdown();
    Ok(())
}
