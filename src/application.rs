//! Daemon entry point and builder.

use crate::{config::ConfigManager, coordinator::SystemCoordinator};
use anyhow::{Result, anyhow};

/// The `run` command: initialize, start services, loop until shutdown.
///
/// # Example
///
/// ```no_run
/// use kb_backlightd::application::Application;
/// use kb_backlightd::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None).await?;
/// let mut app = Application::builder()
///     .with_config_manager(config_manager)
///     .build()?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
    config_manager: ConfigManager,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub async fn run(&mut self) -> Result<()> {
        self.coordinator
            .initialize(self.config_manager.clone())
            .await?;

        self.coordinator.start_all_services().await?;

        self.coordinator.run_main_loop().await
    }
}

pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
        }
    }

    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    pub fn build(self) -> Result<Application> {
        let config_manager = self
            .config_manager
            .ok_or_else(|| anyhow!("Configuration manager is required"))?;

        Ok(Application {
            coordinator: SystemCoordinator::new(),
            config_manager,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;

    #[test]
    fn build_requires_config_manager() {
        assert!(Application::builder().build().is_err());
    }

    #[test]
    fn build_starts_with_no_services() {
        let manager = ConfigManager::new(Config::default(), PathBuf::from("/tmp/unused.yml"));
        let app = Application::builder()
            .with_config_manager(manager)
            .build()
            .unwrap();
        assert!(app.coordinator.running_services().is_empty());
    }
}
