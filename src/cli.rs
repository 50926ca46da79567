use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// kb_backlightd: keeps the keyboard backlight where the user wants it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: search KB_BACKLIGHTD_CONFIG, ~/.config, /etc)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Detach and log to syslog (only for `run`)
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the daemon (default)
    Run,
    /// Print the current hardware level
    Get,
    /// Select a level (0/off, 1/low, 2/high) and remember it
    Set {
        #[arg(value_name = "LEVEL")]
        level: String,
    },
    /// Re-apply the remembered level
    Reset,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
