use std::{fs::File, process::ExitCode, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, error};
use syslog::{BasicLogger, Facility, Formatter3164};

use kb_backlightd::{
    application::Application,
    cli::{Cli, Command},
    config::ConfigManager,
    error::BacklightError,
    ops,
};

const DAEMON_LOG: &str = "/var/tmp/kb_backlightd.log";

fn init_syslog() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "kb_backlightd".into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(LevelFilter::Info))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn init_env_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn into_daemon() -> Result<()> {
    File::create(DAEMON_LOG)
        .and_then(|out| Ok((out.try_clone()?, out)))
        .with_context(|| format!("Failed to create {DAEMON_LOG}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

async fn run(cli: Cli) -> Result<()> {
    let command = cli.command();
    ops::requested_level(&command)?;
    let config_manager = ConfigManager::load(cli.config.clone()).await?;

    match command {
        Command::Run => {
            Application::builder()
                .with_config_manager(config_manager)
                .build()?
                .run()
                .await
        }
        command => ops::run_command(&command, config_manager).await,
    }
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BacklightError>())
        .map_or(ExitCode::FAILURE, BacklightError::exit_code)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let daemon = cli.daemonize && cli.command() == Command::Run;
    if daemon {
        if let Err(e) = init_syslog().and_then(|()| into_daemon()) {
            eprintln!("kb_backlightd: {e:#}");
            return ExitCode::FAILURE;
        }
    } else {
        init_env_logger();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // Blocking reads on input devices never finish on their own.
    runtime.shutdown_timeout(Duration::from_secs(1));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            exit_code_for(&e)
        }
    }
}
