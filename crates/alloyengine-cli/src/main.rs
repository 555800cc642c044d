//! alloyengine-host: runs the Alloy engine under supervision until a signal
//! arrives or the engine exits on its own

mod logging;
mod signals;

use std::path::PathBuf;
use std::process::ExitCode;

use alloyengine_supervisor::{EngineSettings, ExitClass, ExitReport, Supervisor};
use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "alloyengine-host")]
#[command(about = "Run the Alloy engine as a supervised child process", version)]
struct Cli {
    /// Settings file (TOML); ALLOYENGINE_* variables override it
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Engine configuration file passed to `alloy run`
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra engine flag, repeatable
    #[arg(short, long = "flag", value_name = "KEY=VALUE", value_parser = parse_flag)]
    flags: Vec<(String, String)>,

    /// Log level or filter directives (defaults to RUST_LOG, then info)
    #[arg(long)]
    log_level: Option<String>,

    /// Include targets, thread ids and source locations in log lines
    #[arg(short, long)]
    verbose: bool,
}

fn parse_flag(raw: &str) -> Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected KEY=VALUE, got {raw:?}");
    };
    let key = key.trim_start_matches("--");
    if key.is_empty() {
        bail!("flag name must not be empty");
    }
    Ok((key.to_string(), value.to_string()))
}

fn load_settings(cli: &Cli) -> Result<EngineSettings> {
    let mut settings =
        EngineSettings::load(cli.settings.as_deref()).context("failed to load settings")?;

    if let Some(config) = &cli.config {
        settings.config_path = config.clone();
    }
    for (key, value) in &cli.flags {
        settings.flags.insert(key.clone(), value.clone());
    }

    settings.validate()?;
    Ok(settings)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = load_settings(&cli)?;
    let shutdown_timeout = settings.shutdown_timeout_duration();

    let supervisor = Supervisor::builder(settings)
        .build()
        .context("failed to prepare engine")?;
    supervisor.start().await.context("failed to start engine")?;

    tokio::select! {
        signal = signals::wait_for_shutdown_signal() => {
            let signal = signal.context("failed to listen for signals")?;
            info!(signal, "Received termination signal");
        }
        _ = supervisor.wait_terminated() => {
            warn!("Engine terminated on its own");
        }
    }

    let status = supervisor.shutdown(shutdown_timeout).await;
    if status.is_interrupted() {
        warn!(status = %status, "Engine did not stop within the shutdown timeout");
    } else {
        info!(status = %status, "Shutdown finished");
    }

    let last_exit = supervisor.last_exit();
    if let Some(report) = last_exit.as_ref().filter(|r| r.class.is_alert()) {
        error!(
            class = %report.class,
            error = report.error.as_deref().unwrap_or_default(),
            "Engine terminated unexpectedly"
        );
    }
    if exit_failed(last_exit.as_ref()) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Only an unexpected engine termination fails the host
fn exit_failed(last_exit: Option<&ExitReport>) -> bool {
    last_exit.is_some_and(|report| report.class == ExitClass::UnexpectedTermination)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_level.as_deref(), cli.verbose) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
