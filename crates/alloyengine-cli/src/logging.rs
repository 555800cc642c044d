//! Logging setup for the host binary

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "info";

/// Build the filter: an explicit level wins over `RUST_LOG`, which wins over `info`
pub fn build_filter(level: Option<&str>) -> Result<EnvFilter> {
    match level {
        Some(level) => EnvFilter::try_new(level.to_lowercase())
            .with_context(|| format!("invalid log level: {level}")),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))),
    }
}

/// Install the global subscriber writing to stderr
pub fn init(level: Option<&str>, verbose: bool) -> Result<()> {
    let filter = build_filter(level)?;

    fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_thread_ids(verbose)
        .with_file(verbose)
        .with_line_number(verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}
