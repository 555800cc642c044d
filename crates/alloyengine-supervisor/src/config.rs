//! Engine settings

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};

/// Environment prefix for settings overrides (`ALLOYENGINE_CONFIG_PATH`, ...)
pub const ENV_PREFIX: &str = "ALLOYENGINE";

const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_TERMINATION_GRACE_MS: u64 = 5_000;

/// Settings for running the engine under supervision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Engine configuration file handed to `run`
    pub config_path: PathBuf,
    /// Extra `--key=value` flags
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
    /// Environment variables added to the inherited environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// How long the host waits for shutdown, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// SIGTERM to SIGKILL escalation delay, in milliseconds
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

fn default_termination_grace_ms() -> u64 {
    DEFAULT_TERMINATION_GRACE_MS
}

impl EngineSettings {
    /// Create settings for the given engine config file
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            flags: BTreeMap::new(),
            env: BTreeMap::new(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            termination_grace_ms: DEFAULT_TERMINATION_GRACE_MS,
        }
    }

    /// Load settings from an optional TOML file overlaid with `ALLOYENGINE_*` variables
    ///
    /// A missing `config_path` is not an error here; [`validate`](Self::validate)
    /// reports it.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("config_path", "")
            .map_err(to_config_error)?;

        if let Some(path) = file {
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(to_config_error)?;

        settings.try_deserialize().map_err(to_config_error)
    }

    /// Add an engine flag
    pub fn flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(key.into(), value.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the host shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the termination grace period
    pub fn termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace_ms = duration_ms(grace);
        self
    }

    /// Host shutdown timeout
    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Termination grace period
    pub fn termination_grace_duration(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// Engine arguments: `run <config_path> --key=value...`, flags sorted by key
    pub fn command_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(2 + self.flags.len());
        args.push("run".to_string());
        args.push(self.config_path.display().to_string());
        args.extend(self.flags.iter().map(|(k, v)| format!("--{k}={v}")));
        args
    }

    /// Check settings before building a supervisor
    pub fn validate(&self) -> Result<()> {
        if self.config_path.as_os_str().is_empty() {
            return Err(SupervisorError::Configuration(
                "config_path must not be empty".to_string(),
            ));
        }

        if let Some(key) = self.flags.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(SupervisorError::Configuration(format!(
                "invalid flag name {key:?}"
            )));
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(SupervisorError::Configuration(
                "shutdown_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn to_config_error(err: config::ConfigError) -> SupervisorError {
    SupervisorError::Configuration(err.to_string())
}
