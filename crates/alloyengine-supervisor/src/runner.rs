//! Process runner - launches the engine under a cancellable handle

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    child::ChildHandle,
    error::{ProcessError, ProcessResult},
};

/// Program, arguments and extra environment for one engine launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Resolved engine binary
    pub program: PathBuf,
    /// Arguments, passed through untouched
    pub args: Vec<String>,
    /// Variables layered over the inherited environment
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Create a spec with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Set command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Handle to one running engine process
///
/// `wait` is called by exactly one task (the exit monitor); `cancel` may be
/// called from any thread and must not block.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if known
    fn pid(&self) -> Option<u32>;

    /// Wait until the process exits, naturally or because of [`cancel`](Self::cancel)
    ///
    /// Returns `Ok(())` for a zero exit status.
    async fn wait(&self) -> ProcessResult<()>;

    /// Request termination without waiting for it
    fn cancel(&self);
}

/// Launches engine processes
pub trait ProcessRunner: Send + Sync {
    /// Spawn the process described by `spec`
    ///
    /// Spawn failures are reported synchronously.
    ///
    /// Called while the supervisor's state lock is held, so readiness probes
    /// wait for it to return. Implementations must only launch the process:
    /// no blocking on its output and no calls back into the supervisor, which
    /// would deadlock on the same lock.
    fn start(&self, spec: &CommandSpec) -> ProcessResult<Arc<dyn ProcessHandle>>;
}

/// Runner backed by `tokio::process` with inherited stdio
#[derive(Debug, Clone)]
pub struct CommandRunner {
    /// Time between the polite stop request and the hard kill
    termination_grace: Duration,
}

impl CommandRunner {
    /// Create a runner with the given termination grace period
    pub fn new(termination_grace: Duration) -> Self {
        Self { termination_grace }
    }

    /// Grace period between SIGTERM and SIGKILL
    pub fn termination_grace(&self) -> Duration {
        self.termination_grace
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessRunner for CommandRunner {
    fn start(&self, spec: &CommandSpec) -> ProcessResult<Arc<dyn ProcessHandle>> {
        debug!(
            program = %spec.program.display(),
            args = ?spec.args,
            "Spawning engine process"
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            command: spec.program.display().to_string(),
            source,
        })?;

        info!(
            pid = ?child.id(),
            program = %spec.program.display(),
            "Engine process spawned"
        );

        Ok(Arc::new(ChildHandle::new(child, self.termination_grace)))
    }
}
