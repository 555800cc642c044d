//! Child process handle with cooperative cancellation

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::duration_ms,
    error::{ProcessError, ProcessResult},
    runner::ProcessHandle,
};

/// Wrapper around `tokio::process::Child` bound to a cancellation token
pub struct ChildHandle {
    /// Underlying tokio child process; only the waiter locks it
    child: Mutex<Child>,
    /// Process ID captured at spawn time
    pid: Option<u32>,
    /// Fired by `cancel`, observed by `wait`
    cancel: CancellationToken,
    /// Time allowed between SIGTERM and SIGKILL
    termination_grace: Duration,
}

impl ChildHandle {
    pub(crate) fn new(child: Child, termination_grace: Duration) -> Self {
        let pid = child.id();
        Self {
            child: Mutex::new(child),
            pid,
            cancel: CancellationToken::new(),
            termination_grace,
        }
    }

    /// Ask the process to stop, then kill it if it outlives the grace period
    async fn terminate(&self, child: &mut Child) -> io::Result<ExitStatus> {
        debug!(pid = ?self.pid, "Requesting engine process termination");

        if let Err(e) = request_stop(child) {
            warn!(pid = ?self.pid, error = %e, "Failed to request termination");
        }

        match tokio::time::timeout(self.termination_grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    pid = ?self.pid,
                    grace_ms = duration_ms(self.termination_grace),
                    "Engine process did not honor cancellation, killing"
                );
                if let Err(e) = child.start_kill() {
                    warn!(pid = ?self.pid, error = %e, "Failed to kill process");
                }
                child.wait().await
            }
        }
    }
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&self) -> ProcessResult<()> {
        let mut child = self.child.lock().await;

        let status = tokio::select! {
            status = child.wait() => status,
            _ = self.cancel.cancelled() => self.terminate(&mut child).await,
        };

        exit_result(status.map_err(ProcessError::WaitFailed)?)
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) -> ProcessResult<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // None means the child was already reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| ProcessError::KillFailed(e.to_string()))
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> ProcessResult<()> {
    child
        .start_kill()
        .map_err(|e| ProcessError::KillFailed(e.to_string()))
}

/// Map an exit status to the runner's outcome
pub(crate) fn exit_result(status: ExitStatus) -> ProcessResult<()> {
    if status.success() {
        return Ok(());
    }

    if let Some(code) = status.code() {
        return Err(ProcessError::Exited { code });
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return Err(ProcessError::Signaled { signal });
        }
    }

    Err(ProcessError::Exited { code: -1 })
}
