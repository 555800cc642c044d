//! Shutdown coordination

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::{
    config::duration_ms,
    error::TransitionError,
    state::LifecycleState,
    supervisor::Supervisor,
};

/// Outcome of [`Supervisor::shutdown`]
///
/// Every variant is a success from the host's point of view.
/// [`Interrupted`](ShutdownStatus::Interrupted) only means the caller stopped
/// waiting; the engine may still be exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// Nothing was ever started
    NotStarted,
    /// Engine had already terminated before the call
    AlreadyTerminated,
    /// Termination was observed within the timeout
    Completed,
    /// Timeout elapsed before termination was observed
    Interrupted { timeout: Duration },
}

impl ShutdownStatus {
    /// Whether the caller gave up waiting
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ShutdownStatus::Interrupted { .. })
    }

    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            ShutdownStatus::NotStarted => "not_started",
            ShutdownStatus::AlreadyTerminated => "already_terminated",
            ShutdownStatus::Completed => "completed",
            ShutdownStatus::Interrupted { .. } => "interrupted",
        }
    }
}

impl fmt::Display for ShutdownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl Supervisor {
    /// Request engine termination and wait for it, at most `timeout`
    ///
    /// Only the caller that moves the state from `Running` to `ShuttingDown`
    /// cancels the process; concurrent callers just wait on the same
    /// completion signal.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownStatus {
        let requested = self.machine.try_transition_with(
            &[LifecycleState::Running],
            LifecycleState::ShuttingDown,
            |_, slot| Ok::<_, TransitionError>((slot.handle.clone(), slot.exited.clone())),
        );

        let exited = match requested {
            Ok((_, (handle, exited))) => {
                info!(parent: &self.span, "alloyengine extension shutting down");
                if let Some(handle) = handle {
                    handle.cancel();
                }
                exited
            }
            Err(err) => match err.current {
                LifecycleState::NotStarted => {
                    info!(parent: &self.span, "alloyengine extension shutdown completed (not started)");
                    return ShutdownStatus::NotStarted;
                }
                LifecycleState::Terminated => {
                    info!(parent: &self.span, "alloyengine extension already terminated");
                    return ShutdownStatus::AlreadyTerminated;
                }
                // Another caller already cancelled; share its wait
                LifecycleState::ShuttingDown | LifecycleState::Running => {
                    self.machine.read(|_, slot| slot.exited.clone())
                }
            },
        };

        let Some(exited) = exited else {
            return ShutdownStatus::AlreadyTerminated;
        };

        match tokio::time::timeout(timeout, exited.cancelled()).await {
            Ok(()) => {
                info!(parent: &self.span, "alloyengine extension shut down successfully");
                ShutdownStatus::Completed
            }
            Err(_) => {
                warn!(
                    parent: &self.span,
                    timeout_ms = duration_ms(timeout),
                    state = %self.machine.current(),
                    "alloyengine extension shutdown interrupted by timeout"
                );
                ShutdownStatus::Interrupted { timeout }
            }
        }
    }
}
