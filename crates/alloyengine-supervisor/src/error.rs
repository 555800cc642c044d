//! Error types for engine supervision

use std::io;

use thiserror::Error;

use crate::state::LifecycleState;

/// Errors raised while launching or waiting on the engine process
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Failed to spawn process
    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Process exited with a non-zero status code
    #[error("Process exited with code {code}")]
    Exited { code: i32 },

    /// Process was terminated by a signal
    #[error("Process terminated by signal {signal}")]
    Signaled { signal: i32 },

    /// Waiting on the process failed
    #[error("Failed to wait for process: {0}")]
    WaitFailed(#[source] io::Error),

    /// Failed to deliver a termination request
    #[error("Failed to kill process: {0}")]
    KillFailed(String),
}

/// Result type for process operations
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// A lifecycle transition was attempted from a state that does not allow it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move to {to} from {current} (allowed from: {})", join_states(.expected))]
pub struct TransitionError {
    /// State observed when the transition was attempted
    pub current: LifecycleState,
    /// States the caller accepted as a starting point
    pub expected: Vec<LifecycleState>,
    /// Requested target state
    pub to: LifecycleState,
}

fn join_states(states: &[LifecycleState]) -> String {
    states
        .iter()
        .map(LifecycleState::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Supervisor errors surfaced to the host
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Bad binary path or invalid settings
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Caller violated the lifecycle contract (e.g. a second start)
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// The operating system refused to launch the engine
    #[error(transparent)]
    Spawn(#[from] ProcessError),

    /// Readiness probe outside of the running state
    #[error("alloyengine extension not ready in current state: {state}")]
    NotReady { state: LifecycleState },

    /// Raw value outside of the lifecycle enumeration
    #[error("unknown lifecycle state value: {0}")]
    UnknownState(u8),
}

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;
