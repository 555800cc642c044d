//! Lifecycle state and guarded transitions
//!
//! The supervisor keeps one [`LifecycleState`] behind a single lock together
//! with the fields whose presence depends on it (the live process handle, the
//! completion signal and the last exit report). Every mutation goes through
//! [`StateMachine::try_transition`] or its closure form, which reads, checks
//! and writes inside one critical section.
//!
//! ```text
//! NotStarted ──► Running ──► ShuttingDown ──► Terminated
//!                   │                              ▲
//!                   └──────────────────────────────┘
//!                        (unrequested exit)
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{SupervisorError, TransitionError};
use crate::monitor::ExitReport;
use crate::runner::ProcessHandle;

/// Lifecycle of the supervised engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Nothing has been spawned yet
    NotStarted = 0,
    /// Engine process is under supervision
    Running = 1,
    /// Cancellation was requested and the exit has not been observed yet
    ShuttingDown = 2,
    /// Exit observed; absorbing
    Terminated = 3,
}

impl LifecycleState {
    /// All states in discriminant order
    pub const ALL: [LifecycleState; 4] = [
        LifecycleState::NotStarted,
        LifecycleState::Running,
        LifecycleState::ShuttingDown,
        LifecycleState::Terminated,
    ];

    /// Stable diagnostic name
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::NotStarted => "not_started",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Terminated => "terminated",
        }
    }

    /// Check whether `self -> to` is one of the legal edges
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        matches!(
            (self, to),
            (LifecycleState::NotStarted, LifecycleState::Running)
                | (LifecycleState::Running, LifecycleState::ShuttingDown)
                | (LifecycleState::Running, LifecycleState::Terminated)
                | (LifecycleState::ShuttingDown, LifecycleState::Terminated)
        )
    }

    /// Check if the state has no outgoing edges
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Terminated
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for LifecycleState {
    type Error = SupervisorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        LifecycleState::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(SupervisorError::UnknownState(value))
    }
}

/// Fields whose validity is tied to the lifecycle state
#[derive(Default)]
pub(crate) struct Slot {
    /// Live process handle; present iff Running or ShuttingDown
    pub(crate) handle: Option<Arc<dyn ProcessHandle>>,
    /// Completion signal created at start, fired once by the exit monitor
    pub(crate) exited: Option<CancellationToken>,
    /// Outcome recorded together with the Terminated transition
    pub(crate) last_exit: Option<ExitReport>,
}

struct Guarded {
    state: LifecycleState,
    slot: Slot,
}

/// Lifecycle state guarded by a single lock
pub struct StateMachine {
    inner: Mutex<Guarded>,
}

impl StateMachine {
    /// Create a state machine in [`LifecycleState::NotStarted`]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Guarded {
                state: LifecycleState::NotStarted,
                slot: Slot::default(),
            }),
        }
    }

    /// Snapshot of the current state
    pub fn current(&self) -> LifecycleState {
        self.inner.lock().state
    }

    /// Move to `to` if the current state is in `from`, returning the previous state
    ///
    /// Fails with [`TransitionError`] when the current state is not listed or
    /// when the edge is not part of the lifecycle graph.
    pub fn try_transition(
        &self,
        from: &[LifecycleState],
        to: LifecycleState,
    ) -> Result<LifecycleState, TransitionError> {
        self.try_transition_with(from, to, |_, _| Ok::<_, TransitionError>(()))
            .map(|(previous, ())| previous)
    }

    /// Same as [`try_transition`](Self::try_transition), running `f` inside the
    /// critical section
    ///
    /// The new state is committed only if `f` succeeds, so a failing `f`
    /// leaves both the state and the slot as `f` left them.
    pub(crate) fn try_transition_with<R, E, F>(
        &self,
        from: &[LifecycleState],
        to: LifecycleState,
        f: F,
    ) -> Result<(LifecycleState, R), E>
    where
        E: From<TransitionError>,
        F: FnOnce(LifecycleState, &mut Slot) -> Result<R, E>,
    {
        let mut guard = self.inner.lock();
        let current = guard.state;

        if !from.contains(&current) || !current.can_transition_to(to) {
            return Err(TransitionError {
                current,
                expected: from.to_vec(),
                to,
            }
            .into());
        }

        let out = f(current, &mut guard.slot)?;
        guard.state = to;
        Ok((current, out))
    }

    /// Read the state and slot under the lock
    pub(crate) fn read<R>(&self, f: impl FnOnce(LifecycleState, &Slot) -> R) -> R {
        let guard = self.inner.lock();
        f(guard.state, &guard.slot)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.current())
            .finish()
    }
}
