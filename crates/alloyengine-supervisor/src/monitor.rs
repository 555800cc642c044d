//! Exit monitor: the single path to [`LifecycleState::Terminated`]
//!
//! One monitor task runs per engine process. It blocks on the handle's wait,
//! commits the terminal transition, classifies the outcome and then fires
//! the completion signal. The signal always fires after the transition has
//! been committed, so anyone woken by it observes `Terminated`.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument, Span};

use crate::{
    error::{ProcessResult, TransitionError},
    runner::ProcessHandle,
    state::{LifecycleState, StateMachine},
};

/// How an engine exit is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Zero exit status, requested or not
    CleanExit,
    /// Error exit after shutdown was requested; expected consequence of cancellation
    ExitDuringShutdown,
    /// Error exit while running; the only class that should drive alerting
    UnexpectedTermination,
}

impl ExitClass {
    /// Classify a wait outcome given the state held before termination
    pub fn classify<T>(outcome: &ProcessResult<T>, previous: LifecycleState) -> Self {
        match (outcome, previous) {
            (Ok(_), _) => ExitClass::CleanExit,
            (Err(_), LifecycleState::ShuttingDown) => ExitClass::ExitDuringShutdown,
            (Err(_), _) => ExitClass::UnexpectedTermination,
        }
    }

    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            ExitClass::CleanExit => "clean_exit",
            ExitClass::ExitDuringShutdown => "exit_during_shutdown",
            ExitClass::UnexpectedTermination => "unexpected_termination",
        }
    }

    /// Whether this exit should page someone
    pub fn is_alert(&self) -> bool {
        matches!(self, ExitClass::UnexpectedTermination)
    }
}

impl fmt::Display for ExitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Outcome recorded when the engine terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Classification of the exit
    pub class: ExitClass,
    /// State held right before `Terminated`
    pub previous: LifecycleState,
    /// Error description, `None` for a clean exit
    pub error: Option<String>,
}

impl ExitReport {
    fn new<T>(outcome: &ProcessResult<T>, previous: LifecycleState) -> Self {
        Self {
            class: ExitClass::classify(outcome, previous),
            previous,
            error: outcome.as_ref().err().map(ToString::to_string),
        }
    }
}

/// Background watcher for one engine process
pub(crate) struct ExitMonitor {
    machine: Arc<StateMachine>,
    handle: Arc<dyn ProcessHandle>,
    exited: CancellationToken,
}

impl ExitMonitor {
    pub(crate) fn new(
        machine: Arc<StateMachine>,
        handle: Arc<dyn ProcessHandle>,
        exited: CancellationToken,
    ) -> Self {
        Self {
            machine,
            handle,
            exited,
        }
    }

    /// Spawn the monitor on the current runtime, logging under `span`
    pub(crate) fn spawn(self, span: Span) -> JoinHandle<ExitReport> {
        tokio::spawn(self.run().instrument(span))
    }

    async fn run(self) -> ExitReport {
        let outcome = self.handle.wait().await;
        let report = self.finish(&outcome);

        match report.class {
            ExitClass::CleanExit => {
                info!(pid = ?self.handle.pid(), "Engine process exited without error");
            }
            ExitClass::ExitDuringShutdown => {
                warn!(
                    pid = ?self.handle.pid(),
                    error = report.error.as_deref().unwrap_or_default(),
                    "Engine process exited with an error during shutdown"
                );
            }
            ExitClass::UnexpectedTermination => {
                error!(
                    pid = ?self.handle.pid(),
                    error = report.error.as_deref().unwrap_or_default(),
                    "Engine process exited unexpectedly with an error"
                );
            }
        }

        self.exited.cancel();
        report
    }

    /// Commit `Terminated`, releasing the handle and recording the report
    fn finish(&self, outcome: &ProcessResult<()>) -> ExitReport {
        let committed = self.machine.try_transition_with(
            &[LifecycleState::Running, LifecycleState::ShuttingDown],
            LifecycleState::Terminated,
            |previous, slot| {
                let report = ExitReport::new(outcome, previous);
                slot.handle = None;
                slot.last_exit = Some(report.clone());
                Ok::<_, TransitionError>(report)
            },
        );

        match committed {
            Ok((_, report)) => report,
            Err(err) => {
                // Only reachable if something else moved the state to Terminated
                error!(error = %err, "Exit monitor could not record termination");
                ExitReport::new(outcome, err.current)
            }
        }
    }
}
