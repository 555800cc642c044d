//! Supervisor - owns one engine process from start to termination
//!
//! ```text
//! host ── start() ──► StateMachine (NotStarted → Running, publish handle)
//!                          │
//!                          └──► ExitMonitor::spawn ── handle.wait() ──┐
//!                                                                    ▼
//! host ── shutdown() ─► (Running → ShuttingDown) ─► handle.cancel()  commit Terminated
//!                          │                                          │
//!                          └──── wait(completion signal | timeout) ◄──┘ fire signal
//!
//! host ── ready() / not_ready() ─► snapshot read
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Span};

use crate::{
    config::EngineSettings,
    error::{Result, SupervisorError},
    monitor::{ExitMonitor, ExitReport},
    resolver::{BinaryResolver, DefaultResolver},
    runner::{CommandRunner, CommandSpec, ProcessRunner},
    state::{LifecycleState, StateMachine},
};

/// Lifecycle supervisor for a single engine process
pub struct Supervisor {
    pub(crate) machine: Arc<StateMachine>,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    pub(crate) command: CommandSpec,
    /// Telemetry sink; every lifecycle event is parented to it
    pub(crate) span: Span,
}

impl Supervisor {
    /// Create a supervisor for an already resolved command
    pub fn new(command: CommandSpec, runner: Arc<dyn ProcessRunner>, span: Span) -> Self {
        Self {
            machine: Arc::new(StateMachine::new()),
            runner,
            command,
            span,
        }
    }

    /// Start building a supervisor from settings
    pub fn builder(settings: EngineSettings) -> SupervisorBuilder {
        SupervisorBuilder::new(settings)
    }

    /// Spawn the engine and its exit monitor
    ///
    /// Succeeds only from [`LifecycleState::NotStarted`]. A spawn failure leaves
    /// the supervisor in `NotStarted` so the call can be retried. The spawn runs
    /// inside the state lock; see [`ProcessRunner::start`].
    pub async fn start(&self) -> Result<()> {
        let started = self.machine.try_transition_with(
            &[LifecycleState::NotStarted],
            LifecycleState::Running,
            |_, slot| {
                let handle = self.runner.start(&self.command)?;
                let exited = CancellationToken::new();
                slot.handle = Some(Arc::clone(&handle));
                slot.exited = Some(exited.clone());
                Ok::<_, SupervisorError>((handle, exited))
            },
        );

        let (handle, exited) = match started {
            Ok((_, started)) => started,
            Err(err) => {
                match &err {
                    SupervisorError::Spawn(_) => {
                        error!(parent: &self.span, error = %err, "Failed to start alloyengine extension")
                    }
                    _ => {
                        warn!(parent: &self.span, error = %err, "Cannot start alloyengine extension in current state")
                    }
                }
                return Err(err);
            }
        };

        let pid = handle.pid();
        ExitMonitor::new(Arc::clone(&self.machine), handle, exited).spawn(self.span.clone());

        info!(
            parent: &self.span,
            pid = ?pid,
            program = %self.command.program.display(),
            "alloyengine extension started successfully"
        );
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.machine.current()
    }

    /// Outcome of the engine run, once terminated
    pub fn last_exit(&self) -> Option<ExitReport> {
        self.machine.read(|_, slot| slot.last_exit.clone())
    }

    /// Wait until the exit monitor has recorded termination
    ///
    /// Returns `None` right away if the engine was never started.
    pub async fn wait_terminated(&self) -> Option<ExitReport> {
        let exited = self.machine.read(|_, slot| slot.exited.clone())?;
        exited.cancelled().await;
        self.last_exit()
    }

    /// Command this supervisor launches
    pub fn command(&self) -> &CommandSpec {
        &self.command
    }
}

/// Builder resolving the engine binary and arguments from [`EngineSettings`]
pub struct SupervisorBuilder {
    settings: EngineSettings,
    resolver: Option<Box<dyn BinaryResolver>>,
    runner: Option<Arc<dyn ProcessRunner>>,
    span: Option<Span>,
}

impl SupervisorBuilder {
    fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            resolver: None,
            runner: None,
            span: None,
        }
    }

    /// Use a custom binary resolver (default: [`DefaultResolver`])
    pub fn resolver(mut self, resolver: impl BinaryResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Use a custom process runner (default: [`CommandRunner`])
    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Parent span for lifecycle events (default: `alloyengine`)
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate settings, resolve the binary and build the supervisor
    pub fn build(self) -> Result<Supervisor> {
        self.settings.validate()?;

        let resolver = self
            .resolver
            .unwrap_or_else(|| Box::new(DefaultResolver::new()));
        let program = resolver.resolve()?;

        let runner = self.runner.unwrap_or_else(|| {
            Arc::new(CommandRunner::new(self.settings.termination_grace_duration()))
        });

        let command = CommandSpec {
            program,
            args: self.settings.command_args(),
            env: self.settings.env.clone(),
        };
        let span = self
            .span
            .unwrap_or_else(|| info_span!("alloyengine", config = %self.settings.config_path.display()));

        Ok(Supervisor::new(command, runner, span))
    }
}
