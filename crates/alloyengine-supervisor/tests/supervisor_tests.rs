//! Lifecycle tests for the supervisor against a scripted process runner

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloyengine_supervisor::{
    CommandSpec, ExitClass, Extension, LifecycleState, ProcessError, ProcessHandle,
    ProcessResult, ProcessRunner, ShutdownStatus, Supervisor, SupervisorError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Event, Level, Span, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// How a scripted process behaves
#[derive(Debug, Clone)]
struct Script {
    /// Natural exit after this long; `None` runs until cancelled
    exit_after: Option<Duration>,
    /// Exit code for the natural exit
    exit_code: i32,
    /// Time between cancel and exit
    cancel_delay: Duration,
}

impl Script {
    fn runs_until_cancelled() -> Self {
        Self {
            exit_after: None,
            exit_code: 0,
            cancel_delay: Duration::from_millis(20),
        }
    }

    fn exits_after(after: Duration, code: i32) -> Self {
        Self {
            exit_after: Some(after),
            exit_code: code,
            cancel_delay: Duration::from_millis(20),
        }
    }

    fn cancel_delay(mut self, delay: Duration) -> Self {
        self.cancel_delay = delay;
        self
    }
}

struct ScriptedHandle {
    script: Script,
    cancel: CancellationToken,
    cancels: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessHandle for ScriptedHandle {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&self) -> ProcessResult<()> {
        let natural = async {
            match self.script.exit_after {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = natural => match self.script.exit_code {
                0 => Ok(()),
                code => Err(ProcessError::Exited { code }),
            },
            _ = self.cancel.cancelled() => {
                tokio::time::sleep(self.script.cancel_delay).await;
                Err(ProcessError::Signaled { signal: 15 })
            }
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

struct ScriptedRunner {
    script: Script,
    spawns: AtomicUsize,
    cancels: Arc<AtomicUsize>,
    fail_next: AtomicBool,
    /// Time `start` blocks before returning the handle
    spawn_delay: Duration,
    spawning: AtomicBool,
}

impl ScriptedRunner {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            spawns: AtomicUsize::new(0),
            cancels: Arc::new(AtomicUsize::new(0)),
            fail_next: AtomicBool::new(false),
            spawn_delay: Duration::ZERO,
            spawning: AtomicBool::new(false),
        })
    }

    fn slow_spawn(script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            spawns: AtomicUsize::new(0),
            cancels: Arc::new(AtomicUsize::new(0)),
            fail_next: AtomicBool::new(false),
            spawn_delay: delay,
            spawning: AtomicBool::new(false),
        })
    }

    fn failing_once(script: Script) -> Arc<Self> {
        let runner = Self::new(script);
        runner.fail_next.store(true, Ordering::SeqCst);
        runner
    }

    fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl ProcessRunner for ScriptedRunner {
    fn start(&self, spec: &CommandSpec) -> ProcessResult<Arc<dyn ProcessHandle>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ProcessError::SpawnFailed {
                command: spec.program.display().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
            });
        }

        self.spawning.store(true, Ordering::SeqCst);
        if !self.spawn_delay.is_zero() {
            std::thread::sleep(self.spawn_delay);
        }

        self.spawns.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedHandle {
            script: self.script.clone(),
            cancel: CancellationToken::new(),
            cancels: Arc::clone(&self.cancels),
        }))
    }
}

fn supervisor(runner: &Arc<ScriptedRunner>) -> Supervisor {
    Supervisor::new(
        CommandSpec::new("/opt/alloy/alloy").args(["run", "config.alloy"]),
        Arc::clone(runner) as Arc<dyn ProcessRunner>,
        Span::none(),
    )
}

#[tokio::test]
async fn test_shutdown_before_start_spawns_nothing() {
    let runner = ScriptedRunner::new(Script::runs_until_cancelled());
    let supervisor = supervisor(&runner);

    let status = supervisor.shutdown(Duration::from_secs(1)).await;

    assert_eq!(status, ShutdownStatus::NotStarted);
    assert_eq!(supervisor.state(), LifecycleState::NotStarted);
    assert_eq!(runner.spawns(), 0);
    assert!(supervisor.wait_terminated().await.is_none());
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let runner = ScriptedRunner::new(Script::runs_until_cancelled());
    let supervisor = supervisor(&runner);

    supervisor.start().await.unwrap();
    let err = supervisor.start().await.unwrap_err();

    match err {
        SupervisorError::InvalidTransition(err) => {
            assert_eq!(err.current, LifecycleState::Running);
            assert_eq!(err.expected, vec![LifecycleState::NotStarted]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(runner.spawns(), 1);

    supervisor.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_concurrent_shutdowns_cancel_once() {
    let runner = ScriptedRunner::new(Script::runs_until_cancelled());
    let supervisor = Arc::new(supervisor(&runner));
    supervisor.start().await.unwrap();

    let first = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.shutdown(Duration::from_secs(2)).await })
    };
    let second = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.shutdown(Duration::from_secs(2)).await })
    };

    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    assert_eq!(first, ShutdownStatus::Completed);
    assert_eq!(second, ShutdownStatus::Completed);
    assert_eq!(runner.cancels(), 1);
    assert_eq!(supervisor.state(), LifecycleState::Terminated);
}

#[tokio::test]
async fn test_clean_exit_without_shutdown() {
    let runner = ScriptedRunner::new(Script::exits_after(Duration::from_millis(50), 0));
    let supervisor = supervisor(&runner);
    supervisor.start().await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(2), supervisor.wait_terminated())
        .await
        .expect("engine should terminate")
        .expect("engine was started");

    assert_eq!(report.class, ExitClass::CleanExit);
    assert_eq!(report.previous, LifecycleState::Running);
    assert!(report.error.is_none());
    assert_eq!(supervisor.state(), LifecycleState::Terminated);
    assert_eq!(runner.cancels(), 0);
}

#[tokio::test]
async fn test_crash_is_unexpected_termination() {
    let runner = ScriptedRunner::new(Script::exits_after(Duration::from_millis(10), 3));
    let supervisor = supervisor(&runner);
    supervisor.start().await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(2), supervisor.wait_terminated())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.class, ExitClass::UnexpectedTermination);
    assert!(report.class.is_alert());
    assert_eq!(report.error.as_deref(), Some("Process exited with code 3"));
    assert_eq!(supervisor.state(), LifecycleState::Terminated);
    assert_eq!(supervisor.last_exit(), Some(report));
}

#[tokio::test]
async fn test_exit_after_cancel_is_expected() {
    let runner = ScriptedRunner::new(Script::runs_until_cancelled());
    let supervisor = supervisor(&runner);
    supervisor.start().await.unwrap();

    let status = supervisor.shutdown(Duration::from_secs(2)).await;
    assert_eq!(status, ShutdownStatus::Completed);

    let report = supervisor.last_exit().unwrap();
    assert_eq!(report.class, ExitClass::ExitDuringShutdown);
    assert_eq!(report.previous, LifecycleState::ShuttingDown);
    assert!(!report.class.is_alert());
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_shutdown_still_terminates() {
    let script = Script::runs_until_cancelled().cancel_delay(Duration::from_secs(2));
    let runner = ScriptedRunner::new(script);
    let supervisor = supervisor(&runner);
    supervisor.start().await.unwrap();

    let started = tokio::time::Instant::now();
    let status = supervisor.shutdown(Duration::from_millis(10)).await;

    assert_eq!(
        status,
        ShutdownStatus::Interrupted {
            timeout: Duration::from_millis(10)
        }
    );
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(supervisor.state(), LifecycleState::ShuttingDown);

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(supervisor.state(), LifecycleState::Terminated);
    assert_eq!(runner.cancels(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_shutting_down_waits_without_cancel() {
    let script = Script::runs_until_cancelled().cancel_delay(Duration::from_secs(1));
    let runner = ScriptedRunner::new(script);
    let supervisor = supervisor(&runner);
    supervisor.start().await.unwrap();

    let first = supervisor.shutdown(Duration::from_millis(10)).await;
    assert!(first.is_interrupted());

    let second = supervisor.shutdown(Duration::from_secs(5)).await;
    assert_eq!(second, ShutdownStatus::Completed);
    assert_eq!(runner.cancels(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_follows_state() {
    let script = Script::runs_until_cancelled().cancel_delay(Duration::from_secs(1));
    let runner = ScriptedRunner::new(script);
    let supervisor = supervisor(&runner);

    assert!(matches!(
        supervisor.ready(),
        Err(SupervisorError::NotReady {
            state: LifecycleState::NotStarted
        })
    ));

    supervisor.start().await.unwrap();
    assert!(supervisor.ready().is_ok());
    assert!(supervisor.not_ready().is_ok());

    supervisor.shutdown(Duration::from_millis(10)).await;
    let err = supervisor.ready().unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::NotReady {
            state: LifecycleState::ShuttingDown
        }
    ));
    assert!(err.to_string().contains("shutting_down"));

    supervisor.wait_terminated().await;
    assert!(matches!(
        supervisor.not_ready(),
        Err(SupervisorError::NotReady {
            state: LifecycleState::Terminated
        })
    ));
}

#[tokio::test]
async fn test_terminated_is_absorbing() {
    let runner = ScriptedRunner::new(Script::exits_after(Duration::from_millis(5), 1));
    let supervisor = supervisor(&runner);
    supervisor.start().await.unwrap();
    supervisor.wait_terminated().await.unwrap();
    let report = supervisor.last_exit();

    assert!(matches!(
        supervisor.start().await,
        Err(SupervisorError::InvalidTransition(_))
    ));
    assert_eq!(
        supervisor.shutdown(Duration::from_secs(1)).await,
        ShutdownStatus::AlreadyTerminated
    );
    assert!(supervisor.ready().is_err());

    assert_eq!(supervisor.state(), LifecycleState::Terminated);
    assert_eq!(supervisor.last_exit(), report);
    assert_eq!(runner.spawns(), 1);
    assert_eq!(runner.cancels(), 0);
}

#[tokio::test]
async fn test_spawn_failure_allows_retry() {
    let runner = ScriptedRunner::failing_once(Script::runs_until_cancelled());
    let supervisor = supervisor(&runner);

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::Spawn(ProcessError::SpawnFailed { .. })
    ));
    assert_eq!(supervisor.state(), LifecycleState::NotStarted);
    assert_eq!(runner.spawns(), 0);

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), LifecycleState::Running);
    assert_eq!(runner.spawns(), 1);

    supervisor.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_driven_through_extension_trait() {
    let runner = ScriptedRunner::new(Script::runs_until_cancelled());
    let extension: Arc<dyn Extension> = Arc::new(supervisor(&runner));

    extension.start().await.unwrap();
    extension.ready().unwrap();

    let status = extension.shutdown(Duration::from_secs(1)).await;
    assert_eq!(status, ShutdownStatus::Completed);
    assert!(extension.ready().is_err());
    assert_eq!(runner.cancels(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_spawn_once() {
    let runner = ScriptedRunner::new(Script::runs_until_cancelled());
    let supervisor = Arc::new(supervisor(&runner));

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.start().await })
        })
        .collect();

    let mut started = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(()) => started += 1,
            Err(err) => assert!(matches!(err, SupervisorError::InvalidTransition(_))),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(runner.spawns(), 1);
    assert_eq!(supervisor.state(), LifecycleState::Running);

    supervisor.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_during_spawn_sees_live_handle() {
    let runner = ScriptedRunner::slow_spawn(
        Script::runs_until_cancelled(),
        Duration::from_millis(100),
    );
    let supervisor = Arc::new(supervisor(&runner));

    let starting = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.start().await })
    };
    while !runner.spawning.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // Blocks on the state lock until the handle is published
    let status = supervisor.shutdown(Duration::from_secs(2)).await;

    starting.await.unwrap().unwrap();
    assert_eq!(status, ShutdownStatus::Completed);
    assert_eq!(runner.spawns(), 1);
    assert_eq!(runner.cancels(), 1);
    assert_eq!(supervisor.state(), LifecycleState::Terminated);
}

/// Records the level of every event emitted by the exit monitor
#[derive(Clone, Default)]
struct MonitorLevels {
    levels: Arc<Mutex<Vec<Level>>>,
}

impl MonitorLevels {
    fn take(&self) -> Vec<Level> {
        std::mem::take(&mut *self.levels.lock())
    }
}

impl<S: Subscriber> Layer<S> for MonitorLevels {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() == "alloyengine_supervisor::monitor" {
            self.levels.lock().push(*metadata.level());
        }
    }
}

async fn exit_levels(script: Script, shut_down: bool) -> Vec<Level> {
    let collector = MonitorLevels::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(collector.clone()));

    let runner = ScriptedRunner::new(script);
    let supervisor = supervisor(&runner);
    supervisor.start().await.unwrap();

    if shut_down {
        supervisor.shutdown(Duration::from_secs(2)).await;
    }
    tokio::time::timeout(Duration::from_secs(2), supervisor.wait_terminated())
        .await
        .unwrap()
        .unwrap();

    collector.take()
}

#[tokio::test]
async fn test_exit_classes_log_at_their_levels() {
    assert_eq!(
        exit_levels(Script::exits_after(Duration::from_millis(10), 0), false).await,
        vec![Level::INFO]
    );
    assert_eq!(
        exit_levels(Script::exits_after(Duration::from_millis(10), 3), false).await,
        vec![Level::ERROR]
    );
    assert_eq!(
        exit_levels(Script::runs_until_cancelled(), true).await,
        vec![Level::WARN]
    );
}
