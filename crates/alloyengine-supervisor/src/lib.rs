//! # alloyengine-supervisor
//!
//! **Purpose**: Lifecycle supervision for a single Alloy engine child process
//!
//! Spawns the engine, watches it exit, coordinates cancellation on shutdown
//! and answers readiness probes, all driven by one lock-guarded state machine.
//!
//! ## Features
//!
//! - **Guarded Lifecycle**: `NotStarted → Running → ShuttingDown → Terminated`
//! - **Exit Classification**: clean exit, exit during shutdown, unexpected termination
//! - **Graceful Cancellation**: SIGTERM→SIGKILL escalation after a grace period
//! - **Bounded Shutdown**: callers wait up to their own timeout, concurrently
//! - **Binary Discovery**: `ALLOY_BINARY`, build directory, then `PATH`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use alloyengine_supervisor::{EngineSettings, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = EngineSettings::new("/etc/alloy/config.alloy")
//!     .flag("stability.level", "generally-available");
//!
//! let supervisor = Supervisor::builder(settings).build()?;
//! supervisor.start().await?;
//! supervisor.ready()?;
//!
//! let status = supervisor.shutdown(Duration::from_secs(10)).await;
//! println!("shutdown: {status}");
//! # Ok(())
//! # }
//! ```

pub mod child;
pub mod config;
pub mod error;
pub mod extension;
pub mod monitor;
pub mod readiness;
pub mod resolver;
pub mod runner;
pub mod shutdown;
pub mod state;
pub mod supervisor;

pub use child::ChildHandle;
pub use config::EngineSettings;
pub use error::{ProcessError, ProcessResult, Result, SupervisorError, TransitionError};
pub use extension::Extension;
pub use monitor::{ExitClass, ExitReport};
pub use resolver::{BinaryResolver, DefaultResolver, StaticResolver};
pub use runner::{CommandRunner, CommandSpec, ProcessHandle, ProcessRunner};
pub use shutdown::ShutdownStatus;
pub use state::{LifecycleState, StateMachine};
pub use supervisor::{Supervisor, SupervisorBuilder};
