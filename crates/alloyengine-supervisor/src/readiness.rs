//! Readiness probes

use crate::{
    error::{Result, SupervisorError},
    state::LifecycleState,
    supervisor::Supervisor,
};

impl Supervisor {
    /// Succeeds only while the engine is [`LifecycleState::Running`]
    pub fn ready(&self) -> Result<()> {
        self.check_running()
    }

    /// Same check as [`ready`](Self::ready)
    pub fn not_ready(&self) -> Result<()> {
        self.check_running()
    }

    fn check_running(&self) -> Result<()> {
        match self.machine.current() {
            LifecycleState::Running => Ok(()),
            state => Err(SupervisorError::NotReady { state }),
        }
    }
}
