//! Host-facing extension contract

use std::time::Duration;

use async_trait::async_trait;

use crate::{error::Result, shutdown::ShutdownStatus, supervisor::Supervisor};

/// Lifecycle contract a host drives
#[async_trait]
pub trait Extension: Send + Sync {
    /// Launch the extension
    async fn start(&self) -> Result<()>;

    /// Stop the extension, waiting at most `timeout`; never fails
    async fn shutdown(&self, timeout: Duration) -> ShutdownStatus;

    /// Readiness probe
    fn ready(&self) -> Result<()>;

    /// Not-ready probe
    fn not_ready(&self) -> Result<()>;
}

#[async_trait]
impl Extension for Supervisor {
    async fn start(&self) -> Result<()> {
        Supervisor::start(self).await
    }

    async fn shutdown(&self, timeout: Duration) -> ShutdownStatus {
        Supervisor::shutdown(self, timeout).await
    }

    fn ready(&self) -> Result<()> {
        Supervisor::ready(self)
    }

    fn not_ready(&self) -> Result<()> {
        Supervisor::not_ready(self)
    }
}
