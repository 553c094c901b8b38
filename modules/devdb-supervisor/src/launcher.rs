use async_trait::async_trait;

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::handle::Endpoint;

/// Result of a successful launch.
#[derive(Debug, Clone)]
pub struct LaunchedInstance {
    /// Runtime identifier used for later `terminate` / `is_running` calls.
    pub id: String,
    pub endpoint: Endpoint,
}

/// Pluggable runtime that creates and destroys service instances.
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    /// Create and start one instance. Must fail with `SupervisorError::Launch`
    /// if the runtime cannot create it.
    async fn launch(&self, config: &ServiceConfig) -> Result<LaunchedInstance>;

    /// Terminate the instance, discarding its storage when `discard_storage`
    /// is set. Terminating an instance that no longer exists succeeds.
    async fn terminate(&self, id: &str, discard_storage: bool) -> Result<()>;

    /// Whether the instance is still running. `Ok(false)` means it is gone
    /// for certain; an `Err` means the runtime could not be asked.
    async fn is_running(&self, id: &str) -> Result<bool>;
}
