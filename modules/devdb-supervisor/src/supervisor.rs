use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ServiceConfig;
use crate::error::{Result, SupervisorError};
use crate::handle::{ServiceHandle, ServiceState};
use crate::launcher::ServiceLauncher;
use crate::probe::ReadinessProbe;

/// Owns the lifecycle of supervised instances.
pub struct Supervisor<L, P> {
    launcher: L,
    probe: P,
    backoff: Backoff,
}

impl<L, P> Supervisor<L, P>
where
    L: ServiceLauncher,
    P: ReadinessProbe,
{
    pub fn new(launcher: L, probe: P) -> Self {
        Self {
            launcher,
            probe,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Launch one instance. The returned handle is `Starting`.
    pub async fn start(&self, config: &ServiceConfig) -> Result<ServiceHandle> {
        config.validate()?;
        info!(
            image = config.image.as_str(),
            port = config.port,
            ephemeral = config.ephemeral,
            "Starting service"
        );
        let instance = self.launcher.launch(config).await?;
        Ok(ServiceHandle::new(instance.id, instance.endpoint, config.ephemeral))
    }

    /// Poll the probe with backoff until it succeeds or `timeout` elapses.
    /// Each probe call is itself cut off at the deadline, so a stalled probe
    /// cannot hold this past `timeout`.
    ///
    /// On timeout the handle becomes `Failed`; the instance itself is left for
    /// `stop` to clean up.
    pub async fn wait_ready(&self, handle: &mut ServiceHandle, timeout: Duration) -> Result<()> {
        match handle.state() {
            ServiceState::Starting => {}
            ServiceState::Ready => return Ok(()),
            other => {
                return Err(SupervisorError::InvalidState {
                    from: other,
                    to: ServiceState::Ready,
                })
            }
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = tokio::time::timeout_at(deadline, self.probe.probe(handle.endpoint()))
                .await
                .unwrap_or_else(|_| Err("probe did not answer before the deadline".to_string()));
            let last_error = match outcome {
                Ok(()) => {
                    handle.transition(ServiceState::Ready)?;
                    info!(
                        endpoint = %handle.endpoint(),
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Service ready"
                    );
                    return Ok(());
                }
                Err(e) => e,
            };
            debug!(attempt = attempts, error = last_error.as_str(), "Service not ready yet");

            let now = Instant::now();
            if now >= deadline {
                handle.transition(ServiceState::Failed)?;
                warn!(endpoint = %handle.endpoint(), attempts, "Service readiness timed out");
                return Err(SupervisorError::TimedOut {
                    endpoint: handle.endpoint().to_string(),
                    waited: started.elapsed(),
                    attempts,
                    last_error,
                });
            }

            let delay = self.backoff.delay(attempts).min(deadline - now);
            tokio::time::sleep(delay).await;
        }
    }

    /// Terminate the instance and discard ephemeral storage. Idempotent, and
    /// safe on a handle that never became ready.
    pub async fn stop(&self, handle: &mut ServiceHandle) -> Result<()> {
        if handle.is_released() {
            debug!(id = handle.id(), "Service already stopped");
            return Ok(());
        }

        self.launcher
            .terminate(handle.id(), handle.is_ephemeral())
            .await?;
        handle.mark_released();

        if !handle.state().is_terminal() {
            handle.transition(ServiceState::Stopped)?;
        }
        info!(id = handle.id(), state = ?handle.state(), "Service stopped");
        Ok(())
    }

    /// Resolve once the instance is no longer running. The handle becomes
    /// `Stopped`; ephemeral instances have removed themselves by then.
    ///
    /// A runtime that cannot be queried is not taken as an exit; polling
    /// continues until it answers.
    pub async fn watch(&self, handle: &mut ServiceHandle, poll: Duration) -> Result<()> {
        loop {
            if handle.state().is_terminal() {
                return Ok(());
            }
            match self.launcher.is_running(handle.id()).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(id = handle.id(), "Service exited");
                    handle.transition(ServiceState::Stopped)?;
                    if handle.is_ephemeral() {
                        handle.mark_released();
                    }
                    return Ok(());
                }
                Err(e) => warn!(id = handle.id(), error = %e, "Could not check service, retrying"),
            }
            tokio::time::sleep(poll).await;
        }
    }
}
