use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use devdb_common::{redact_url, Config};
use devdb_supervisor::{ReadinessProbe, ServiceConfig, ServiceHandle, ServiceLauncher, Supervisor};
use tracing::{info, warn};

use super::{service_config, supervisor};
use crate::exit::Interrupted;

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(config: &Config) -> Result<()> {
    let supervisor = supervisor(config);
    let interrupt = interrupted();
    tokio::pin!(interrupt);

    let mut handle = start_ready(
        &supervisor,
        &service_config(config),
        config.ready_timeout,
        interrupt.as_mut(),
    )
    .await?;

    let url = handle.endpoint().database_url();
    info!(url = %redact_url(&url), "Postgres is ready");
    println!("{}", redact_url(&url));

    foreground(&supervisor, &mut handle, interrupt).await
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
pub async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Start the service and wait for it to accept connections.
///
/// `cancel` firing at any point stops whatever was launched and yields
/// [`Interrupted`]. A launch already in flight is allowed to finish first so
/// its instance can be terminated.
pub async fn start_ready<L, P, C>(
    supervisor: &Supervisor<L, P>,
    service: &ServiceConfig,
    ready_timeout: Duration,
    mut cancel: Pin<&mut C>,
) -> Result<ServiceHandle>
where
    L: ServiceLauncher,
    P: ReadinessProbe,
    C: Future<Output = ()>,
{
    let start = supervisor.start(service);
    tokio::pin!(start);
    let mut cancelled = false;
    let started = loop {
        tokio::select! {
            biased;
            () = &mut cancel, if !cancelled => cancelled = true,
            started = &mut start => break started,
        }
    };

    let mut handle = started?;
    if cancelled {
        info!("Interrupted during launch, stopping Postgres");
        release(supervisor, &mut handle).await;
        return Err(Interrupted.into());
    }

    let ready = tokio::select! {
        biased;
        () = &mut cancel => None,
        ready = supervisor.wait_ready(&mut handle, ready_timeout) => Some(ready),
    };

    match ready {
        Some(Ok(())) => Ok(handle),
        Some(Err(e)) => {
            release(supervisor, &mut handle).await;
            Err(e.into())
        }
        None => {
            info!("Interrupted before Postgres was ready, stopping it");
            release(supervisor, &mut handle).await;
            Err(Interrupted.into())
        }
    }
}

/// Block until `cancel` fires or the instance exits, then stop it.
pub async fn foreground<L, P, C>(
    supervisor: &Supervisor<L, P>,
    handle: &mut ServiceHandle,
    cancel: Pin<&mut C>,
) -> Result<()>
where
    L: ServiceLauncher,
    P: ReadinessProbe,
    C: Future<Output = ()>,
{
    info!("Press Ctrl-C to stop");
    tokio::select! {
        () = cancel => info!("Interrupted, stopping Postgres"),
        watched = supervisor.watch(handle, WATCH_INTERVAL) => {
            watched?;
            warn!("Postgres exited on its own");
        }
    }

    supervisor.stop(handle).await?;
    Ok(())
}

/// Stop on an error path; the original error is what gets reported.
pub async fn release<L, P>(supervisor: &Supervisor<L, P>, handle: &mut ServiceHandle)
where
    L: ServiceLauncher,
    P: ReadinessProbe,
{
    if let Err(e) = supervisor.stop(handle).await {
        warn!(id = handle.id(), error = %e, "Failed to clean up Postgres");
    }
}
