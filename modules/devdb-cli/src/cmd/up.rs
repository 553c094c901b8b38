use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use devdb_common::{redact_url, Config};
use devdb_migrate::{ApplySummary, MigrationTarget, Migrator, PgTarget};
use devdb_supervisor::{ReadinessProbe, ServiceConfig, ServiceHandle, ServiceLauncher, Supervisor};
use tracing::info;

use super::postgres::{foreground, interrupted, release, start_ready};
use super::{ledger_table, migrator, service_config, supervisor};
use crate::exit::Interrupted;

pub async fn run(config: &Config, ignore_missing: bool) -> Result<()> {
    let migrator = migrator(config, ignore_missing)?;
    let table = ledger_table(config)?;
    let supervisor = supervisor(config);
    let interrupt = interrupted();
    tokio::pin!(interrupt);

    let (mut handle, summary) = bring_up(
        &supervisor,
        &service_config(config),
        config.ready_timeout,
        &migrator,
        |url| async move { PgTarget::connect(&url, table).await },
        interrupt.as_mut(),
    )
    .await?;

    let url = handle.endpoint().database_url();
    info!(url = %redact_url(&url), %summary, "Database is up to date");
    println!("{}", redact_url(&url));

    foreground(&supervisor, &mut handle, interrupt).await
}

/// Start the service, wait for it, and migrate it.
///
/// Migrations only run against a ready instance. Any failure, or `cancel`
/// firing, stops the instance before the error is returned. An interrupted
/// migration is dropped with its connection, so its transaction rolls back.
pub async fn bring_up<L, P, T, F, Fut, C>(
    supervisor: &Supervisor<L, P>,
    service: &ServiceConfig,
    ready_timeout: Duration,
    migrator: &Migrator,
    connect: F,
    mut cancel: Pin<&mut C>,
) -> Result<(ServiceHandle, ApplySummary)>
where
    L: ServiceLauncher,
    P: ReadinessProbe,
    T: MigrationTarget,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = devdb_migrate::Result<T>>,
    C: Future<Output = ()>,
{
    let mut handle = start_ready(supervisor, service, ready_timeout, cancel.as_mut()).await?;

    let url = handle.endpoint().database_url();
    let migrated = tokio::select! {
        biased;
        () = &mut cancel => None,
        migrated = async move {
            let mut target = connect(url).await?;
            migrator.run(&mut target).await
        } => Some(migrated),
    };

    match migrated {
        Some(Ok(summary)) => Ok((handle, summary)),
        Some(Err(e)) => {
            release(supervisor, &mut handle).await;
            Err(e.into())
        }
        None => {
            info!("Interrupted while migrating, stopping Postgres");
            release(supervisor, &mut handle).await;
            Err(Interrupted.into())
        }
    }
}
