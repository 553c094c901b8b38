use std::io::Write;

use anyhow::Result;
use devdb_common::{redact_url, Config};
use devdb_migrate::{new_migration, MigrationInfo, MigrationState, PgTarget};
use tracing::info;

use super::{ledger_table, migrator};

pub async fn run(config: &Config, dry_run: bool, ignore_missing: bool) -> Result<()> {
    let migrator = migrator(config, ignore_missing)?;
    let mut target = connect(config).await?;

    if dry_run {
        let pending = migrator.pending(&mut target).await?;
        target.close().await?;
        if pending.is_empty() {
            println!("Nothing to apply.");
        } else {
            println!("Would apply {} migration(s):", pending.len());
            for m in &pending {
                println!("  {} {}", m.version, m.name);
            }
        }
        return Ok(());
    }

    let summary = migrator.run(&mut target).await?;
    target.close().await?;
    info!(%summary, "Migrations complete");
    println!("{summary}");
    Ok(())
}

pub async fn status(config: &Config, json: bool) -> Result<()> {
    let migrator = migrator(config, false)?;
    let mut target = connect(config).await?;
    let rows = migrator.status(&mut target).await?;
    target.close().await?;

    let mut out = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &rows)?;
        writeln!(out)?;
    } else {
        write_table(&mut out, &rows)?;
    }
    Ok(())
}

pub fn new(config: &Config, name: &str) -> Result<()> {
    let path = new_migration(&config.migrations_dir, name)?;
    info!(path = %path.display(), "Created migration");
    println!("{}", path.display());
    Ok(())
}

async fn connect(config: &Config) -> Result<PgTarget> {
    let table = ledger_table(config)?;
    let url = config.database_url()?;
    info!(url = %redact_url(&url), ledger = %table, "Connecting");
    Ok(PgTarget::connect(&url, table).await?)
}

fn write_table(out: &mut impl Write, rows: &[MigrationInfo]) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "No migrations found.");
    }
    let name_width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0).max(4);
    writeln!(out, "{:<16} {:<name_width$} {:<9} DETAIL", "VERSION", "NAME", "STATE")?;
    for row in rows {
        let (state, detail) = match &row.state {
            MigrationState::Applied { applied_at } => ("applied", applied_at.to_rfc3339()),
            MigrationState::Pending => ("pending", String::new()),
            MigrationState::Modified { recorded_checksum } => {
                ("modified", format!("ledger checksum {recorded_checksum}"))
            }
            MigrationState::Missing { applied_at } => {
                ("missing", format!("applied {} but file is gone", applied_at.to_rfc3339()))
            }
        };
        writeln!(
            out,
            "{:<16} {:<name_width$} {:<9} {}",
            row.version, row.name, state, detail
        )?;
    }
    Ok(())
}
