pub mod migrations;
pub mod postgres;
pub mod up;

use devdb_common::Config;
use devdb_migrate::{LedgerTable, Migrator};
use devdb_supervisor::{ContainerLauncher, PostgresProbe, ServiceConfig, Supervisor};

pub type PgSupervisor = Supervisor<ContainerLauncher, PostgresProbe>;

pub fn supervisor(config: &Config) -> PgSupervisor {
    Supervisor::new(
        ContainerLauncher::new(config.postgres.runtime.clone()),
        PostgresProbe::default(),
    )
}

pub fn service_config(config: &Config) -> ServiceConfig {
    let pg = &config.postgres;
    ServiceConfig {
        image: pg.image.clone(),
        container_name: pg.container_name.clone(),
        port: pg.port,
        user: pg.user.clone(),
        password: pg.password.clone(),
        database: pg.database.clone(),
        ephemeral: !pg.persist,
    }
}

pub fn ledger_table(config: &Config) -> devdb_migrate::Result<LedgerTable> {
    LedgerTable::parse(&config.ledger_table)
}

pub fn migrator(config: &Config, ignore_missing: bool) -> devdb_migrate::Result<Migrator> {
    Ok(Migrator::discover(&config.migrations_dir)?.ignore_missing(ignore_missing))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_maps_to_non_ephemeral() {
        let mut config = Config::from_lookup(|_| None).unwrap();
        assert!(service_config(&config).ephemeral);

        config.postgres.persist = true;
        let service = service_config(&config);
        assert!(!service.ephemeral);
        assert_eq!(service.image, "postgres:16-alpine");
        assert_eq!(service.container_name, "devdb-postgres");
    }

    #[test]
    fn bad_ledger_table_is_rejected() {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.ledger_table = "migrations; DROP TABLE users".into();
        assert_eq!(ledger_table(&config).unwrap_err().kind(), "config");
    }
}
