//! devdb: start a disposable local Postgres and bring its schema up to date.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use devdb_common::Config;

mod cmd;
mod exit;

#[derive(Parser)]
#[command(name = "devdb")]
#[command(about = "Ephemeral Postgres and schema migrations for local development")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "DEVDB_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start Postgres and keep it running until Ctrl-C or container exit
    RunPostgres,

    /// Apply pending migrations to the configured database
    RunMigrations {
        /// Print the plan without applying anything
        #[arg(long)]
        dry_run: bool,

        /// Tolerate applied migrations whose files were deleted
        #[arg(long)]
        ignore_missing: bool,
    },

    /// Start Postgres, apply migrations, then stay in the foreground
    Up {
        /// Tolerate applied migrations whose files were deleted
        #[arg(long)]
        ignore_missing: bool,
    },

    /// Show every migration and whether it is applied
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new empty migration file
    New {
        /// Migration name, e.g. add_users_email
        name: String,
    },
}

/// Flags that take precedence over `DEVDB_*` environment variables.
#[derive(Args, Default)]
struct Overrides {
    /// Target database (defaults to the local container)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory containing <version>_<name>.sql files
    #[arg(long = "migrations", global = true)]
    migrations_dir: Option<PathBuf>,

    /// Host port for the container
    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    user: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    #[arg(long, global = true)]
    database: Option<String>,

    /// Postgres image reference
    #[arg(long, global = true)]
    image: Option<String>,

    /// Container runtime binary (docker or podman)
    #[arg(long, global = true)]
    runtime: Option<String>,

    #[arg(long, global = true)]
    container_name: Option<String>,

    /// Keep data in a named volume instead of discarding it on stop
    #[arg(long, global = true)]
    persist: bool,

    /// Seconds to wait for Postgres to accept connections
    #[arg(long, global = true)]
    ready_timeout: Option<u64>,

    /// Ledger table, optionally schema-qualified
    #[arg(long, global = true)]
    ledger_table: Option<String>,
}

impl Overrides {
    /// Flag value for an environment key, if the flag was given.
    fn get(&self, key: &str) -> Option<String> {
        match key {
            "DATABASE_URL" => self.database_url.clone(),
            "DEVDB_MIGRATIONS_DIR" => self
                .migrations_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            "DEVDB_POSTGRES_PORT" => self.port.map(|p| p.to_string()),
            "DEVDB_POSTGRES_USER" => self.user.clone(),
            "DEVDB_POSTGRES_PASSWORD" => self.password.clone(),
            "DEVDB_POSTGRES_DB" => self.database.clone(),
            "DEVDB_POSTGRES_IMAGE" => self.image.clone(),
            "DEVDB_CONTAINER_RUNTIME" => self.runtime.clone(),
            "DEVDB_CONTAINER_NAME" => self.container_name.clone(),
            "DEVDB_PERSIST" => self.persist.then(|| "true".to_string()),
            "DEVDB_READY_TIMEOUT_SECS" => self.ready_timeout.map(|s| s.to_string()),
            "DEVDB_LEDGER_TABLE" => self.ledger_table.clone(),
            _ => None,
        }
    }

    fn resolve(&self) -> Result<Config, devdb_common::ConfigError> {
        Config::from_lookup(|key| self.get(key).or_else(|| std::env::var(key).ok()))
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = devdb_common::telemetry::init_tracing(cli.log_json) {
        eprintln!("error[other]: {e:#}");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error[other]: failed to start async runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let (kind, code) = exit::classify(&e);
            eprintln!("error[{kind}]: {e:#}");
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.overrides.resolve()?;
    config.log_redacted();

    match cli.command {
        Commands::RunPostgres => cmd::postgres::run(&config).await,
        Commands::RunMigrations {
            dry_run,
            ignore_missing,
        } => cmd::migrations::run(&config, dry_run, ignore_missing).await,
        Commands::Up { ignore_missing } => cmd::up::run(&config, ignore_missing).await,
        Commands::Status { json } => cmd::migrations::status(&config, json).await,
        Commands::New { name } => cmd::migrations::new(&config, &name),
    }
}
