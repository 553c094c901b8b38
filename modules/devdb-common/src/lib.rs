pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{redact_url, Config, PostgresSettings};
pub use error::ConfigError;
