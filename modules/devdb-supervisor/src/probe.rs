use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection};

use crate::handle::Endpoint;

/// Decides whether an instance accepts connections.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// One check. `Err` carries a human-readable reason for logging.
    async fn probe(&self, endpoint: &Endpoint) -> Result<(), String>;
}

/// Connects with sqlx and runs `SELECT 1`.
#[derive(Debug, Clone)]
pub struct PostgresProbe {
    attempt_timeout: Duration,
}

impl PostgresProbe {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self { attempt_timeout }
    }
}

impl Default for PostgresProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ReadinessProbe for PostgresProbe {
    async fn probe(&self, endpoint: &Endpoint) -> Result<(), String> {
        let options = PgConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&endpoint.user)
            .password(&endpoint.password)
            .database(&endpoint.database)
            .disable_statement_logging();

        let check = async {
            let mut conn = options.connect().await.map_err(|e| e.to_string())?;
            sqlx::query("SELECT 1")
                .execute(&mut conn)
                .await
                .map_err(|e| e.to_string())?;
            let _ = conn.close().await;
            Ok::<(), String>(())
        };

        match tokio::time::timeout(self.attempt_timeout, check).await {
            Ok(result) => result,
            Err(_) => Err(format!("no response within {:?}", self.attempt_timeout)),
        }
    }
}
