use crate::error::{Result, SupervisorError};

/// Port Postgres listens on inside the container.
pub const POSTGRES_CONTAINER_PORT: u16 = 5432;

/// What to launch. Validated before the runtime is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Image reference including tag, e.g. `postgres:16-alpine`.
    pub image: String,
    pub container_name: String,
    /// Host port mapped to the service port.
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Discard all data when the instance stops.
    pub ephemeral: bool,
}

impl ServiceConfig {
    pub fn postgres(port: u16) -> Self {
        Self {
            image: "postgres:16-alpine".to_string(),
            container_name: "devdb-postgres".to_string(),
            port,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "postgres".to_string(),
            ephemeral: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> {
            Err(SupervisorError::Launch(format!("invalid config: {msg}")))
        };

        if self.image.trim().is_empty() {
            return invalid("image must not be empty");
        }
        if self.image.chars().any(char::is_whitespace) {
            return invalid("image must not contain whitespace");
        }
        if self.port == 0 {
            return invalid("port must be non-zero");
        }
        if self.user.is_empty() {
            return invalid("user must not be empty");
        }
        if self.password.is_empty() {
            return invalid("password must not be empty");
        }
        if self.database.is_empty() {
            return invalid("database must not be empty");
        }
        let name_ok = !self.container_name.is_empty()
            && self
                .container_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
            && self
                .container_name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric());
        if !name_ok {
            return invalid("container name must match [a-zA-Z0-9][a-zA-Z0-9_.-]*");
        }
        Ok(())
    }
}
