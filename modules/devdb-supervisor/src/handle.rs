use std::fmt;

use url::Url;

use crate::error::{Result, SupervisorError};

/// Lifecycle of a supervised instance.
///
/// `Starting -> Ready | Failed`, `Ready -> Stopped`. A handle that is still
/// `Starting` may also be stopped (cancelled). `Failed` and `Stopped` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl ServiceState {
    pub fn can_transition(self, to: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, to),
            (Starting, Ready) | (Starting, Failed) | (Starting, Stopped) | (Ready, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Failed | ServiceState::Stopped)
    }
}

/// Where the instance accepts connections.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Endpoint {
    pub fn database_url(&self) -> String {
        let mut url = match Url::parse(&format!("postgres://{}:{}", self.host, self.port)) {
            Ok(url) => url,
            Err(_) => return format!("postgres://{}:{}/{}", self.host, self.port, self.database),
        };
        let _ = url.set_username(&self.user);
        let _ = url.set_password(Some(&self.password));
        url.set_path(&self.database);
        url.to_string()
    }
}

// Keep the password out of logs and error messages.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

/// One running backing-service instance, owned by the supervisor.
#[derive(Debug)]
pub struct ServiceHandle {
    id: String,
    endpoint: Endpoint,
    ephemeral: bool,
    state: ServiceState,
    released: bool,
}

impl ServiceHandle {
    pub fn new(id: impl Into<String>, endpoint: Endpoint, ephemeral: bool) -> Self {
        Self {
            id: id.into(),
            endpoint,
            ephemeral,
            state: ServiceState::Starting,
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Whether the runtime resources behind this handle have been torn down.
    pub fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn transition(&mut self, to: ServiceState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(SupervisorError::InvalidState {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }
}
