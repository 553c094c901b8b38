use std::time::Duration;

use thiserror::Error;

use crate::handle::ServiceState;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to launch service: {0}")]
    Launch(String),

    #[error("Service at {endpoint} not ready after {waited:?} ({attempts} attempts, last error: {last_error})")]
    TimedOut {
        endpoint: String,
        waited: Duration,
        attempts: u32,
        last_error: String,
    },

    #[error("Illegal service state transition {from:?} -> {to:?}")]
    InvalidState { from: ServiceState, to: ServiceState },

    #[error("Failed to stop service {id}: {message}")]
    Stop { id: String, message: String },

    #[error("Failed to inspect service {id}: {message}")]
    Inspect { id: String, message: String },
}

impl SupervisorError {
    /// Stable short name used in operator-facing output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Launch(_) => "launch",
            Self::TimedOut { .. } => "timed-out",
            Self::InvalidState { .. } => "invalid-state",
            Self::Stop { .. } => "stop",
            Self::Inspect { .. } => "inspect",
        }
    }
}
