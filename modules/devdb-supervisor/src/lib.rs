//! Supervision of one disposable backing-service instance.
//!
//! The runtime that creates the instance and the check that decides it is
//! ready are both capabilities (`ServiceLauncher`, `ReadinessProbe`), so the
//! supervisor's state machine does not care whether it is driving docker,
//! podman, or a test double.

pub mod backoff;
pub mod config;
pub mod container;
pub mod error;
pub mod handle;
pub mod launcher;
pub mod probe;
pub mod supervisor;

#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use backoff::Backoff;
pub use config::ServiceConfig;
pub use container::ContainerLauncher;
pub use error::{Result, SupervisorError};
pub use handle::{Endpoint, ServiceHandle, ServiceState};
pub use launcher::{LaunchedInstance, ServiceLauncher};
pub use probe::{PostgresProbe, ReadinessProbe};
pub use supervisor::Supervisor;
