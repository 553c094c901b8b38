//! In-process launcher and probe doubles for exercising the supervisor
//! without a container runtime.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::ServiceConfig;
use crate::error::{Result, SupervisorError};
use crate::handle::Endpoint;
use crate::launcher::{LaunchedInstance, ServiceLauncher};
use crate::probe::ReadinessProbe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherCall {
    Launch(String),
    Terminate { id: String, discard_storage: bool },
}

/// Records every call; `running` flips to false on terminate.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    calls: Arc<Mutex<Vec<LauncherCall>>>,
    running: Arc<AtomicBool>,
    inspect_broken: Arc<AtomicBool>,
    launch_error: Arc<Mutex<Option<String>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next launches fail with `SupervisorError::Launch(message)`.
    pub fn failing(message: &str) -> Self {
        let launcher = Self::default();
        *launcher.launch_error.lock().unwrap() = Some(message.to_string());
        launcher
    }

    pub fn calls(&self) -> Vec<LauncherCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn terminate_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, LauncherCall::Terminate { .. }))
            .count()
    }

    /// Simulate the instance exiting on its own.
    pub fn crash(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Make `is_running` fail as if the runtime daemon were unreachable.
    pub fn break_inspect(&self, broken: bool) {
        self.inspect_broken.store(broken, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceLauncher for FakeLauncher {
    async fn launch(&self, config: &ServiceConfig) -> Result<LaunchedInstance> {
        self.calls
            .lock()
            .unwrap()
            .push(LauncherCall::Launch(config.container_name.clone()));
        if let Some(message) = self.launch_error.lock().unwrap().clone() {
            return Err(SupervisorError::Launch(message));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(LaunchedInstance {
            id: format!("fake-{}", config.container_name),
            endpoint: Endpoint {
                host: "127.0.0.1".into(),
                port: config.port,
                user: config.user.clone(),
                password: config.password.clone(),
                database: config.database.clone(),
            },
        })
    }

    async fn terminate(&self, id: &str, discard_storage: bool) -> Result<()> {
        self.calls.lock().unwrap().push(LauncherCall::Terminate {
            id: id.to_string(),
            discard_storage,
        });
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        if self.inspect_broken.load(Ordering::SeqCst) {
            return Err(SupervisorError::Inspect {
                id: id.to_string(),
                message: "Cannot connect to the runtime daemon".to_string(),
            });
        }
        Ok(self.running.load(Ordering::SeqCst))
    }
}

/// Fails a fixed number of times, then succeeds. `never_ready` never
/// succeeds; `stalled` never answers at all.
#[derive(Clone)]
pub struct ScriptedProbe {
    failures_before_ready: Option<u32>,
    stall: bool,
    attempts: Arc<AtomicU32>,
}

impl ScriptedProbe {
    pub fn ready_after(failures: u32) -> Self {
        Self {
            failures_before_ready: Some(failures),
            stall: false,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn never_ready() -> Self {
        Self {
            failures_before_ready: None,
            stall: false,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn stalled() -> Self {
        Self {
            stall: true,
            ..Self::never_ready()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    async fn probe(&self, _endpoint: &Endpoint) -> std::result::Result<(), String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.stall {
            std::future::pending::<()>().await;
        }
        match self.failures_before_ready {
            Some(failures) if attempt > failures => Ok(()),
            _ => Err("connection refused".to_string()),
        }
    }
}
