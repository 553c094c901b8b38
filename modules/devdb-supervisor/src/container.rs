use std::io::ErrorKind;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{ServiceConfig, POSTGRES_CONTAINER_PORT};
use crate::error::{Result, SupervisorError};
use crate::handle::Endpoint;
use crate::launcher::{LaunchedInstance, ServiceLauncher};

const MANAGED_LABEL: &str = "devdb.managed=true";
const EPHEMERAL_LABEL: &str = "devdb.ephemeral=true";
const PGDATA: &str = "/var/lib/postgresql/data";
const PASSWORD_ENV: &str = "POSTGRES_PASSWORD";

/// Launches Postgres through a docker-compatible CLI (`docker`, `podman`).
#[derive(Debug, Clone)]
pub struct ContainerLauncher {
    runtime: String,
    host: String,
}

impl ContainerLauncher {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            host: "127.0.0.1".to_string(),
        }
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    async fn exec(&self, args: &[String]) -> Result<Output> {
        self.exec_with_env(args, &[]).await
    }

    /// Run the runtime CLI. `env` is passed to the child process only, so
    /// values referenced as `-e KEY` stay out of argv and out of the logs.
    async fn exec_with_env(&self, args: &[String], env: &[(&str, &str)]) -> Result<Output> {
        debug!(runtime = self.runtime.as_str(), ?args, "Running container runtime");
        Command::new(&self.runtime)
            .args(args)
            .envs(env.iter().copied())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SupervisorError::Launch(format!(
                    "container runtime `{}` not found on PATH",
                    self.runtime
                )),
                _ => SupervisorError::Launch(format!("failed to run `{}`: {e}", self.runtime)),
            })
    }

    /// Remove a dead leftover container of ours with the same name, e.g. from
    /// a run that was killed before it could clean up. Running containers and
    /// foreign ones are left alone so the subsequent `run` reports the conflict.
    async fn remove_stale(&self, name: &str) -> Result<()> {
        let output = self.exec(&stale_filter_args(name)).await?;
        if !output.status.success() {
            return Err(SupervisorError::Launch(format!(
                "{} ps failed: {}",
                self.runtime,
                stderr(&output)
            )));
        }
        let stale = String::from_utf8_lossy(&output.stdout);
        for id in stale.split_whitespace() {
            warn!(container = id, name, "Removing stale container from a previous run");
            self.terminate(id, true)
                .await
                .map_err(|e| SupervisorError::Launch(e.to_string()))?;
        }
        Ok(())
    }
}

/// Arguments for `<runtime> ps` listing our containers named `name` that
/// are no longer running.
pub fn stale_filter_args(name: &str) -> Vec<String> {
    strings(&[
        "ps",
        "-a",
        "-q",
        "--filter",
        &format!("name=^/{name}$"),
        "--filter",
        &format!("label={MANAGED_LABEL}"),
        "--filter",
        "status=created",
        "--filter",
        "status=exited",
        "--filter",
        "status=dead",
    ])
}

/// Arguments for `<runtime> run`. The password is referenced by name only
/// and supplied through the child's environment. Ephemeral instances keep their data
/// Ephemeral instances keep their data directory on tmpfs and are removed as
/// soon as they exit.
pub fn build_run_args(config: &ServiceConfig) -> Vec<String> {
    let mut args = strings(&["run", "-d", "--name", &config.container_name, "--label", MANAGED_LABEL]);

    if config.ephemeral {
        args.extend(strings(&["--rm", "--label", EPHEMERAL_LABEL, "--tmpfs", PGDATA]));
    } else {
        args.extend(strings(&[
            "-v",
            &format!("{}-data:{PGDATA}", config.container_name),
        ]));
    }

    args.extend(strings(&[
        "-p",
        &format!("{}:{POSTGRES_CONTAINER_PORT}", config.port),
        "-e",
        &format!("POSTGRES_USER={}", config.user),
        "-e",
        PASSWORD_ENV,
        "-e",
        &format!("POSTGRES_DB={}", config.database),
        &config.image,
    ]));
    args
}

#[async_trait]
impl ServiceLauncher for ContainerLauncher {
    async fn launch(&self, config: &ServiceConfig) -> Result<LaunchedInstance> {
        self.remove_stale(&config.container_name).await?;

        let output = self
            .exec_with_env(&build_run_args(config), &[(PASSWORD_ENV, config.password.as_str())])
            .await?;
        if !output.status.success() {
            let message = stderr(&output);
            // A failed `run` can leave a created-but-not-started container behind
            // (port already allocated); don't let it block the next attempt.
            let cleanup = strings(&["rm", "-f", "-v", &config.container_name]);
            let _ = self.exec(&cleanup).await;
            return Err(SupervisorError::Launch(format!(
                "{} run exited with {}: {message}",
                self.runtime, output.status
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(SupervisorError::Launch(format!(
                "{} run returned no container id",
                self.runtime
            )));
        }

        info!(
            container = id.as_str(),
            name = config.container_name.as_str(),
            image = config.image.as_str(),
            port = config.port,
            ephemeral = config.ephemeral,
            "Container started"
        );

        Ok(LaunchedInstance {
            id,
            endpoint: Endpoint {
                host: self.host.clone(),
                port: config.port,
                user: config.user.clone(),
                password: config.password.clone(),
                database: config.database.clone(),
            },
        })
    }

    async fn terminate(&self, id: &str, discard_storage: bool) -> Result<()> {
        let args = if discard_storage {
            strings(&["rm", "-f", "-v", id])
        } else {
            strings(&["stop", id])
        };

        let output = self.exec(&args).await.map_err(|e| SupervisorError::Stop {
            id: id.to_string(),
            message: e.to_string(),
        })?;
        if output.status.success() {
            info!(container = id, discard_storage, "Container stopped");
            return Ok(());
        }

        let message = stderr(&output);
        if is_gone(&message) {
            debug!(container = id, "Container already gone");
            return Ok(());
        }
        Err(SupervisorError::Stop {
            id: id.to_string(),
            message,
        })
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        let args = strings(&["inspect", "-f", "{{.State.Running}}", id]);
        let output = self.exec(&args).await.map_err(|e| SupervisorError::Inspect {
            id: id.to_string(),
            message: e.to_string(),
        })?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim() == "true");
        }

        let message = stderr(&output);
        if is_gone(&message) {
            return Ok(false);
        }
        Err(SupervisorError::Inspect {
            id: id.to_string(),
            message,
        })
    }
}

/// Runtime output meaning the container no longer exists.
fn is_gone(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
