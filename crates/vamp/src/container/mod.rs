//! Container runtime client.
//!
//! Drives containers through the Docker or Podman CLI. The orchestrator
//! only needs image presence checks, pull, run, and stop, behind a trait
//! so backends can be tested against a fake runtime.

mod error;

pub use error::{ContainerError, ContainerResult};

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime (default for macOS/Windows dev)
    Docker,
    /// Podman runtime (default for Linux prod)
    #[default]
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }

    /// Whether this runtime requires SELinux volume labels (:Z suffix).
    pub fn needs_selinux_labels(&self) -> bool {
        match self {
            RuntimeType::Docker => false,
            RuntimeType::Podman => true,
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// A host path bind-mounted into the container.
#[derive(Debug, Clone)]
pub struct VolumeMount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

/// Launch configuration for one container.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub image: String,
    pub name: Option<String>,
    /// (host, container) port pairs.
    pub ports: Vec<(u16, u16)>,
    pub volumes: Vec<VolumeMount>,
    pub env: Vec<(String, String)>,
    pub detach: bool,
    pub auto_remove: bool,
    pub command: Option<Vec<String>>,
}

impl RunConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            ports: Vec::new(),
            volumes: Vec::new(),
            env: Vec::new(),
            detach: true,
            auto_remove: false,
            command: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn port(mut self, host: u16, container: u16) -> Self {
        self.ports.push((host, container));
        self
    }

    pub fn volume(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount {
            host: host.into(),
            container: container.into(),
            read_only: false,
        });
        self
    }

    pub fn volume_ro(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount {
            host: host.into(),
            container: container.into(),
            read_only: true,
        });
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }
}

/// Validate an image reference before handing it to the CLI.
fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() || image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name must be 1-256 characters".to_string(),
        ));
    }
    let valid = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@')
    };
    if !image.chars().all(valid) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{image}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Container runtime abstraction for testability.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Whether the image is present locally.
    async fn image_exists(&self, image: &str) -> ContainerResult<bool>;

    /// Pull the image from its registry.
    async fn pull_image(&self, image: &str) -> ContainerResult<()>;

    /// Launch a container; returns its ID.
    async fn run(&self, config: &RunConfig) -> ContainerResult<String>;

    /// Stop (and remove, when not auto-removed) a container.
    async fn stop(&self, container_id: &str) -> ContainerResult<()>;
}

/// CLI-backed container runtime (docker or podman).
#[derive(Debug, Clone)]
pub struct ContainerCli {
    runtime_type: RuntimeType,
    binary: String,
}

impl ContainerCli {
    /// Create a client for an explicit runtime type.
    pub fn new(runtime_type: RuntimeType) -> Self {
        Self {
            runtime_type,
            binary: runtime_type.default_binary().to_string(),
        }
    }

    /// Auto-detect an available runtime, preferring podman.
    pub async fn detect() -> ContainerResult<Self> {
        for runtime_type in [RuntimeType::Podman, RuntimeType::Docker] {
            let probe = Command::new(runtime_type.default_binary())
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if matches!(probe, Ok(status) if status.success()) {
                debug!("Detected container runtime: {runtime_type}");
                return Ok(Self::new(runtime_type));
            }
        }
        Err(ContainerError::NoRuntimeAvailable)
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Run a CLI subcommand, capturing stdout.
    async fn exec(&self, args: &[&str]) -> ContainerResult<String> {
        debug!("{} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary).args(args).output().await?;
        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                command: args.first().copied().unwrap_or("?").to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Assemble the `run` argument list for a config.
    fn run_args(&self, config: &RunConfig) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        if config.detach {
            args.push("-d".to_string());
        }
        if config.auto_remove {
            args.push("--rm".to_string());
        }
        if let Some(name) = &config.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        for (host, container) in &config.ports {
            args.push("-p".to_string());
            args.push(format!("127.0.0.1:{host}:{container}"));
        }
        for mount in &config.volumes {
            let mut spec = format!("{}:{}", mount.host.display(), mount.container);
            if mount.read_only {
                spec.push_str(":ro");
                if self.runtime_type.needs_selinux_labels() {
                    spec.push_str(",Z");
                }
            } else if self.runtime_type.needs_selinux_labels() {
                spec.push_str(":Z");
            }
            args.push("-v".to_string());
            args.push(spec);
        }
        for (name, value) in &config.env {
            args.push("-e".to_string());
            args.push(format!("{name}={value}"));
        }
        args.push(config.image.clone());
        if let Some(command) = &config.command {
            args.extend(command.iter().cloned());
        }
        args
    }
}

#[async_trait]
impl ContainerRuntimeApi for ContainerCli {
    async fn image_exists(&self, image: &str) -> ContainerResult<bool> {
        validate_image_name(image)?;
        let output = Command::new(&self.binary)
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(output.success())
    }

    async fn pull_image(&self, image: &str) -> ContainerResult<()> {
        validate_image_name(image)?;
        info!("Pulling image {image}");
        self.exec(&["pull", image]).await.map_err(|e| match e {
            ContainerError::CommandFailed { .. } => ContainerError::ImageNotFound(image.to_string()),
            other => other,
        })?;
        Ok(())
    }

    async fn run(&self, config: &RunConfig) -> ContainerResult<String> {
        validate_image_name(&config.image)?;
        let args = self.run_args(config);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let container_id = self.exec(&arg_refs).await?;
        info!("Started container {container_id} from {}", config.image);
        Ok(container_id)
    }

    async fn stop(&self, container_id: &str) -> ContainerResult<()> {
        if container_id.is_empty() || !container_id.chars().all(|c| {
            c.is_ascii_alphanumeric() || c == '-' || c == '_'
        }) {
            return Err(ContainerError::InvalidInput(format!(
                "invalid container id '{container_id}'"
            )));
        }
        self.exec(&["stop", "-t", "10", container_id]).await?;
        // Best effort removal; auto-removed containers are already gone.
        let _ = self.exec(&["rm", "-f", container_id]).await;
        Ok(())
    }
}
