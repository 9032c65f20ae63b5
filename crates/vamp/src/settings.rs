//! Orchestrator configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `VAMP_*` environment overrides (e.g. `VAMP_RUNTIME__BASE_URL`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Workspace provisioning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Root directory under which repositories are cloned.
    pub root: PathBuf,
    /// Git binary to invoke.
    pub git_binary: String,
    /// Base URL of the source-control hosting API.
    pub hosting_api_url: String,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("/var/lib/vamp"))
                .join("vamp/workspaces"),
            git_binary: "git".to_string(),
            hosting_api_url: "https://api.github.com".to_string(),
        }
    }
}

/// Container backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Execution image to run.
    pub image: String,
    /// Directory for per-session state (config artifacts, scratch space).
    pub state_dir: PathBuf,
    /// Readiness probe attempts before giving up.
    pub readiness_attempts: u32,
    /// Seconds between readiness probes.
    pub readiness_interval_secs: u64,
    /// Seconds between event poll cycles.
    pub poll_interval_secs: u64,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: "vamp-exec:latest".to_string(),
            state_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("/var/lib/vamp"))
                .join("vamp/state"),
            readiness_attempts: 30,
            readiness_interval_secs: 1,
            poll_interval_secs: 2,
        }
    }
}

impl ContainerSettings {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Remote runtime provisioning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Base URL of the provisioning API.
    pub base_url: String,
    /// Static API key for the provisioning API.
    pub api_key: Option<String>,
    /// Seconds to wait for a runtime to become ready and alive.
    pub ready_timeout_secs: u64,
    /// Milliseconds between readiness polls.
    pub poll_interval_ms: u64,
    /// Whether to hold a live event stream per remote session.
    pub live_events: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:41900".to_string(),
            api_key: None,
            ready_timeout_secs: 120,
            poll_interval_ms: 1000,
            live_events: true,
        }
    }
}

impl RuntimeSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Session-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// System prompt handed to the execution engine.
    pub system_prompt: String,
    /// Seconds to wait for worker/stream tasks to join during cleanup.
    pub join_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are a coding agent working on the checked-out repository."
                .to_string(),
            join_timeout_secs: 5,
        }
    }
}

impl SessionSettings {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

/// Top-level orchestrator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workspace: WorkspaceSettings,
    pub container: ContainerSettings,
    pub runtime: RuntimeSettings,
    pub session: SessionSettings,
}

impl Settings {
    /// Load settings from an optional TOML file with `VAMP_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }
        builder
            .add_source(Environment::with_prefix("VAMP").separator("__"))
            .build()?
            .try_deserialize()
    }
}
