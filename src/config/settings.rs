use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, WardenError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub orchestrator: OrchestratorConfig,
    pub host: HostConfig,
    pub notification: NotificationConfig,
}

impl WardenConfig {
    pub async fn load(root: &Path) -> Result<Self> {
        let config_path = root.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, root: &Path) -> Result<()> {
        self.validate()?;
        let config_path = root.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| WardenError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Collects every violation instead of stopping at the first one.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.orchestrator.max_parallel_ops == 0 {
            errors.push("max_parallel_ops must be greater than 0");
        }
        if self.orchestrator.poll_interval_secs == 0 {
            errors.push("poll_interval_secs must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WardenError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global cap on lifecycle transitions in flight at once.
    pub max_parallel_ops: usize,
    /// Interval of the status-polling loop.
    pub poll_interval_secs: u64,
    /// Remove a unit's directory after a failed install. Best-effort
    /// either way; the unit lands in Failed regardless.
    pub cleanup_failed_installs: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_ops: 4,
            poll_interval_secs: 10,
            cleanup_failed_installs: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// The supervision host binary copied (renamed) into each unit's
    /// directory at install time.
    pub binary_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub event_log: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            event_log: true,
        }
    }
}

/// Canonical directory layout under a root: per-unit isolated
/// directories, persisted records, event logs.
#[derive(Debug, Clone)]
pub struct ServicePaths {
    pub root: PathBuf,
    pub services_dir: PathBuf,
    pub units_dir: PathBuf,
    pub events_dir: PathBuf,
}

impl ServicePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            services_dir: root.join("services"),
            units_dir: root.join("units"),
            events_dir: root.join("events"),
            root,
        }
    }

    /// `services/{id}` — the unit's isolated directory.
    pub fn unit_dir(&self, unit_id: &str) -> PathBuf {
        self.services_dir.join(unit_id)
    }

    /// `services/{id}/logs` — the host's stdout/stderr capture area.
    pub fn unit_logs_dir(&self, unit_id: &str) -> PathBuf {
        self.unit_dir(unit_id).join("logs")
    }
}
