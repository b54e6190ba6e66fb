use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, WardenError};

/// Machine-readable answer of the host's `status` subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Started,
    Stopped,
    NonExistent,
    /// Anything the host printed that this crate does not recognize.
    Unknown,
}

impl HostStatus {
    fn parse(stdout: &str) -> Self {
        match stdout.trim() {
            "Started" => Self::Started,
            "Stopped" => Self::Stopped,
            "NonExistent" => Self::NonExistent,
            _ => Self::Unknown,
        }
    }
}

/// Async wrapper around one unit's renamed host binary. All
/// subcommands run with the unit's isolated directory as working
/// context; stdout/stderr are captured for diagnostics but never
/// interpreted as control signals.
pub struct HostRunner {
    unit_dir: PathBuf,
    binary: PathBuf,
}

impl HostRunner {
    pub fn new(unit_dir: impl Into<PathBuf>, binary: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            binary: binary.into(),
        }
    }

    /// Conventional name of the per-unit host binary copy.
    pub fn binary_name(unit_id: &str) -> String {
        format!("{}.exe", unit_id)
    }

    pub async fn run(&self, subcommand: &str) -> Result<Output> {
        debug!(
            binary = %self.binary.display(),
            subcommand,
            dir = %self.unit_dir.display(),
            "Invoking supervision host"
        );

        let output = Command::new(&self.binary)
            .arg(subcommand)
            .current_dir(&self.unit_dir)
            .output()
            .await
            .map_err(|e| WardenError::SubprocessFailure {
                command: subcommand.to_string(),
                code: None,
                stderr: format!("failed to launch host binary: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(subcommand, code = ?output.status.code(), stderr = %stderr, "Host command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, subcommand: &str) -> Result<Output> {
        let output = self.run(subcommand).await?;

        if !output.status.success() {
            return Err(WardenError::SubprocessFailure {
                command: subcommand.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }

    pub async fn install(&self) -> Result<()> {
        self.run_checked("install").await?;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.run_checked("start").await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.run_checked("stop").await?;
        Ok(())
    }

    pub async fn uninstall(&self) -> Result<()> {
        self.run_checked("uninstall").await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<HostStatus> {
        let output = self.run("status").await?;
        if !output.status.success() {
            // A host that cannot answer for an unregistered unit is
            // treated as "not registered", not as an operational error.
            return Ok(HostStatus::NonExistent);
        }
        Ok(HostStatus::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    pub fn unit_dir(&self) -> &Path {
        &self.unit_dir
    }
}
