use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Path rejected: {reason}: {path}")]
    PathRejected { path: String, reason: String },

    #[error("Command rejected: {reason}")]
    CommandRejected { reason: String },

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Unit already exists: {0}")]
    UnitAlreadyExists(String),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Missing dependency: {unit_id} requires unknown unit {dependency_id}")]
    MissingDependency {
        unit_id: String,
        dependency_id: String,
    },

    #[error("Cyclic dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Descriptor generation failed: {0}")]
    DescriptorGeneration(String),

    #[error("Host '{command}' failed (exit code {code:?}): {stderr}")]
    SubprocessFailure {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Invalid transition for unit {unit_id}: {from} -> {to}")]
    InvalidTransition {
        unit_id: String,
        from: String,
        to: String,
    },

    #[error("Stop timed out after {timeout_ms}ms for unit {unit_id}")]
    StopTimeout { unit_id: String, timeout_ms: u64 },

    #[error("Unit {0} is disabled and cannot be started")]
    UnitDisabled(String),

    #[error("Operation cancelled for unit {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl WardenError {
    /// Guard rejections and validation failures are the caller's
    /// mistake; everything else is operational.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::PathRejected { .. }
                | Self::CommandRejected { .. }
                | Self::InvalidUnit(_)
                | Self::MissingDependency { .. }
                | Self::CyclicDependency { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
