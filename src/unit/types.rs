use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{StateTransition, UnitState};
use crate::error::{Result, WardenError};
use crate::guard::{CommandGuard, PathGuard};

/// Generates a fresh unit id. Opaque, unique, assigned once at
/// creation; doubles as the isolation-directory name and the
/// dependency-graph node key.
pub fn generate_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("svc-{}", &uuid[..12])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    #[default]
    Manual,
    Automatic,
    Disabled,
}

impl StartMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "Manual",
            Self::Automatic => "Automatic",
            Self::Disabled => "Disabled",
        }
    }
}

/// Restart-on-exit directive forwarded to the supervision host.
/// Disabled by default; exit code 99 is the conventional trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub exit_code: i32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            exit_code: 99,
        }
    }
}

/// Closed mapping from script extension to interpreter invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpreter {
    Python,
    PowerShell,
    Cmd,
}

impl Interpreter {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "py" => Some(Self::Python),
            "ps1" => Some(Self::PowerShell),
            "bat" | "cmd" => Some(Self::Cmd),
            _ => None,
        }
    }

    pub fn for_script(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn command(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::PowerShell => "powershell",
            Self::Cmd => "cmd",
        }
    }

    /// Flags inserted between the interpreter and the script path.
    pub fn flags(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &[],
            Self::PowerShell => &["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"],
            Self::Cmd => &["/c"],
        }
    }
}

/// What a unit actually launches: a binary directly, or a script via
/// its inferred interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    Executable(PathBuf),
    Script { path: PathBuf, interpreter: Interpreter },
}

/// One manageable background process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,

    /// Exactly one of `executable_path` / `script_path` must be set.
    pub executable_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,

    #[serde(default)]
    pub arguments: String,

    /// Defaults to the parent directory of the launch target.
    pub working_directory: Option<PathBuf>,

    /// Ids of units that must be running first. Insertion order is
    /// preserved so dependency sequencing stays deterministic.
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    pub service_account: Option<String>,

    #[serde(default)]
    pub start_mode: StartMode,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default)]
    pub restart_policy: RestartPolicy,

    #[serde(default)]
    pub status: UnitState,

    pub created_at: DateTime<Utc>,
    pub installed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub state_history: Vec<StateTransition>,
}

fn default_stop_timeout_ms() -> u64 {
    15_000
}

impl UnitRecord {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: String::new(),
            executable_path: None,
            script_path: None,
            arguments: String::new(),
            working_directory: None,
            dependencies: Vec::new(),
            environment: BTreeMap::new(),
            service_account: None,
            start_mode: StartMode::Manual,
            stop_timeout_ms: default_stop_timeout_ms(),
            restart_policy: RestartPolicy::default(),
            status: UnitState::Uninstalled,
            created_at: Utc::now(),
            installed_at: None,
            state_history: Vec::new(),
        }
    }

    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_path = Some(path.into());
        self
    }

    pub fn with_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_path = Some(path.into());
        self
    }

    pub fn with_arguments(mut self, args: impl Into<String>) -> Self {
        self.arguments = args.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    pub fn with_start_mode(mut self, mode: StartMode) -> Self {
        self.start_mode = mode;
        self
    }

    pub fn with_stop_timeout_ms(mut self, ms: u64) -> Self {
        self.stop_timeout_ms = ms;
        self
    }

    pub fn with_restart_on_exit(mut self, exit_code: i32) -> Self {
        self.restart_policy = RestartPolicy {
            enabled: true,
            exit_code,
        };
        self
    }

    pub fn with_service_account(mut self, account: impl Into<String>) -> Self {
        self.service_account = Some(account.into());
        self
    }

    /// Resolves the launch target, enforcing the XOR rule and the
    /// closed interpreter mapping.
    pub fn launch_target(&self) -> Result<LaunchTarget> {
        match (&self.executable_path, &self.script_path) {
            (Some(exe), None) => Ok(LaunchTarget::Executable(exe.clone())),
            (None, Some(script)) => {
                let interpreter = Interpreter::for_script(script).ok_or_else(|| {
                    WardenError::InvalidUnit(format!(
                        "no interpreter known for script {}",
                        script.display()
                    ))
                })?;
                Ok(LaunchTarget::Script {
                    path: script.clone(),
                    interpreter,
                })
            }
            (Some(_), Some(_)) => Err(WardenError::InvalidUnit(
                "executable_path and script_path are mutually exclusive".to_string(),
            )),
            (None, None) => Err(WardenError::InvalidUnit(
                "one of executable_path or script_path must be set".to_string(),
            )),
        }
    }

    /// Working directory for the managed process, defaulting to the
    /// launch target's parent directory unless explicitly overridden.
    /// Parent derivation is lexical over both separator styles so a
    /// `C:\`-style target behaves the same on every build host.
    pub fn effective_working_directory(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.working_directory {
            return Ok(dir.clone());
        }
        let target = self.launch_target()?;
        let path = match &target {
            LaunchTarget::Executable(p) => p,
            LaunchTarget::Script { path, .. } => path,
        };
        let raw = path.to_string_lossy();
        let idx = raw.rfind(['/', '\\']).ok_or_else(|| {
            WardenError::InvalidUnit("launch target has no parent directory".into())
        })?;
        if idx == 0 {
            return Ok(PathBuf::from(&raw[..1]));
        }
        Ok(PathBuf::from(&raw[..idx]))
    }

    /// Full validation before persistence or descriptor generation:
    /// XOR target rule, both guards, self-dependency. Dependency
    /// existence and cycles are the resolver's job.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(WardenError::InvalidUnit("unit id is empty".to_string()));
        }
        if self.display_name.trim().is_empty() {
            return Err(WardenError::InvalidUnit(format!(
                "unit {} has no display name",
                self.id
            )));
        }

        let target = self.launch_target()?;
        match &target {
            LaunchTarget::Executable(path) => {
                CommandGuard::validate_executable(&path.to_string_lossy())?;
            }
            LaunchTarget::Script { path, .. } => {
                PathGuard::validate(&path.to_string_lossy())?;
            }
        }

        if let Some(dir) = &self.working_directory {
            PathGuard::validate(&dir.to_string_lossy())?;
        }

        CommandGuard::sanitize_arguments(&self.arguments)?;

        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(WardenError::InvalidUnit(format!(
                "unit {} depends on itself",
                self.id
            )));
        }

        if self.stop_timeout_ms == 0 {
            return Err(WardenError::InvalidUnit(format!(
                "unit {} has a zero stop timeout",
                self.id
            )));
        }

        Ok(())
    }

    /// Records a transition in the unit's history and applies it.
    /// Callers are expected to have checked `can_transition_to`.
    pub fn transition(&mut self, to: UnitState, reason: impl Into<String>) {
        self.state_history
            .push(StateTransition::new(self.status, to, reason));
        if to == UnitState::Installed && self.installed_at.is_none() {
            self.installed_at = Some(Utc::now());
        }
        self.status = to;
    }
}
