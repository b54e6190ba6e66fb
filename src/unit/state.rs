use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed unit. Mutated only by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    #[default]
    Uninstalled,
    Installing,
    Installed,
    Starting,
    Running,
    Stopping,
    Stopped,
    Uninstalling,
    /// Unrecoverable error requiring operator intervention. No
    /// transition leaves this state automatically; an explicit retry
    /// (re-install) or teardown is the only way out.
    Failed,
}

impl UnitState {
    pub fn allowed_transitions(&self) -> &'static [UnitState] {
        use UnitState::*;
        match self {
            Uninstalled => &[Installing],
            Installing => &[Installed, Failed],
            Installed => &[Starting, Uninstalling],
            Starting => &[Running, Failed],
            Running => &[Stopping],
            Stopping => &[Stopped, Failed],
            Stopped => &[Starting, Uninstalling],
            Uninstalling => &[Uninstalled, Failed],
            Failed => &[Installing, Uninstalling],
        }
    }

    pub fn can_transition_to(&self, target: UnitState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Uninstalled | UnitState::Failed)
    }

    /// A transition is currently in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UnitState::Installing
                | UnitState::Starting
                | UnitState::Stopping
                | UnitState::Uninstalling
        )
    }

    pub fn is_registered(&self) -> bool {
        !matches!(
            self,
            UnitState::Uninstalled | UnitState::Installing | UnitState::Failed
        )
    }

    pub fn can_start(&self) -> bool {
        matches!(self, UnitState::Installed | UnitState::Stopped)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, UnitState::Running)
    }

    pub fn can_uninstall(&self) -> bool {
        matches!(
            self,
            UnitState::Installed | UnitState::Stopped | UnitState::Running | UnitState::Failed
        )
    }

    pub fn can_install(&self) -> bool {
        matches!(self, UnitState::Uninstalled | UnitState::Failed)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninstalled => "Uninstalled",
            Self::Installing => "Installing",
            Self::Installed => "Installed",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Uninstalling => "Uninstalling",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: UnitState,
    pub to: UnitState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: UnitState, to: UnitState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}
