use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::unit::UnitState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UnitRegistered,
    UnitUpdated,
    UnitRemoved,
    StateChanged,
    TransitionFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnitRegistered => "unit.registered",
            Self::UnitUpdated => "unit.updated",
            Self::UnitRemoved => "unit.removed",
            Self::StateChanged => "unit.state_changed",
            Self::TransitionFailed => "unit.transition_failed",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::TransitionFailed)
    }
}

/// One state-transition (or registry) event pushed to the
/// notification sinks after the fact. Carries no control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitEvent {
    pub event_type: EventType,
    pub unit_id: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<UnitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<UnitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UnitEvent {
    pub fn new(event_type: EventType, unit_id: impl Into<String>) -> Self {
        Self {
            event_type,
            unit_id: unit_id.into(),
            at: Utc::now(),
            from: None,
            to: None,
            message: None,
        }
    }

    pub fn with_transition(mut self, from: UnitState, to: UnitState) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{} {}", self.event_type.as_str(), self.unit_id)];
        if let (Some(from), Some(to)) = (self.from, self.to) {
            parts.push(format!("{} -> {}", from, to));
        }
        if let Some(msg) = &self.message {
            parts.push(msg.clone());
        }
        parts.join(": ")
    }
}
