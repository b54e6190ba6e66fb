//! State-transition event notification.
//!
//! The orchestrator publishes a `UnitEvent` after every transition;
//! sinks (event log, channel) consume them without ever feeding back
//! into lifecycle logic.

mod events;
mod notifier;

pub use events::{EventType, UnitEvent};
pub use notifier::{ChannelSink, EventLogSink, NotificationSink, Notifier};
