//! svcwarden — service lifecycle and dependency orchestration engine.
//!
//! Registers arbitrary executables or scripts as supervised background
//! processes by generating descriptors for an external supervision
//! host and driving its install/start/stop/uninstall lifecycle per
//! unit, with validated inputs, dependency-ordered sequencing, and
//! per-unit isolated directories.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod guard;
pub mod host;
pub mod logging;
pub mod notification;
pub mod orchestrator;
pub mod resolver;
pub mod unit;

pub use config::{ServicePaths, WardenConfig};
pub use descriptor::DescriptorGenerator;
pub use error::{Result, WardenError};
pub use guard::{CommandGuard, PathGuard};
pub use host::{HostRunner, HostStatus};
pub use notification::{ChannelSink, EventLogSink, EventType, NotificationSink, Notifier, UnitEvent};
pub use orchestrator::{BatchOutcome, Orchestrator, StatusPoller};
pub use resolver::DependencyResolver;
pub use unit::{
    generate_id, Interpreter, LaunchTarget, RestartPolicy, StartMode, StateTransition, UnitRecord,
    UnitState, UnitStore,
};
