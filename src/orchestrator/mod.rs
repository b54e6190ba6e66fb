//! Lifecycle orchestration.
//!
//! Coordinates every unit state transition:
//! - `Orchestrator`: the concurrency-controlled transition driver and
//!   sole owner of the unit registry
//! - `CancelSignal`: per-unit cancellation of pending transitions
//! - `StatusPoller`: periodic reconciliation against the host's view

mod engine;
mod poller;
mod signal;

pub use engine::{BatchOutcome, Orchestrator};
pub use poller::StatusPoller;
pub use signal::CancelSignal;
