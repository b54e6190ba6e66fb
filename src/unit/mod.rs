//! The managed-unit data model.
//!
//! - `UnitRecord`: one registered background process and its invariants
//! - `UnitState`: lifecycle state machine driven by the orchestrator
//! - `UnitStore`: load/save persistence contract for the unit set

mod state;
mod store;
mod types;

pub use state::{StateTransition, UnitState};
pub use store::UnitStore;
pub use types::{
    generate_id, Interpreter, LaunchTarget, RestartPolicy, StartMode, UnitRecord,
};
