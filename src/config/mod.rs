//! Configuration types and loading.
//!
//! - `WardenConfig`: TOML-backed top-level configuration with validation
//! - `ServicePaths`: canonical on-disk layout under a root directory

mod settings;

pub use settings::{
    HostConfig, NotificationConfig, OrchestratorConfig, ServicePaths, WardenConfig,
};
