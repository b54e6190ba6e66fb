//! Tracing setup for embedding binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` overrides the default
/// filter; call once at startup.
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "svcwarden=debug"
    } else {
        "svcwarden=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
