//! Supervision host invocation.
//!
//! The host is an opaque external binary. Each unit gets its own
//! renamed copy; `HostRunner` drives its subcommands and interprets
//! nothing but exit codes and the `status` subcommand's stdout.

mod runner;

pub use runner::{HostRunner, HostStatus};
