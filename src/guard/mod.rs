//! Input validation guards.
//!
//! Every user-supplied path or command-line fragment passes through a
//! guard before it reaches a generated descriptor or a subprocess:
//! - `PathGuard`: filesystem path validation (traversal, UNC, reserved
//!   names, invalid characters, length)
//! - `CommandGuard`: executable identity and argument sanitization

mod command;
mod path;

pub use command::CommandGuard;
pub use path::PathGuard;
