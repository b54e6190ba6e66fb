use tracing::debug;

use super::PathGuard;
use crate::error::{Result, WardenError};

/// Shells and script hosts that must not be registered directly as a
/// managed executable: doing so grants ambient shell access and
/// bypasses the single-purpose-process model. Matched against the
/// lowercased, extension-stripped basename.
const DENIED_EXECUTABLES: &[&str] = &[
    "cmd", "command", "powershell", "pwsh", "wscript", "cscript", "mshta", "sh", "bash", "zsh",
    "ksh", "csh", "dash",
];

/// Multi-character shell operators rejected anywhere in an argument
/// string. A single `|`, `>` or `<` is checked separately.
const DENIED_SEQUENCES: &[&str] = &["&&", "||", "$(", "${"];

const DENIED_CHARS: &[char] = &[';', '|', '>', '<', '`'];

pub struct CommandGuard;

impl CommandGuard {
    /// Validates a path for registration as the managed executable:
    /// PathGuard rules plus the interpreter deny-list.
    pub fn validate_executable(path: &str) -> Result<()> {
        PathGuard::validate(path)?;

        let basename = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path)
            .to_ascii_lowercase();
        let stem = basename.split('.').next().unwrap_or(&basename);

        if DENIED_EXECUTABLES.contains(&stem) {
            debug!(path, "Rejected shell binary as managed executable");
            return Err(WardenError::CommandRejected {
                reason: format!("'{}' is a shell and cannot be registered directly", stem),
            });
        }

        Ok(())
    }

    pub fn is_valid_executable(path: &str) -> bool {
        Self::validate_executable(path).is_ok()
    }

    /// Validates an argument string against shell metacharacters and
    /// control sequences. Reject-and-report: the string is returned
    /// unchanged on success, never truncated or rewritten, and never
    /// executed or interpreted here. An empty string is valid.
    pub fn sanitize_arguments(args: &str) -> Result<String> {
        let reject = |reason: String| Err(WardenError::CommandRejected { reason });

        if args.chars().any(|c| c.is_control()) {
            return reject("control character in arguments".to_string());
        }

        for seq in DENIED_SEQUENCES {
            if args.contains(seq) {
                return reject(format!("shell sequence '{}' in arguments", seq));
            }
        }

        if let Some(c) = args.chars().find(|c| DENIED_CHARS.contains(c)) {
            return reject(format!("shell metacharacter '{}' in arguments", c));
        }

        // %NAME% environment expansion. Lone '%'s (e.g. "50%") are
        // fine; every adjacent pair of percents is checked, so a stray
        // percent earlier in the string does not hide a token.
        let percents: Vec<usize> = args.match_indices('%').map(|(i, _)| i).collect();
        for pair in percents.windows(2) {
            let name = &args[pair[0] + 1..pair[1]];
            if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return reject(format!("environment expansion '%{}%' in arguments", name));
            }
        }

        Ok(args.to_string())
    }
}
