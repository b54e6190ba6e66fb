use crate::error::{Result, WardenError};

/// Classic MAX_PATH. Anything longer is rejected outright rather than
/// relying on extended-length prefixes, which PathGuard also rejects.
const MAX_PATH_LEN: usize = 260;

/// Device names reserved by the platform, matched case-insensitively
/// against the extension-stripped final path component.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters never valid inside a path component.
const INVALID_CHARS: &[char] = &['<', '>', '"', '|', '?', '*'];

/// Pure path validation. No filesystem access: existence checks are a
/// separate concern of the caller.
pub struct PathGuard;

impl PathGuard {
    /// Validates a path for use as an executable, script, or working
    /// directory. Accepts only absolute, local paths with no traversal
    /// segments, returning the specific rule that tripped on rejection.
    pub fn validate(path: &str) -> Result<()> {
        let reject = |reason: &str| {
            Err(WardenError::PathRejected {
                path: path.to_string(),
                reason: reason.to_string(),
            })
        };

        if path.trim().is_empty() {
            return reject("empty path");
        }
        if path.len() > MAX_PATH_LEN {
            return reject("path exceeds maximum length");
        }
        if path.chars().any(|c| c.is_control()) {
            return reject("control character in path");
        }

        // Catches `..\`, `../`, and doubled-separator or dot-padded
        // obfuscations in one check. Legitimate registered targets
        // never contain consecutive dots.
        if path.contains("..") {
            return reject("parent directory traversal");
        }

        // UNC and extended-length forms (\\host\share, \\?\, \\.\, //host).
        if path.starts_with("\\\\") || path.starts_with("//") {
            return reject("UNC path");
        }

        if !is_absolute(path) {
            return reject("path must be absolute");
        }

        for component in components(path) {
            if component.is_empty() {
                continue;
            }
            if component.chars().any(|c| INVALID_CHARS.contains(&c)) {
                return reject("invalid character in path component");
            }
            // ':' is only legal as part of the drive prefix, which
            // components() already strips.
            if component.contains(':') {
                return reject("invalid character in path component");
            }
        }

        if let Some(last) = components(path).filter(|c| !c.is_empty()).last() {
            let stem = last.split('.').next().unwrap_or(last);
            let upper = stem.trim().to_ascii_uppercase();
            if RESERVED_NAMES.contains(&upper.as_str()) {
                return reject("reserved device name");
            }
        }

        Ok(())
    }

    pub fn is_valid(path: &str) -> bool {
        Self::validate(path).is_ok()
    }
}

/// Absolute means a drive-letter prefix (`C:\` or `C:/`) or a
/// rooted separator. UNC forms are rejected before this runs.
fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
    {
        return true;
    }
    bytes[0] == b'/' || bytes[0] == b'\\'
}

/// Splits on both separator styles, skipping any drive prefix.
fn components(path: &str) -> impl Iterator<Item = &str> {
    let rest = if path.len() >= 2 && path.as_bytes()[1] == b':' {
        &path[2..]
    } else {
        path
    };
    rest.split(['/', '\\'])
}
