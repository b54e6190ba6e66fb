//! Supervision-host descriptor generation.
//!
//! Renders a `UnitRecord` into the XML document the supervision host
//! consumes. Every user-supplied value is escaped before insertion so
//! operator text can never become document structure, and output is
//! byte-deterministic for identical input.

use std::fmt::Write;

use tracing::debug;

use crate::error::{Result, WardenError};
use crate::unit::{LaunchTarget, UnitRecord};

pub struct DescriptorGenerator;

impl DescriptorGenerator {
    /// Name of the descriptor file inside a unit's directory.
    pub fn file_name(unit_id: &str) -> String {
        format!("{}.xml", unit_id)
    }

    /// Generates the descriptor document. Fails with a structural
    /// error instead of emitting malformed output when the unit has
    /// no launch target; validation should have caught that earlier.
    pub fn generate(unit: &UnitRecord) -> Result<String> {
        if unit.id.trim().is_empty() {
            return Err(WardenError::DescriptorGeneration(
                "unit id is empty".to_string(),
            ));
        }

        let target = unit.launch_target().map_err(|e| {
            WardenError::DescriptorGeneration(format!(
                "unit {} has no usable launch target: {}",
                unit.id, e
            ))
        })?;

        // Script units run through their interpreter; the script path
        // is prepended to the configured arguments.
        let (executable, arguments) = match &target {
            LaunchTarget::Executable(path) => {
                (path.to_string_lossy().to_string(), unit.arguments.clone())
            }
            LaunchTarget::Script { path, interpreter } => {
                let mut args = interpreter
                    .flags()
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>();
                args.push(format!("\"{}\"", path.to_string_lossy()));
                if !unit.arguments.trim().is_empty() {
                    args.push(unit.arguments.clone());
                }
                (interpreter.command().to_string(), args.join(" "))
            }
        };

        let working_dir = unit.effective_working_directory().map_err(|e| {
            WardenError::DescriptorGeneration(format!(
                "unit {} has no working directory: {}",
                unit.id, e
            ))
        })?;

        let mut doc = String::with_capacity(1024);
        doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        doc.push_str("<service>\n");
        element(&mut doc, "id", &unit.id);
        element(&mut doc, "name", &unit.display_name);
        element(&mut doc, "description", &unit.description);
        element(&mut doc, "executable", &executable);
        if !arguments.trim().is_empty() {
            element(&mut doc, "arguments", &arguments);
        }
        element(&mut doc, "workingdirectory", &working_dir.to_string_lossy());

        // BTreeMap iteration is name-sorted: insertion order of the
        // mapping is irrelevant and output stays deterministic.
        for (name, value) in &unit.environment {
            let _ = writeln!(
                doc,
                "  <env name=\"{}\" value=\"{}\"/>",
                escape_xml(name),
                escape_xml(value)
            );
        }

        if let Some(account) = &unit.service_account {
            doc.push_str("  <serviceaccount>\n");
            let _ = writeln!(doc, "    <username>{}</username>", escape_xml(account));
            doc.push_str("  </serviceaccount>\n");
        }

        element(&mut doc, "startmode", unit.start_mode.as_str());
        element(&mut doc, "stoptimeout", &format!("{}ms", unit.stop_timeout_ms));
        element(&mut doc, "logpath", "logs");

        // Absence is the "off" representation: no directive is written
        // for units without restart-on-exit.
        if unit.restart_policy.enabled {
            let _ = writeln!(
                doc,
                "  <onfailure action=\"restart\" exitcode=\"{}\"/>",
                unit.restart_policy.exit_code
            );
        }

        doc.push_str("</service>\n");

        debug!(unit_id = %unit.id, bytes = doc.len(), "Descriptor generated");
        Ok(doc)
    }
}

fn element(doc: &mut String, tag: &str, value: &str) {
    let _ = writeln!(doc, "  <{}>{}</{}>", tag, escape_xml(value), tag);
}

/// Escapes the five XML-special characters in text and attribute
/// values. Applied to every untrusted string before insertion.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
