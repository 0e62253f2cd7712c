//! Post-hoc link validation: does every local reference still land on a
//! file that exists?

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::scanner;

/// Outcome of validating a set of documents.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Number of local references whose target is missing.
    pub broken_link_count: usize,
    /// One line per broken link or unreadable document.
    pub errors: Vec<String>,
    /// Whether no broken links or unreadable documents were found.
    pub valid: bool,
}

/// Check every local reference and local definition in `files`.
/// Fragments are ignored; only the path part must exist.
pub fn validate_files(files: &[PathBuf], home: Option<&Path>) -> ValidationReport {
    let mut report = ValidationReport::default();

    for file in files {
        let extraction = match scanner::extract_file(file, home) {
            Ok(extraction) => extraction,
            Err(e) => {
                report.errors.push(e.to_string());
                continue;
            },
        };
        let document = extraction.document;

        for reference in document.references.iter().filter(|r| return r.kind.is_local()) {
            if let Some(resolved) = &reference.resolved_path
                && !resolved.exists()
            {
                report.broken_link_count = report.broken_link_count.saturating_add(1);
                report.errors.push(format!(
                    "{}:{}:{}: broken link `{}` ({} does not exist)",
                    file.display(),
                    reference.source_position.line,
                    reference.source_position.column,
                    reference.raw_target,
                    resolved.display()
                ));
            }
        }

        for definition in &document.definitions {
            if let Some(resolved) = &definition.resolved_path
                && !resolved.exists()
            {
                report.broken_link_count = report.broken_link_count.saturating_add(1);
                report.errors.push(format!(
                    "{}:{}: broken definition [{}]: `{}` ({} does not exist)",
                    file.display(),
                    definition.declaration_line,
                    definition.id,
                    definition.target,
                    resolved.display()
                ));
            }
        }
    }

    report.valid = report.errors.is_empty();
    tracing::debug!(files = files.len(), broken = report.broken_link_count, "validated");
    return report;
}
