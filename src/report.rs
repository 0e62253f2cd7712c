//! The externally visible outcome of one top-level operation.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::rewrite::LinkEdit;

/// What a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    /// A file's content changed as a whole.
    ContentModified,
    /// A file was written.
    FileCreated,
    /// A file was removed.
    FileDeleted,
    /// A file was renamed.
    FileMoved,
    /// One reference's target text changed.
    LinkUpdated,
}

/// One entry in the ordered change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// File the change applies to, at its final location.
    pub file_path: PathBuf,
    /// Kind of change.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// One-based line, for link updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Value after the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    /// Value before the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
}

/// Success flag, touched files, change log, errors and warnings.
/// Built once per operation and never mutated after it is returned.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    /// Broken links found by the post-move validator, when it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_link_count: Option<usize>,
    /// Ordered change records.
    pub changes: Vec<ChangeRecord>,
    /// Files written that did not exist before.
    pub created_files: Vec<PathBuf>,
    /// Files removed.
    pub deleted_files: Vec<PathBuf>,
    /// Whether this was a preview.
    pub dry_run: bool,
    /// Human-readable failures.
    pub errors: Vec<String>,
    /// Existing files whose content changed.
    pub modified_files: Vec<PathBuf>,
    /// Step descriptions, filled for dry runs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_steps: Vec<String>,
    /// Whether the operation fully succeeded.
    pub success: bool,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
}

impl ChangeRecord {
    /// A whole-file content change.
    pub const fn content_modified(file_path: PathBuf) -> Self {
        return Self {
            file_path,
            kind: ChangeKind::ContentModified,
            line: None,
            new_value: None,
            old_value: None,
        };
    }

    /// A file that was written.
    pub const fn file_created(file_path: PathBuf) -> Self {
        return Self {
            file_path,
            kind: ChangeKind::FileCreated,
            line: None,
            new_value: None,
            old_value: None,
        };
    }

    /// A file that was removed.
    pub const fn file_deleted(file_path: PathBuf) -> Self {
        return Self {
            file_path,
            kind: ChangeKind::FileDeleted,
            line: None,
            new_value: None,
            old_value: None,
        };
    }

    /// A rename; the record is filed under the destination.
    pub fn file_moved(from: &Path, to: &Path) -> Self {
        return Self {
            file_path: to.to_path_buf(),
            kind: ChangeKind::FileMoved,
            line: None,
            new_value: Some(to.display().to_string()),
            old_value: Some(from.display().to_string()),
        };
    }

    /// A rewritten reference.
    pub fn link_updated(file_path: PathBuf, edit: &LinkEdit) -> Self {
        return Self {
            file_path,
            kind: ChangeKind::LinkUpdated,
            line: Some(edit.line),
            new_value: Some(edit.new_value.clone()),
            old_value: Some(edit.old_value.clone()),
        };
    }
}

impl OperationResult {
    /// Plain-text summary for a terminal. Paths are shown relative to
    /// `root` where possible; `verbose` adds one line per change record.
    pub fn render_human(&self, root: &Path, verbose: bool) -> String {
        let show = |p: &Path| -> String {
            return p.strip_prefix(root).unwrap_or(p).display().to_string();
        };
        let mut out = String::new();

        if self.dry_run {
            let _ = writeln!(out, "Dry run: {} planned step(s)", self.planned_steps.len());
            for step in &self.planned_steps {
                let _ = writeln!(out, "  {step}");
            }
        }

        for change in &self.changes {
            let line = match change.kind {
                ChangeKind::FileMoved => {
                    let from = change.old_value.as_deref().map_or_else(String::new, |v| {
                        return show(Path::new(v));
                    });
                    Some(format!("moved    {from} -> {}", show(&change.file_path)))
                },
                ChangeKind::FileCreated => Some(format!("created  {}", show(&change.file_path))),
                ChangeKind::FileDeleted => Some(format!("deleted  {}", show(&change.file_path))),
                ChangeKind::ContentModified => Some(format!("updated  {}", show(&change.file_path))),
                ChangeKind::LinkUpdated if verbose => Some(format!(
                    "  {}:{}  {} -> {}",
                    show(&change.file_path),
                    change.line.unwrap_or(0),
                    change.old_value.as_deref().unwrap_or(""),
                    change.new_value.as_deref().unwrap_or("")
                )),
                ChangeKind::LinkUpdated => None,
            };
            if let Some(line) = line {
                let _ = writeln!(out, "{line}");
            }
        }

        let links = self.changes.iter().filter(|c| return c.kind == ChangeKind::LinkUpdated).count();
        let verb = if self.dry_run { "would update" } else { "updated" };
        let _ = writeln!(
            out,
            "{} link(s) {verb} across {} file(s)",
            links,
            self.modified_files.len().saturating_add(self.created_files.len())
        );
        if let Some(broken) = self.broken_link_count {
            let _ = writeln!(out, "{broken} broken link(s) after the operation");
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "warning: {warning}");
        }
        for error in &self.errors {
            let _ = writeln!(out, "error: {error}");
        }
        return out;
    }
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, reason = "tests")]
mod tests {
    use super::*;

    #[test]
    fn json_uses_camel_case_and_kebab_kinds() {
        let result = OperationResult {
            changes: vec![ChangeRecord::file_moved(Path::new("/p/a.md"), Path::new("/p/sub/a.md"))],
            success: true,
            ..OperationResult::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["changes"][0]["type"], "file-moved");
        assert_eq!(json["changes"][0]["filePath"], "/p/sub/a.md");
        assert_eq!(json["changes"][0]["oldValue"], "/p/a.md");
        assert!(json["changes"][0].get("line").is_none());
        assert!(json.get("modifiedFiles").is_some());
        assert!(json.get("brokenLinkCount").is_none());
    }

    #[test]
    fn human_summary_is_relative_to_root() {
        let result = OperationResult {
            changes: vec![
                ChangeRecord::file_moved(Path::new("/p/a.md"), Path::new("/p/sub/a.md")),
                ChangeRecord::content_modified(PathBuf::from("/p/d.md")),
            ],
            modified_files: vec![PathBuf::from("/p/d.md")],
            success: true,
            ..OperationResult::default()
        };
        let text = result.render_human(Path::new("/p"), false);
        assert!(text.contains("moved    a.md -> sub/a.md"));
        assert!(text.contains("updated  d.md"));
        assert!(text.contains("0 link(s) updated across 1 file(s)"));
    }
}
