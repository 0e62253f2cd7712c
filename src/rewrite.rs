//! Reference-text rewriting for one document.
//!
//! Given a document's content, where it lives now, where it will live, and
//! which targets are moving, recompute every local reference and splice the
//! new text over the exact target spans. Text outside those spans is never
//! touched.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::paths;
use crate::types::ParsedDocument;

/// One reference whose text changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEdit {
    /// One-based line of the reference or definition.
    pub line: u32,
    /// Replacement target text.
    pub new_value: String,
    /// Original target text.
    pub old_value: String,
    /// Byte span of the original target text.
    span: Range<usize>,
}

/// Rewritten content plus the edits that produced it.
#[derive(Debug, Clone)]
pub struct Rewrite {
    /// Content after every edit.
    pub content: String,
    /// Edits in document order.
    pub edits: Vec<LinkEdit>,
}

impl Rewrite {
    /// Whether any reference changed.
    pub fn is_changed(&self) -> bool {
        return !self.edits.is_empty();
    }
}

/// Recompute one raw target.
///
/// A target in `moves` is re-expressed as its new location seen from
/// `new_doc`; any other target keeps its absolute location and is
/// re-expressed only if the document itself moved.
fn recompute(
    raw: &str,
    resolved: &Path,
    old_doc: &Path,
    new_doc: &Path,
    moves: &BTreeMap<PathBuf, PathBuf>,
    home: Option<&Path>,
) -> String {
    if let Some(new_target) = moves.get(resolved) {
        return paths::retarget(raw, new_doc, new_target, home);
    }
    if old_doc == new_doc {
        return raw.to_string();
    }
    return paths::rewrite_for_move(raw, old_doc, new_doc, home);
}

/// Rewrite `document`'s local references so they stay valid once the
/// document lives at `new_path` and every key of `moves` lives at its value.
///
/// `document` must be the extraction of `content` at `document.path`.
/// Named-reference usages carry no target text; their definitions are
/// rewritten instead.
pub fn rewrite_document(
    content: &str,
    document: &ParsedDocument,
    new_path: &Path,
    moves: &BTreeMap<PathBuf, PathBuf>,
    home: Option<&Path>,
) -> Rewrite {
    let old_path = document.path.as_path();
    let mut edits = Vec::new();

    let references = document.references.iter().filter(|r| return r.kind.is_local());
    for reference in references {
        let (Some(span), Some(resolved)) = (&reference.target_span, &reference.resolved_path) else {
            continue;
        };
        let new_value = recompute(&reference.raw_target, resolved, old_path, new_path, moves, home);
        if new_value != reference.raw_target {
            edits.push(LinkEdit {
                line: reference.source_position.line,
                new_value,
                old_value: reference.raw_target.clone(),
                span: span.clone(),
            });
        }
    }

    for definition in &document.definitions {
        let Some(resolved) = &definition.resolved_path else {
            continue;
        };
        let new_value = recompute(&definition.target, resolved, old_path, new_path, moves, home);
        if new_value != definition.target {
            edits.push(LinkEdit {
                line: definition.declaration_line,
                new_value,
                old_value: definition.target.clone(),
                span: definition.target_span.clone(),
            });
        }
    }

    edits.sort_by_key(|e| return e.span.start);
    let content = splice(content, &edits);
    return Rewrite { content, edits };
}

/// Replace each edit's span, last first so earlier offsets stay valid.
/// Edits whose span no longer holds the expected text are skipped.
fn splice(content: &str, edits: &[LinkEdit]) -> String {
    let mut output = content.to_string();
    for edit in edits.iter().rev() {
        if content.get(edit.span.clone()) != Some(edit.old_value.as_str()) {
            tracing::warn!(line = edit.line, "target `{}` moved under us; left as is", edit.old_value);
            continue;
        }
        output.replace_range(edit.span.clone(), &edit.new_value);
    }
    return output;
}
