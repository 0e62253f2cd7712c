//! Core domain types for extracted references and parsed documents.
use std::ops::Range;
use std::path::PathBuf;

use serde::Serialize;

/// What a reference points at, decided once during extraction.
/// Closed set: every consumer matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    /// `![alt](path)` pointing at a local file.
    EmbeddedImage,
    /// `http`, `https`, `ftp`, or `mailto` target.
    ExternalUrl,
    /// `@path` transclusion directive.
    ImportDirective,
    /// `#fragment` inside the same document.
    InDocumentAnchor,
    /// `[text](path)` pointing at a local file.
    LocalFile,
    /// `[text][id]` usage resolved through a definition.
    NamedReference,
}

impl ReferenceKind {
    /// Whether references of this kind carry a resolved absolute path.
    pub const fn is_local(self) -> bool {
        return matches!(self, Self::EmbeddedImage | Self::ImportDirective | Self::LocalFile);
    }
}

/// One-based line and column of a reference in its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SourcePosition {
    /// One-based character column.
    pub column: u32,
    /// One-based line number.
    pub line: u32,
}

/// One outbound pointer found in a document.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    /// Link text or image alt text, when the syntax has one.
    pub display_text: Option<String>,
    /// Whether the raw target is an absolute or home-relative path.
    pub is_absolute_form: bool,
    /// Classification of the raw target.
    pub kind: ReferenceKind,
    /// Label of the definition this usage goes through.
    pub named_reference_id: Option<String>,
    /// The target string exactly as written.
    pub raw_target: String,
    /// Normalized absolute path, only for local kinds. Need not exist on disk.
    pub resolved_path: Option<PathBuf>,
    /// Where the reference starts.
    pub source_position: SourcePosition,
    /// Byte span of `raw_target` in the document. `None` for named-reference
    /// usages, whose target text lives in the definition.
    #[serde(skip)]
    pub target_span: Option<Range<usize>>,
}

/// A `[label]: target "title"` binding declared in a document.
#[derive(Debug, Clone, Serialize)]
pub struct NamedReferenceDefinition {
    /// Line the definition is declared on (one-based).
    pub declaration_line: u32,
    /// Normalized label.
    pub id: String,
    /// Resolved absolute path when the target is local.
    pub resolved_path: Option<PathBuf>,
    /// Target URL or path as written.
    pub target: String,
    /// Byte span of `target` in the document.
    #[serde(skip)]
    pub target_span: Range<usize>,
    /// Optional link title.
    pub title: Option<String>,
}

/// Result of extracting one document. Immutable after extraction except for
/// `dependents`, which only the dependency graph fills in.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedDocument {
    /// Reference definitions declared in the document.
    pub definitions: Vec<NamedReferenceDefinition>,
    /// Documents whose references resolve to this one.
    pub dependents: Vec<PathBuf>,
    /// Deduplicated absolute paths this document points at.
    pub local_dependencies: Vec<PathBuf>,
    /// Absolute path of the document.
    pub path: PathBuf,
    /// Every reference in document order.
    pub references: Vec<Reference>,
}

/// Output of the extractor: the document plus anything it had to drop.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The parsed document.
    pub document: ParsedDocument,
    /// One message per dropped reference.
    pub warnings: Vec<String>,
}
