//! Reference extraction: one markdown document in, its outbound references
//! out. Link, image, and definition syntax comes from the pulldown-cmark event
//! stream; `@path` import directives are matched separately outside code.

use std::collections::BTreeSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use pulldown_cmark::{Event, LinkType, Options, Parser, Tag, TagEnd};
use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::Error;
use crate::paths;
use crate::types::{
    Extraction, NamedReferenceDefinition, ParsedDocument, Reference, ReferenceKind, SourcePosition,
};

/// `@path` preceded by start-of-line or whitespace.
#[allow(clippy::expect_used, reason = "pattern is a compile-time constant")]
static IMPORT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| return Regex::new(r"(?m)(^|\s)@([^\s`<>\[\]()]+)").expect("valid regex"));

/// URL schemes that always mean an external target.
const EXTERNAL_SCHEMES: [&str; 4] = ["http://", "https://", "ftp://", "mailto:"];

/// Every markdown document under a root, extracted.
pub struct ProjectScan {
    /// Successfully extracted documents, sorted by path.
    pub documents: Vec<ParsedDocument>,
    /// Files skipped or references dropped, one message each.
    pub warnings: Vec<String>,
}

/// A link or image whose end event has not arrived yet.
struct PendingLink {
    /// Target as decoded by the parser.
    dest: String,
    /// Definition label for reference-style links.
    id: String,
    /// Whether this is `![..](..)`.
    is_image: bool,
    /// Syntax flavor reported by the parser.
    link_type: LinkType,
    /// Byte offset where the link syntax starts.
    start: usize,
    /// Accumulated link text / alt text.
    text: String,
    /// Furthest byte offset covered by an inner event.
    text_end: usize,
}

/// Byte offsets of line starts, for offset → line/column conversion.
struct LineIndex {
    /// Byte offset at which each line begins.
    line_starts: Vec<usize>,
}

impl LineIndex {
    /// Index the line starts of `text`.
    fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| return i.saturating_add(1)));
        return Self { line_starts };
    }

    /// One-based line and character column of a byte offset.
    fn position(&self, text: &str, offset: usize) -> SourcePosition {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(next) => next.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_idx).copied().unwrap_or(0);
        let column = text.get(line_start..offset).map_or(0, |s| return s.chars().count());
        return SourcePosition {
            column: to_u32(column.saturating_add(1)),
            line: to_u32(line_idx.saturating_add(1)),
        };
    }
}

/// Classify a raw target by its syntax alone.
pub fn classify(raw: &str) -> ReferenceKind {
    let lowered = raw.to_ascii_lowercase();
    if EXTERNAL_SCHEMES.iter().any(|s| return lowered.starts_with(s)) || lowered.contains("://") {
        return ReferenceKind::ExternalUrl;
    }
    if raw.starts_with('#') {
        return ReferenceKind::InDocumentAnchor;
    }
    return ReferenceKind::LocalFile;
}

/// Byte ranges of inline code and code blocks, where `@` is never a directive.
fn collect_code_ranges(content: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut block_start: Option<usize> = None;
    for (event, range) in Parser::new_ext(content, parser_options()).into_offset_iter() {
        match event {
            Event::Code(_) => ranges.push(range),
            Event::Start(Tag::CodeBlock(_)) => block_start = Some(range.start),
            Event::End(TagEnd::CodeBlock) => {
                let start = block_start.take().unwrap_or(range.start);
                ranges.push(start..range.end);
            },
            _ => {},
        }
    }
    return ranges;
}

/// Parse one document into its references and definitions.
///
/// Pure function of `content`: nothing beyond the document is read.
/// References whose target cannot be located or parsed are dropped and
/// reported in `Extraction::warnings`.
pub fn extract(content: &str, path: &Path, home: Option<&Path>) -> Extraction {
    let lines = LineIndex::new(content);
    let base_dir = path.parent().unwrap_or(Path::new("/"));
    let mut warnings = Vec::new();

    let parser = Parser::new_ext(content, parser_options());
    let definitions = extract_definitions(&parser, content, &lines, base_dir, home, path, &mut warnings);
    let mut references = extract_links(parser, content, &lines, base_dir, home, path, &mut warnings);
    references.extend(extract_imports(content, &lines, base_dir, home));
    references.sort_by_key(|r| return r.source_position);

    let mut dependencies: BTreeSet<PathBuf> = references
        .iter()
        .filter_map(|r| return r.resolved_path.clone())
        .collect();
    dependencies.extend(definitions.iter().filter_map(|d| return d.resolved_path.clone()));
    // Self-links are rewritten with the document itself, never graph edges.
    dependencies.remove(path);

    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    return Extraction {
        document: ParsedDocument {
            definitions,
            dependents: Vec::new(),
            local_dependencies: dependencies.into_iter().collect(),
            path: path.to_path_buf(),
            references,
        },
        warnings,
    };
}

/// Collect `[label]: target` definitions from the parser's definition table.
fn extract_definitions(
    parser: &Parser<'_>,
    content: &str,
    lines: &LineIndex,
    base_dir: &Path,
    home: Option<&Path>,
    path: &Path,
    warnings: &mut Vec<String>,
) -> Vec<NamedReferenceDefinition> {
    let mut definitions = Vec::new();
    for (label, def) in parser.reference_definitions().iter() {
        let Some(target_span) = locate_definition_target(content, def.span.clone()) else {
            warnings.push(format!(
                "{}: could not locate target of definition [{label}]",
                path.display()
            ));
            continue;
        };
        let target = content.get(target_span.clone()).unwrap_or_default().to_string();
        let resolved_path = match classify(&target) {
            ReferenceKind::LocalFile => resolve_local(&target, base_dir, home),
            _ => None,
        };
        definitions.push(NamedReferenceDefinition {
            declaration_line: lines.position(content, def.span.start).line,
            id: label.to_string(),
            resolved_path,
            target,
            target_span,
            title: def.title.as_ref().map(|t| return t.to_string()),
        });
    }
    definitions.sort_by_key(|d| return d.target_span.start);
    return definitions;
}

/// Extract one markdown file from disk.
///
/// # Errors
///
/// Returns `Error::ParseFailed` if the file cannot be read as UTF-8 text.
pub fn extract_file(path: &Path, home: Option<&Path>) -> Result<Extraction, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        return Error::ParseFailed {
            file: path.to_path_buf(),
            reason: e.to_string(),
        };
    })?;
    return Ok(extract(&content, path, home));
}

/// Find `@path` import directives outside of code.
fn extract_imports(
    content: &str,
    lines: &LineIndex,
    base_dir: &Path,
    home: Option<&Path>,
) -> Vec<Reference> {
    let code = collect_code_ranges(content);
    let mut imports = Vec::new();

    for cap in IMPORT_PATTERN.captures_iter(content) {
        let Some(token) = cap.get(2) else { continue };
        let raw = token.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if raw.is_empty() || !(raw.contains('/') || raw.contains('.')) {
            continue;
        }
        let at_offset = token.start().saturating_sub(1);
        if code.iter().any(|r| return r.contains(&at_offset)) {
            continue;
        }

        let span = token.start()..token.start().saturating_add(raw.len());
        imports.push(Reference {
            display_text: None,
            is_absolute_form: paths::is_absolute_form(raw),
            kind: ReferenceKind::ImportDirective,
            named_reference_id: None,
            raw_target: raw.to_string(),
            resolved_path: resolve_local(raw, base_dir, home),
            source_position: lines.position(content, at_offset),
            target_span: Some(span),
        });
    }
    return imports;
}

/// Walk the event stream and turn every link and image into a reference.
fn extract_links(
    parser: Parser<'_>,
    content: &str,
    lines: &LineIndex,
    base_dir: &Path,
    home: Option<&Path>,
    path: &Path,
    warnings: &mut Vec<String>,
) -> Vec<Reference> {
    let mut references = Vec::new();
    let mut stack: Vec<PendingLink> = Vec::new();

    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(Tag::Link { link_type, dest_url, id, .. }) => {
                stack.push(PendingLink {
                    dest: dest_url.to_string(),
                    id: id.to_string(),
                    is_image: false,
                    link_type,
                    start: range.start,
                    text: String::new(),
                    text_end: range.start.saturating_add(1),
                });
            },
            Event::Start(Tag::Image { link_type, dest_url, id, .. }) => {
                stack.push(PendingLink {
                    dest: dest_url.to_string(),
                    id: id.to_string(),
                    is_image: true,
                    link_type,
                    start: range.start,
                    text: String::new(),
                    text_end: range.start.saturating_add(2),
                });
            },
            Event::End(TagEnd::Link | TagEnd::Image) => {
                let Some(pending) = stack.pop() else { continue };
                if let Some(outer) = stack.last_mut() {
                    outer.text_end = outer.text_end.max(range.end);
                }
                match finish_link(pending, range.end, content, lines, base_dir, home) {
                    Ok(Some(reference)) => references.push(reference),
                    Ok(None) => {},
                    Err(reason) => warnings.push(format!("{}: {reason}", path.display())),
                }
            },
            Event::Text(text) | Event::Code(text) => {
                if let Some(pending) = stack.last_mut() {
                    pending.text.push_str(&text);
                    pending.text_end = pending.text_end.max(range.end);
                }
            },
            _ => {
                if let Some(pending) = stack.last_mut() {
                    pending.text_end = pending.text_end.max(range.end);
                }
            },
        }
    }
    return references;
}

/// Build the reference for a completed link or image.
///
/// # Errors
///
/// Returns a human-readable reason when the target cannot be located or is
/// unusable; the caller records it as a warning.
fn finish_link(
    pending: PendingLink,
    end: usize,
    content: &str,
    lines: &LineIndex,
    base_dir: &Path,
    home: Option<&Path>,
) -> Result<Option<Reference>, String> {
    let position = lines.position(content, pending.start);
    let display_text = if pending.text.is_empty() { None } else { Some(pending.text) };

    match pending.link_type {
        LinkType::Inline => {},
        LinkType::Reference | LinkType::Collapsed | LinkType::Shortcut => {
            return Ok(Some(Reference {
                display_text,
                is_absolute_form: paths::is_absolute_form(&pending.dest),
                kind: ReferenceKind::NamedReference,
                named_reference_id: Some(pending.id),
                raw_target: pending.dest,
                resolved_path: None,
                source_position: position,
                target_span: None,
            }));
        },
        LinkType::Autolink | LinkType::Email => {
            return Ok(Some(Reference {
                display_text,
                is_absolute_form: false,
                kind: ReferenceKind::ExternalUrl,
                named_reference_id: None,
                raw_target: pending.dest,
                resolved_path: None,
                source_position: position,
                target_span: None,
            }));
        },
        _ => return Ok(None),
    }

    let Some(span) = locate_inline_target(content, pending.text_end, end) else {
        return Err(format!(
            "{}:{}: could not locate link target `{}`",
            position.line, position.column, pending.dest
        ));
    };
    let raw = content.get(span.clone()).unwrap_or_default();
    if raw.is_empty() {
        return Err(format!("{}:{}: empty link target", position.line, position.column));
    }
    if raw.contains('\0') {
        return Err(format!("{}:{}: link target contains NUL", position.line, position.column));
    }

    let kind = match (classify(raw), pending.is_image) {
        (ReferenceKind::LocalFile, true) => ReferenceKind::EmbeddedImage,
        (other, _) => other,
    };
    let resolved_path = if kind.is_local() { resolve_local(raw, base_dir, home) } else { None };

    return Ok(Some(Reference {
        display_text,
        is_absolute_form: paths::is_absolute_form(raw),
        kind,
        named_reference_id: None,
        raw_target: raw.to_string(),
        resolved_path,
        source_position: position,
        target_span: Some(span),
    }));
}

/// Span of the destination in `[label]: <dest> "title"`.
fn locate_definition_target(content: &str, span: Range<usize>) -> Option<Range<usize>> {
    let slice = content.get(span.clone())?;
    let colon = slice.find("]:")?;
    let after = span.start.checked_add(colon)?.checked_add(2)?;
    return locate_destination(content, after, span.end);
}

/// Span of the destination text starting at or after `from`, skipping
/// leading whitespace. `<...>` destinations yield the inside of the brackets;
/// bare destinations end at whitespace or an unbalanced `)`.
fn locate_destination(content: &str, from: usize, limit: usize) -> Option<Range<usize>> {
    let rest = content.get(from..limit)?;
    let skipped = rest.len().saturating_sub(rest.trim_start().len());
    let start = from.checked_add(skipped)?;
    let tail = content.get(start..limit)?;

    if let Some(inner) = tail.strip_prefix('<') {
        let close = inner.find('>')?;
        let begin = start.checked_add(1)?;
        return Some(begin..begin.checked_add(close)?);
    }

    let mut depth = 0_usize;
    let mut len = tail.len();
    let mut escaped = false;
    for (i, c) in tail.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '(' => depth = depth.saturating_add(1),
            ')' if depth == 0 => {
                len = i;
                break;
            },
            ')' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() => {
                len = i;
                break;
            },
            _ => {},
        }
    }
    return Some(start..start.checked_add(len)?);
}

/// Span of the destination in `[text](dest "title")`, given where the link
/// text ended and where the whole link ends.
fn locate_inline_target(content: &str, text_end: usize, end: usize) -> Option<Range<usize>> {
    let search_from = text_end.saturating_sub(1);
    let window = content.get(search_from..end)?;
    let open = window.find("](")?;
    let after = search_from.checked_add(open)?.checked_add(2)?;
    return locate_destination(content, after, end);
}

/// Parser extensions enabled for every document.
fn parser_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    return options;
}

/// Resolve the path part of a local target, ignoring any `#fragment`.
fn resolve_local(raw: &str, base_dir: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let (path_part, _) = paths::split_fragment(raw);
    if path_part.is_empty() {
        return None;
    }
    return paths::resolve(path_part, base_dir, home);
}

/// Scan all markdown files under `root` and extract each one.
/// Applies the config's include/exclude filters and the `max_files` bound.
/// Unreadable files become warnings; extraction runs in parallel.
pub fn scan(root: &Path, config: &Config, home: Option<&Path>) -> ProjectScan {
    let mut warnings = Vec::new();
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let at = e.path().unwrap_or(root);
                tracing::warn!(path = %at.display(), "not scanned: {e}");
                warnings.push(format!("{}: not scanned: {e}", at.display()));
                continue;
            },
        };
        if !entry.file_type().is_file() || !paths::is_document(entry.path()) {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if config.should_scan(&paths::to_slash(relative)) {
            files.push(paths::normalize(entry.path()));
        }
    }
    files.sort();

    if files.len() > config.max_files {
        warnings.push(format!(
            "scan limit reached: {} documents found, only the first {} are indexed",
            files.len(),
            config.max_files
        ));
        files.truncate(config.max_files);
    }

    let results: Vec<Result<Extraction, Error>> =
        files.par_iter().map(|path| return extract_file(path, home)).collect();

    let mut documents = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(extraction) => {
                warnings.extend(extraction.warnings);
                documents.push(extraction.document);
            },
            Err(e) => {
                tracing::warn!("skipping document: {e}");
                warnings.push(e.to_string());
            },
        }
    }

    tracing::debug!(count = documents.len(), root = %root.display(), "scanned project");
    return ProjectScan { documents, warnings };
}

/// Saturating conversion for positions.
fn to_u32(value: usize) -> u32 {
    return u32::try_from(value).unwrap_or(u32::MAX);
}
