use std::fmt::Write as _;
use std::path::Path;

use crate::error::Error;

/// ANSI bold.
const BOLD: &str = "\x1b[1m";
/// ANSI reset.
const RESET: &str = "\x1b[0m";

/// Render an error as valid markdown with bold headings and print to stderr.
pub fn print_error(e: &Error) {
    let md = render_error(e);
    for line in md.lines() {
        if line.starts_with('#') {
            eprintln!("{BOLD}{line}{RESET}");
        } else {
            eprintln!("{line}");
        }
    }
    return;
}

/// Render an error as a structured markdown diagnostic.
///
/// Each variant produces a block with what happened and, where the user can
/// do something about it, how to fix it.
pub fn render_error(e: &Error) -> String {
    return match e {
        Error::DestinationExists { path } => render_destination_exists(path),
        Error::SameSourceAndDestination { path } => render_same_path(path),
        Error::OutsideRoot { path, root } => render_outside_root(path, root),
        Error::NotADocument { path } => render_not_a_document(path),
        Error::SourceAlreadyMoved { moved_to, path } => render_already_moved(path, moved_to),
        _ => render_generic(e),
    };
}

/// Variants that need no more than a heading and the message.
fn render_generic(e: &Error) -> String {
    let title = match e {
        Error::BackupCorrupt { .. } => "Backup Corrupt",
        Error::DuplicateDestination { .. } => "Duplicate Destination",
        Error::EmptyPath => "Empty Path",
        Error::FileNotFound { .. } => "File Not Found",
        Error::InvalidPath { .. } => "Invalid Path",
        Error::Io(_) => "I/O",
        Error::Json(_) => "JSON Output",
        Error::ParseFailed { .. } => "Parse Failed",
        Error::RollbackFailed { .. } => "Rollback Failed",
        Error::StepFailed { .. } => "Step Failed",
        Error::TomlDe(_) => "Invalid `.mdmove.toml`",
        Error::TransactionFinished => "Transaction Already Executed",
        _ => "Error",
    };
    return format!("\
# Error: {title}

{e}
");
}

/// A batch names the same source twice.
fn render_already_moved(path: &Path, moved_to: &Path) -> String {
    return format!("\
# Error: Source Moved Twice

`{}` already moves to `{}` earlier in this batch.

## Fix

Name each source once.
", path.display(), moved_to.display());
}

/// The destination is taken.
fn render_destination_exists(path: &Path) -> String {
    return format!("\
# Error: Destination Exists

`{}` already exists.

## Fix

Pick another destination, or overwrite it:

    mdmove move --force <SOURCE> {}
", path.display(), path.display());
}

/// Source or destination is not markdown.
fn render_not_a_document(path: &Path) -> String {
    let mut out = format!("\
# Error: Not a Markdown Document

`{}` is not a `.md` or `.markdown` file.
", path.display());
    if path.extension().is_none() {
        let _ = write!(out, "\n## Fix\n\nTo move into a directory, end the destination with `/`:\n\n    {}/\n", path.display());
    }
    return out;
}

/// A path escapes the project root.
fn render_outside_root(path: &Path, root: &Path) -> String {
    return format!("\
# Error: Outside Project Root

`{}` is not under `{}`.

## Fix

Run from the right directory, pass `--root`, or set
`allow_outside_root = true` in `.mdmove.toml`.
", path.display(), root.display());
}

/// Source and destination normalize to one path.
fn render_same_path(path: &Path) -> String {
    return format!("\
# Error: Source and Destination Are the Same

Both resolve to `{}`. Nothing to move.
", path.display());
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, reason = "tests")]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn destination_exists_suggests_force() {
        let md = render_error(&Error::DestinationExists { path: PathBuf::from("docs/b.md") });
        assert!(md.starts_with("# Error: Destination Exists"));
        assert!(md.contains("--force"));
    }

    #[test]
    fn extensionless_destination_hints_at_directory() {
        let md = render_error(&Error::NotADocument { path: PathBuf::from("docs/sub") });
        assert!(md.contains("docs/sub/"));
        let md = render_error(&Error::NotADocument { path: PathBuf::from("notes.txt") });
        assert!(!md.contains("## Fix"));
    }

    #[test]
    fn generic_variants_keep_message() {
        let md = render_error(&Error::EmptyPath);
        assert!(md.starts_with("# Error: Empty Path"));
        assert!(md.contains("empty path"));
    }
}
