//! Crate-level error types for mdmove diagnostics.
use std::path::PathBuf;

/// All errors in mdmove carry enough context to produce a useful diagnostic
/// without a debugger. Each variant names the file, step, or reason for failure.
#[allow(clippy::error_impl_error, reason = "crate-internal error type in binary")]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A backup no longer matches the digest recorded when it was taken.
    #[error("backup corrupt for {}: expected sha256 {expected}, found {found}", original.display())]
    BackupCorrupt {
        /// Digest recorded when the backup was taken.
        expected: String,
        /// Digest of the backup file at restore time.
        found: String,
        /// File the backup was taken from.
        original: PathBuf,
    },

    /// The destination already exists and `--force` was not given.
    #[error("destination exists: {} (use --force to overwrite)", path.display())]
    DestinationExists {
        /// The colliding destination.
        path: PathBuf,
    },

    /// Two moves in one batch target the same destination.
    #[error("two moves target the same destination: {}", path.display())]
    DuplicateDestination {
        /// The shared destination.
        path: PathBuf,
    },

    /// A path argument was empty.
    #[error("empty path")]
    EmptyPath,

    /// A referenced file does not exist on disk.
    #[error("file not found: {}", path.display())]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// A path contains a byte no filesystem accepts.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path, lossily rendered.
        path: String,
        /// Why the path was rejected.
        reason: &'static str,
    },

    /// Underlying I/O error from the filesystem.
    #[error("io: {0}")]
    Io(
        /// The wrapped I/O error.
        #[from]
        std::io::Error,
    ),

    /// JSON serialization of an operation result failed.
    #[error("json: {0}")]
    Json(
        /// The wrapped serde_json error.
        #[from]
        serde_json::Error,
    ),

    /// The file is not a markdown document.
    #[error("not a markdown document: {}", path.display())]
    NotADocument {
        /// The rejected file.
        path: PathBuf,
    },

    /// The path escapes the project root.
    #[error("{} is outside the project root {}", path.display(), root.display())]
    OutsideRoot {
        /// The escaping path.
        path: PathBuf,
        /// The project root.
        root: PathBuf,
    },

    /// A document could not be read or parsed.
    #[error("parse failed: {}: {reason}", file.display())]
    ParseFailed {
        /// File that failed to parse.
        file: PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// Reversing a completed step failed. Recorded, never propagated.
    #[error("rollback of `{step}` failed: {source}")]
    RollbackFailed {
        /// Description of the step being reversed.
        step: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Source and destination resolve to the same absolute path.
    #[error("source and destination are the same: {}", path.display())]
    SameSourceAndDestination {
        /// The shared path.
        path: PathBuf,
    },

    /// A batch entry names a source an earlier entry already moved.
    #[error("{} was already moved to {} earlier in this batch", path.display(), moved_to.display())]
    SourceAlreadyMoved {
        /// Where the earlier entry put it.
        moved_to: PathBuf,
        /// The source named twice.
        path: PathBuf,
    },

    /// A transaction step failed after every retry.
    #[error("step `{step}` failed after {attempts} attempt(s): {source}")]
    StepFailed {
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying I/O error.
        source: std::io::Error,
        /// Description of the failing step.
        step: String,
    },

    /// TOML deserialization failed.
    #[error("toml deserialize: {0}")]
    TomlDe(
        /// The wrapped TOML deserialization error.
        #[from]
        toml::de::Error,
    ),

    /// `execute()` was called on a transaction that already ran.
    #[error("transaction already executed")]
    TransactionFinished,
}
