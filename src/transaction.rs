//! Ordered, reversible filesystem mutations.
//!
//! Each step's undo action is captured when the step runs, not when it is
//! planned: content updates back up whatever is on disk at that moment.
//! Failure of a step rolls back every completed step in reverse order unless
//! the transaction was told to continue past errors.

use std::fmt;
use std::fs::Permissions;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use tempfile::TempDir;

use crate::config::RetryPolicy;
use crate::error::Error;

/// Closed set of step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Write a new file.
    CreateFile,
    /// Remove a file.
    DeleteFile,
    /// Rename a file.
    MoveFile,
    /// Replace a file's content.
    UpdateContent,
}

/// Lifecycle of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Ran to completion.
    Completed,
    /// Currently running.
    Executing,
    /// Failed after every retry. Stays here when later steps continue past
    /// the failure.
    Failed,
    /// Appended, not yet run.
    Planned,
    /// Reversed by a rollback: completed steps were undone, a failed step
    /// had already removed what its last attempt created.
    RolledBack,
}

/// Lifecycle of the whole transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionState {
    /// A step failed and completed steps were reversed.
    Aborted,
    /// Every step that was allowed to run has run; backups are gone.
    Committed,
    /// Steps are running.
    Executing,
    /// Steps are being appended; nothing has touched disk.
    Planning,
}

/// Forward action of a step.
#[derive(Debug)]
enum Action {
    /// Write `content` to a path that should not exist yet.
    Create {
        /// Text to write.
        content: String,
        /// File to create.
        path: PathBuf,
    },
    /// Remove a file.
    Delete {
        /// File to remove.
        path: PathBuf,
    },
    /// Rename `from` to `to`.
    Move {
        /// Current location.
        from: PathBuf,
        /// New location.
        to: PathBuf,
    },
    /// Replace the content of an existing file.
    Update {
        /// New text.
        content: String,
        /// File to rewrite.
        path: PathBuf,
    },
}

/// Reverse action, captured while the forward action ran.
#[derive(Debug)]
enum Undo {
    /// Put a moved file back and restore anything it replaced.
    MoveBack {
        /// Directories created for the destination, outermost first.
        created_dirs: Vec<PathBuf>,
        /// Where the file came from.
        from: PathBuf,
        /// Previous content of an overwritten destination.
        replaced: Option<Backup>,
        /// Where the file went.
        to: PathBuf,
    },
    /// Delete a created file and restore anything it replaced.
    RemoveCreated {
        /// Directories created for the file, outermost first.
        created_dirs: Vec<PathBuf>,
        /// The created file.
        path: PathBuf,
        /// Previous content of an overwritten file.
        replaced: Option<Backup>,
    },
    /// Write a backup over its original path.
    Restore(Backup),
}

/// A copy of a file taken before it was mutated.
#[derive(Debug)]
struct Backup {
    /// SHA-256 of the original bytes, lowercase hex.
    digest: String,
    /// File the copy was taken from.
    original: PathBuf,
    /// Permissions of the original, put back on restore.
    permissions: Permissions,
    /// Location of the copy inside the backup directory.
    stored: PathBuf,
}

/// Per-transaction backup directory, created on first use.
#[derive(Debug, Default)]
struct BackupStore {
    /// Number of backups taken so far; names the next file.
    count: usize,
    /// Backing directory, removed when dropped.
    dir: Option<TempDir>,
}

/// One planned mutation.
#[derive(Debug)]
struct Step {
    /// What to do.
    action: Action,
    /// Where it is in its lifecycle.
    status: StepStatus,
    /// How to reverse it, once it has run.
    undo: Option<Undo>,
}

/// A step failure or a rollback failure, with the step it belongs to.
#[derive(Debug)]
pub struct StepError {
    /// The error.
    pub error: Error,
    /// Zero-based index of the step.
    pub index: usize,
}

/// Outcome of `Transaction::execute`.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Indices of steps that completed and were not reversed.
    pub completed: Vec<usize>,
    /// Indices of steps that failed.
    pub failed: Vec<usize>,
    /// Failures that happened while reversing steps. Never fatal.
    pub rollback_errors: Vec<StepError>,
    /// Final state: committed or aborted.
    pub state: TransactionState,
    /// Failures of forward steps.
    pub step_errors: Vec<StepError>,
}

/// Ordered list of reversible filesystem mutations.
#[derive(Debug)]
pub struct Transaction {
    /// Backups owned by this transaction.
    backups: BackupStore,
    /// Skip failed steps instead of rolling back.
    continue_on_error: bool,
    /// Create missing parent directories for new files.
    create_directories: bool,
    /// Retry policy per step.
    retry: RetryPolicy,
    /// Global lifecycle.
    state: TransactionState,
    /// Steps in append order.
    steps: Vec<Step>,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            Self::Create { path, .. } => write!(f, "create {}", path.display()),
            Self::Delete { path } => write!(f, "delete {}", path.display()),
            Self::Move { from, to } => write!(f, "move {} -> {}", from.display(), to.display()),
            Self::Update { path, .. } => write!(f, "update {}", path.display()),
        };
    }
}

impl Action {
    /// Kind of this action.
    const fn kind(&self) -> StepKind {
        return match self {
            Self::Create { .. } => StepKind::CreateFile,
            Self::Delete { .. } => StepKind::DeleteFile,
            Self::Move { .. } => StepKind::MoveFile,
            Self::Update { .. } => StepKind::UpdateContent,
        };
    }
}

impl BackupStore {
    /// Remove every backup.
    fn purge(&mut self) {
        if let Some(dir) = self.dir.take()
            && let Err(e) = dir.close()
        {
            tracing::warn!("could not remove backup directory: {e}");
        }
        return;
    }

    /// Write a backup's bytes back over its original, after checking the
    /// digest recorded when it was taken.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackupCorrupt` if the stored copy changed, or
    /// `Error::RollbackFailed` if reading or writing fails.
    fn restore(backup: &Backup) -> Result<(), Error> {
        let step = format!("restore {}", backup.original.display());
        let bytes = std::fs::read(&backup.stored).map_err(|source| {
            return Error::RollbackFailed { source, step: step.clone() };
        })?;
        let found = sha256_hex(&bytes);
        if found != backup.digest {
            return Err(Error::BackupCorrupt {
                expected: backup.digest.clone(),
                found,
                original: backup.original.clone(),
            });
        }
        if let Some(parent) = backup.original.parent() {
            std::fs::create_dir_all(parent).map_err(|source| {
                return Error::RollbackFailed { source, step: step.clone() };
            })?;
        }
        write_atomic(&backup.original, &bytes, Some(backup.permissions.clone())).map_err(|source| {
            return Error::RollbackFailed { source, step };
        })?;
        return Ok(());
    }

    /// Copy `original` into the backup directory.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the original cannot be read or the copy
    /// cannot be written.
    fn take(&mut self, original: &Path) -> io::Result<Backup> {
        let bytes = std::fs::read(original)?;
        let permissions = std::fs::metadata(original)?.permissions();
        let dir = match &self.dir {
            Some(dir) => dir.path().to_path_buf(),
            None => {
                let created = tempfile::Builder::new().prefix("mdmove-backup-").tempdir()?;
                let path = created.path().to_path_buf();
                self.dir = Some(created);
                path
            },
        };
        let stored = dir.join(format!("{}.bak", self.count));
        std::fs::write(&stored, &bytes)?;
        self.count = self.count.saturating_add(1);
        tracing::debug!(original = %original.display(), stored = %stored.display(), "backed up");
        return Ok(Backup {
            digest: sha256_hex(&bytes),
            original: original.to_path_buf(),
            permissions,
            stored,
        });
    }
}

impl Transaction {
    /// Append a step that writes a new file.
    pub fn add_file_create(&mut self, path: PathBuf, content: String) {
        self.push(Action::Create { content, path });
        return;
    }

    /// Append a step that removes a file.
    pub fn add_file_delete(&mut self, path: PathBuf) {
        self.push(Action::Delete { path });
        return;
    }

    /// Append a step that renames a file.
    pub fn add_file_move(&mut self, from: PathBuf, to: PathBuf) {
        self.push(Action::Move { from, to });
        return;
    }

    /// Append a step that replaces a file's content. The previous content is
    /// read when the step runs.
    pub fn add_content_update(&mut self, path: PathBuf, content: String) {
        self.push(Action::Update { content, path });
        return;
    }

    /// Run a forward action once, returning its undo.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the first failing filesystem call. Anything
    /// this attempt created is removed again before returning.
    fn apply(&mut self, index: usize) -> io::Result<Undo> {
        let Some(step) = self.steps.get(index) else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no such step"));
        };

        return match &step.action {
            Action::Create { content, path } => {
                let replaced = if path.exists() { Some(self.backups.take(path)?) } else { None };
                let created_dirs = ensure_parent(path, self.create_directories)?;
                if let Err(e) = write_atomic(path, content.as_bytes(), None) {
                    remove_created_dirs(&created_dirs);
                    return Err(e);
                }
                Ok(Undo::RemoveCreated {
                    created_dirs,
                    path: path.clone(),
                    replaced,
                })
            },
            Action::Delete { path } => {
                let backup = self.backups.take(path)?;
                std::fs::remove_file(path)?;
                Ok(Undo::Restore(backup))
            },
            Action::Move { from, to } => {
                if !from.exists() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} does not exist", from.display()),
                    ));
                }
                let replaced = if to.exists() { Some(self.backups.take(to)?) } else { None };
                let created_dirs = ensure_parent(to, self.create_directories)?;
                if let Err(e) = rename_or_copy(from, to) {
                    remove_created_dirs(&created_dirs);
                    return Err(e);
                }
                Ok(Undo::MoveBack {
                    created_dirs,
                    from: from.clone(),
                    replaced,
                    to: to.clone(),
                })
            },
            Action::Update { content, path } => {
                let backup = self.backups.take(path)?;
                write_atomic(path, content.as_bytes(), None)?;
                Ok(Undo::Restore(backup))
            },
        };
    }

    /// Run every step in append order.
    ///
    /// A failing step is retried per the retry policy. If it still fails,
    /// either every completed step is reversed in reverse order (the
    /// default) or, with `continue_on_error`, the step is skipped and later
    /// steps still run. Backups are purged once execution ends.
    ///
    /// # Errors
    ///
    /// Returns `Error::TransactionFinished` if the transaction already ran.
    /// Step and rollback failures are reported in the `ExecutionReport`.
    pub fn execute(&mut self) -> Result<ExecutionReport, Error> {
        if self.state != TransactionState::Planning {
            return Err(Error::TransactionFinished);
        }
        self.state = TransactionState::Executing;
        tracing::info!(steps = self.steps.len(), "executing transaction");

        let mut step_errors = Vec::new();
        let mut rollback_errors = Vec::new();

        for index in 0..self.steps.len() {
            if let Err(error) = self.run_step(index) {
                tracing::warn!("{error}");
                step_errors.push(StepError { error, index });
                if !self.continue_on_error {
                    rollback_errors = self.rollback();
                    self.state = TransactionState::Aborted;
                    break;
                }
            }
        }

        if self.state == TransactionState::Executing {
            self.state = TransactionState::Committed;
        }
        self.backups.purge();

        let report = ExecutionReport {
            completed: self
                .steps
                .iter()
                .enumerate()
                .filter(|(_, s)| return s.status == StepStatus::Completed)
                .map(|(i, _)| return i)
                .collect(),
            failed: step_errors.iter().map(|e| return e.index).collect(),
            rollback_errors,
            state: self.state,
            step_errors,
        };
        tracing::info!(state = ?report.state, completed = report.completed.len(), "transaction finished");
        return Ok(report);
    }

    /// Number of appended steps.
    pub fn len(&self) -> usize {
        return self.steps.len();
    }

    /// Empty transaction in the planning state.
    pub fn new(retry: RetryPolicy) -> Self {
        return Self {
            backups: BackupStore::default(),
            continue_on_error: false,
            create_directories: true,
            retry,
            state: TransactionState::Planning,
            steps: Vec::new(),
        };
    }

    /// Planned steps as `(kind, description)` pairs, without touching disk.
    pub fn preview(&self) -> Vec<(StepKind, String)> {
        return self
            .steps
            .iter()
            .map(|s| return (s.action.kind(), s.action.to_string()))
            .collect();
    }

    /// Append a planned step.
    fn push(&mut self, action: Action) {
        tracing::debug!(step = %action, "planned");
        self.steps.push(Step {
            action,
            status: StepStatus::Planned,
            undo: None,
        });
        return;
    }

    /// Reverse every completed step, last first. Keeps going past failures
    /// and returns them. Failed steps have nothing left to undo and are
    /// marked rolled back as they are passed.
    fn rollback(&mut self) -> Vec<StepError> {
        tracing::warn!("rolling back transaction");
        let mut errors = Vec::new();
        for (index, step) in self.steps.iter_mut().enumerate().rev() {
            if step.status == StepStatus::Failed {
                step.status = StepStatus::RolledBack;
                continue;
            }
            if step.status != StepStatus::Completed {
                continue;
            }
            let Some(undo) = step.undo.take() else { continue };
            match reverse(undo) {
                Ok(()) => step.status = StepStatus::RolledBack,
                Err(error) => {
                    tracing::warn!("rollback: {error}");
                    errors.push(StepError { error, index });
                },
            }
        }
        return errors;
    }

    /// Run one step with retries.
    ///
    /// # Errors
    ///
    /// Returns `Error::StepFailed` once the step has failed permanently or
    /// exhausted its attempts.
    fn run_step(&mut self, index: usize) -> Result<(), Error> {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = StepStatus::Executing;
        }

        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt = attempt.saturating_add(1);
            match self.apply(index) {
                Ok(undo) => break Ok(undo),
                Err(e) if attempt < self.retry.attempts && is_transient(&e) => {
                    let delay = self.retry.backoff(attempt.saturating_sub(1));
                    tracing::warn!(attempt, ?delay, "step {index} failed, retrying: {e}");
                    std::thread::sleep(delay);
                },
                Err(e) => break Err(e),
            }
        };

        let Some(step) = self.steps.get_mut(index) else {
            return Ok(());
        };
        return match outcome {
            Ok(undo) => {
                tracing::debug!(step = %step.action, "completed");
                step.undo = Some(undo);
                step.status = StepStatus::Completed;
                Ok(())
            },
            Err(source) => {
                step.status = StepStatus::Failed;
                Err(Error::StepFailed {
                    attempts: attempt,
                    source,
                    step: step.action.to_string(),
                })
            },
        };
    }

    /// Skip failed steps instead of rolling back.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        return self;
    }

    /// Create missing parent directories for moved and created files.
    #[must_use]
    pub const fn with_create_directories(mut self, create_directories: bool) -> Self {
        self.create_directories = create_directories;
        return self;
    }
}

/// Create the missing ancestors of `path`, returning the ones created,
/// outermost first.
///
/// # Errors
///
/// Returns `NotFound` if the parent is missing and creation is disabled, or
/// the I/O error from `create_dir`.
fn ensure_parent(path: &Path, create: bool) -> io::Result<Vec<PathBuf>> {
    let Some(parent) = path.parent() else {
        return Ok(Vec::new());
    };
    if parent.as_os_str().is_empty() || parent.is_dir() {
        return Ok(Vec::new());
    }
    if !create {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("directory {} does not exist", parent.display()),
        ));
    }

    let mut missing: Vec<PathBuf> = parent
        .ancestors()
        .take_while(|p| return !p.as_os_str().is_empty() && !p.exists())
        .map(Path::to_path_buf)
        .collect();
    missing.reverse();

    let mut created = Vec::with_capacity(missing.len());
    for dir in missing {
        if let Err(e) = std::fs::create_dir(&dir) {
            remove_created_dirs(&created);
            return Err(e);
        }
        created.push(dir);
    }
    return Ok(created);
}

/// Errors that a retry cannot fix.
fn is_transient(error: &io::Error) -> bool {
    return !matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists | io::ErrorKind::InvalidInput
    );
}

/// Remove directories this transaction created, innermost first, as long as
/// they are empty.
fn remove_created_dirs(created: &[PathBuf]) {
    for dir in created.iter().rev() {
        if let Err(e) = std::fs::remove_dir(dir) {
            tracing::debug!(dir = %dir.display(), "left directory in place: {e}");
        }
    }
    return;
}

/// Rename, falling back to copy and remove when rename fails (for example
/// across filesystems).
///
/// # Errors
///
/// Returns the I/O error from the copy or remove when both strategies fail.
fn rename_or_copy(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(e) = std::fs::rename(from, to) {
        tracing::debug!("rename failed, copying instead: {e}");
        std::fs::copy(from, to)?;
        if let Err(e) = std::fs::remove_file(from) {
            if let Err(cleanup) = std::fs::remove_file(to) {
                tracing::debug!(path = %to.display(), "left copy in place: {cleanup}");
            }
            return Err(e);
        }
    }
    return Ok(());
}

/// Run an undo action.
///
/// # Errors
///
/// Returns `Error::RollbackFailed` or `Error::BackupCorrupt`.
fn reverse(undo: Undo) -> Result<(), Error> {
    match undo {
        Undo::MoveBack { created_dirs, from, replaced, to } => {
            rename_or_copy(&to, &from).map_err(|source| {
                return Error::RollbackFailed {
                    source,
                    step: format!("move {} back to {}", to.display(), from.display()),
                };
            })?;
            if let Some(backup) = replaced {
                BackupStore::restore(&backup)?;
            }
            remove_created_dirs(&created_dirs);
        },
        Undo::RemoveCreated { created_dirs, path, replaced } => {
            std::fs::remove_file(&path).map_err(|source| {
                return Error::RollbackFailed {
                    source,
                    step: format!("remove {}", path.display()),
                };
            })?;
            if let Some(backup) = replaced {
                BackupStore::restore(&backup)?;
            }
            remove_created_dirs(&created_dirs);
        },
        Undo::Restore(backup) => BackupStore::restore(&backup)?,
    }
    return Ok(());
}

/// Lowercase hex SHA-256 of some bytes.
fn sha256_hex(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    return format!("{hash:x}");
}

/// Write through a temporary file in the same directory, then rename over
/// the target, so readers never see a half-written file.
///
/// The file ends up with `permissions` if given, else with the permissions
/// of the file it replaces. A brand-new file gets the usual umask-derived
/// mode rather than the private mode of a temporary file.
///
/// # Errors
///
/// Returns the I/O error from creating, writing, or persisting the file.
fn write_atomic(path: &Path, bytes: &[u8], permissions: Option<Permissions>) -> io::Result<()> {
    use std::io::Write as _;

    let permissions = match permissions {
        Some(permissions) => Some(permissions),
        None => match std::fs::metadata(path) {
            Ok(metadata) => Some(metadata.permissions()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        },
    };

    let dir = path.parent().filter(|p| return !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    if permissions.is_none() {
        use std::os::unix::fs::PermissionsExt as _;
        builder.permissions(Permissions::from_mode(0o666));
    }
    let mut file = builder.tempfile_in(dir)?;
    file.write_all(bytes)?;
    if let Some(permissions) = permissions {
        file.as_file().set_permissions(permissions)?;
    }
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| return e.error)?;
    return Ok(());
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, clippy::indexing_slicing, reason = "tests")]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        return std::fs::read_to_string(path).unwrap();
    }

    fn listing(root: &Path) -> Vec<(PathBuf, String)> {
        let mut entries: Vec<(PathBuf, String)> = walkdir::WalkDir::new(root)
            .into_iter()
            .map(Result::unwrap)
            .map(|e| {
                let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
                let content = if e.file_type().is_file() { read(e.path()) } else { String::new() };
                return (relative, content);
            })
            .collect();
        entries.sort();
        return entries;
    }

    #[test]
    fn all_steps_commit() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        std::fs::write(&a, "alpha").unwrap();
        std::fs::write(&b, "beta").unwrap();

        let mut tx = Transaction::new(RetryPolicy::no_retry());
        tx.add_content_update(b.clone(), "see ./sub/a.md".to_string());
        tx.add_file_move(a.clone(), dir.path().join("sub/a.md"));
        tx.add_file_create(dir.path().join("c.md"), "gamma".to_string());
        let report = tx.execute().unwrap();

        assert_eq!(report.state, TransactionState::Committed);
        assert_eq!(report.completed, vec![0, 1, 2]);
        assert!(!a.exists());
        assert_eq!(read(&dir.path().join("sub/a.md")), "alpha");
        assert_eq!(read(&b), "see ./sub/a.md");
        assert!(tx.backups.dir.is_none());
    }

    #[test]
    fn failure_restores_everything() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        std::fs::write(&a, "alpha").unwrap();
        std::fs::write(&b, "beta").unwrap();
        let before = listing(dir.path());

        let mut tx = Transaction::new(RetryPolicy::no_retry());
        tx.add_content_update(b.clone(), "changed".to_string());
        tx.add_file_move(a.clone(), dir.path().join("deep/er/a.md"));
        tx.add_file_create(dir.path().join("new.md"), "new".to_string());
        tx.add_file_move(dir.path().join("missing.md"), dir.path().join("x.md"));
        let report = tx.execute().unwrap();

        assert_eq!(report.state, TransactionState::Aborted);
        assert_eq!(report.failed, vec![3]);
        assert!(report.completed.is_empty());
        assert!(report.rollback_errors.is_empty());
        assert_eq!(listing(dir.path()), before);
        assert!(tx.steps.iter().all(|s| return s.status == StepStatus::RolledBack));
    }

    #[test]
    fn continue_on_error_skips_failed_step() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.md");
        std::fs::write(&b, "beta").unwrap();

        let mut tx = Transaction::new(RetryPolicy::no_retry()).with_continue_on_error(true);
        tx.add_file_delete(dir.path().join("missing.md"));
        tx.add_content_update(b.clone(), "changed".to_string());
        let report = tx.execute().unwrap();

        assert_eq!(report.state, TransactionState::Committed);
        assert_eq!(report.failed, vec![0]);
        assert_eq!(report.completed, vec![1]);
        assert_eq!(read(&b), "changed");
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RetryPolicy {
            attempts: 5,
            initial_backoff: std::time::Duration::ZERO,
        };
        let mut tx = Transaction::new(policy);
        tx.add_file_delete(dir.path().join("missing.md"));
        let report = tx.execute().unwrap();
        assert!(matches!(
            report.step_errors[0].error,
            Error::StepFailed { attempts: 1, .. }
        ));
    }

    #[test]
    fn transient_failure_is_retried_until_it_clears() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("notes");
        std::fs::write(&blocker, "a file where a directory belongs").unwrap();

        let policy = RetryPolicy {
            attempts: 6,
            initial_backoff: std::time::Duration::from_millis(50),
        };
        let mut tx = Transaction::new(policy);
        tx.add_file_create(blocker.join("c.md"), "gamma".to_string());

        let unblock = {
            let blocker = blocker.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(10));
                std::fs::remove_file(&blocker).unwrap();
            })
        };
        let report = tx.execute().unwrap();
        unblock.join().unwrap();

        assert_eq!(report.state, TransactionState::Committed, "{:?}", report.step_errors);
        assert_eq!(report.completed, vec![0]);
        assert_eq!(read(&blocker.join("c.md")), "gamma");
    }

    #[test]
    fn transient_failure_uses_every_attempt_then_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.md");
        std::fs::write(&b, "beta").unwrap();
        let blocker = dir.path().join("notes");
        std::fs::write(&blocker, "a file where a directory belongs").unwrap();

        let policy = RetryPolicy {
            attempts: 3,
            initial_backoff: std::time::Duration::ZERO,
        };
        let mut tx = Transaction::new(policy);
        tx.add_content_update(b.clone(), "changed".to_string());
        tx.add_file_create(blocker.join("c.md"), "gamma".to_string());
        let report = tx.execute().unwrap();

        assert_eq!(report.state, TransactionState::Aborted);
        assert!(matches!(
            report.step_errors[0].error,
            Error::StepFailed { attempts: 3, .. }
        ));
        assert_eq!(read(&b), "beta");
        assert_eq!(tx.steps[1].status, StepStatus::RolledBack);
    }

    #[cfg(unix)]
    #[test]
    fn permissions_survive_commit_and_rollback() {
        use std::os::unix::fs::PermissionsExt as _;

        let mode = |path: &Path| return std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.md");
        let gone = dir.path().join("gone.md");
        std::fs::write(&b, "beta").unwrap();
        std::fs::write(&gone, "gone").unwrap();
        std::fs::set_permissions(&b, Permissions::from_mode(0o640)).unwrap();
        std::fs::set_permissions(&gone, Permissions::from_mode(0o751)).unwrap();
        let reference = dir.path().join("reference.md");
        std::fs::write(&reference, "").unwrap();

        let mut tx = Transaction::new(RetryPolicy::no_retry());
        tx.add_content_update(b.clone(), "changed".to_string());
        tx.add_file_create(dir.path().join("new.md"), "new".to_string());
        assert_eq!(tx.execute().unwrap().state, TransactionState::Committed);
        assert_eq!(mode(&b), 0o640);
        assert_eq!(mode(&dir.path().join("new.md")), mode(&reference));

        let mut tx = Transaction::new(RetryPolicy::no_retry());
        tx.add_content_update(b.clone(), "again".to_string());
        tx.add_file_delete(gone.clone());
        tx.add_file_move(dir.path().join("missing.md"), dir.path().join("x.md"));
        assert_eq!(tx.execute().unwrap().state, TransactionState::Aborted);
        assert_eq!(read(&b), "changed");
        assert_eq!(mode(&b), 0o640);
        assert_eq!(mode(&gone), 0o751);
    }

    #[test]
    fn missing_directory_without_creation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        std::fs::write(&a, "alpha").unwrap();

        let mut tx = Transaction::new(RetryPolicy::no_retry()).with_create_directories(false);
        tx.add_file_move(a.clone(), dir.path().join("nope/a.md"));
        let report = tx.execute().unwrap();
        assert_eq!(report.state, TransactionState::Aborted);
        assert!(a.exists());
    }

    #[test]
    fn preview_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut tx = Transaction::new(RetryPolicy::no_retry());
        tx.add_file_create(dir.path().join("c.md"), "gamma".to_string());
        tx.add_file_delete(dir.path().join("d.md"));
        let preview = tx.preview();
        assert_eq!(preview.len(), 2);
        assert_eq!(preview[0].0, StepKind::CreateFile);
        assert!(preview[1].1.starts_with("delete "));
        assert!(!dir.path().join("c.md").exists());
    }

    #[test]
    fn second_execute_is_rejected() {
        let mut tx = Transaction::new(RetryPolicy::no_retry());
        tx.execute().unwrap();
        assert!(matches!(tx.execute(), Err(Error::TransactionFinished)));
    }

    #[test]
    fn corrupt_backup_is_reported_not_restored() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.md");
        std::fs::write(&b, "beta").unwrap();

        let mut store = BackupStore::default();
        let backup = store.take(&b).unwrap();
        std::fs::write(&backup.stored, "tampered").unwrap();
        std::fs::write(&b, "changed").unwrap();

        assert!(matches!(BackupStore::restore(&backup), Err(Error::BackupCorrupt { .. })));
        assert_eq!(read(&b), "changed");
    }
}
