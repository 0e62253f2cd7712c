//! Move orchestration: validate a batch of moves (or a join), build the
//! dependency graph over the project, recompute every affected reference,
//! and stage the rewrites plus the file operations into one transaction.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::config::{Config, MoveOptions};
use crate::error::Error;
use crate::graph::DependencyGraph;
use crate::paths;
use crate::report::{ChangeRecord, OperationResult};
use crate::rewrite::{self, LinkEdit, Rewrite};
use crate::scanner;
use crate::transaction::{Transaction, TransactionState};
use crate::validate;

/// Options for `Project::join`.
#[derive(Debug, Clone)]
pub struct JoinOptions {
    /// Leave the source documents (and their dependents) untouched.
    pub keep_sources: bool,
    /// Shared move options.
    pub options: MoveOptions,
    /// Order sources dependencies-first instead of caller order.
    pub topological: bool,
}

/// A documentation tree rooted at one directory.
#[derive(Debug)]
pub struct Project {
    /// Scan configuration.
    config: Config,
    /// Home directory for `~/` targets.
    home: Option<PathBuf>,
    /// Absolute, normalized project root.
    root: PathBuf,
}

/// Rewrite state accumulated across the moves of one batch, keyed by each
/// document's current (possibly already relocated) path.
#[derive(Debug, Default)]
struct Batch {
    /// Latest content of documents whose text changed.
    content: BTreeMap<PathBuf, String>,
    /// Link edits applied so far.
    edits: BTreeMap<PathBuf, Vec<LinkEdit>>,
    /// On-disk path of documents that moved earlier in the batch.
    origin: BTreeMap<PathBuf, PathBuf>,
    /// On-disk content of documents whose text changed.
    original: BTreeMap<PathBuf, String>,
    /// Documents that could not be read.
    warnings: Vec<String>,
}

impl Batch {
    /// Drop everything known about a document that is about to be
    /// overwritten.
    fn forget(&mut self, path: &Path) {
        self.content.remove(path);
        self.edits.remove(path);
        self.original.remove(path);
        return;
    }

    /// Current content of a document, from earlier rewrites or from disk.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the document has to be read and can't be.
    fn read(&self, current: &Path) -> std::io::Result<String> {
        if let Some(text) = self.content.get(current) {
            return Ok(text.clone());
        }
        let on_disk = self.origin.get(current).map_or(current, PathBuf::as_path);
        return std::fs::read_to_string(on_disk);
    }

    /// Keep a rewrite's content and edits if anything changed.
    fn record(&mut self, current: &Path, before: String, rewrite: Rewrite) {
        if !rewrite.is_changed() {
            return;
        }
        self.original.entry(current.to_path_buf()).or_insert(before);
        self.edits.entry(current.to_path_buf()).or_default().extend(rewrite.edits);
        self.content.insert(current.to_path_buf(), rewrite.content);
        return;
    }

    /// Follow a document to its new path.
    fn relocate(&mut self, from: &Path, to: &Path) {
        let origin = self.origin.remove(from).unwrap_or_else(|| return from.to_path_buf());
        self.origin.insert(to.to_path_buf(), origin);
        if let Some(text) = self.content.remove(from) {
            self.content.insert(to.to_path_buf(), text);
        }
        if let Some(edits) = self.edits.remove(from) {
            self.edits.insert(to.to_path_buf(), edits);
        }
        if let Some(text) = self.original.remove(from) {
            self.original.insert(to.to_path_buf(), text);
        }
        return;
    }

    /// Content to write for `path`, if it really differs from disk.
    fn staged(&self, path: &Path) -> Option<&String> {
        let content = self.content.get(path)?;
        if self.original.get(path) == Some(content) {
            return None;
        }
        return Some(content);
    }
}

impl Project {
    /// Rewrite one document in the batch: it lives at `current` and will
    /// live at `new_path` once `mapping` is applied.
    fn apply_rewrite(
        &self,
        batch: &mut Batch,
        current: &Path,
        new_path: &Path,
        mapping: &BTreeMap<PathBuf, PathBuf>,
    ) {
        let content = match batch.read(current) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %current.display(), "cannot read document: {e}");
                batch.warnings.push(format!("{}: not rewritten: {e}", current.display()));
                return;
            },
        };
        let home = self.home.as_deref();
        let extraction = scanner::extract(&content, current, home);
        let rewrite = rewrite::rewrite_document(&content, &extraction.document, new_path, mapping, home);
        tracing::debug!(path = %current.display(), edits = rewrite.edits.len(), "rewrote references");
        batch.record(current, content, rewrite);
        return;
    }

    /// Scan the project into a graph. `extra` documents are extracted too
    /// when the scan did not reach them (excluded or outside the root).
    fn build_graph(&self, extra: &[PathBuf]) -> (DependencyGraph, Vec<String>) {
        let home = self.home.as_deref();
        let scan = scanner::scan(&self.root, &self.config, home);
        let documents = scan.documents;
        let mut warnings = scan.warnings;

        let known: BTreeSet<PathBuf> = documents.iter().map(|d| return d.path.clone()).collect();
        let mut graph = DependencyGraph::build(documents);
        for path in extra.iter().filter(|p| return !known.contains(*p)) {
            match scanner::extract_file(path, home) {
                Ok(extraction) => {
                    warnings.extend(extraction.warnings);
                    graph.add_node(extraction.document);
                },
                Err(e) => warnings.push(e.to_string()),
            }
        }
        return (graph, warnings);
    }

    /// Execute the staged transaction (or preview it) and complete the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns `Error::TransactionFinished` only if the transaction already
    /// ran; step failures land in `result.errors`.
    fn finish(
        &self,
        mut tx: Transaction,
        mut result: OperationResult,
        options: &MoveOptions,
    ) -> Result<OperationResult, Error> {
        if options.dry_run {
            result.planned_steps = tx.preview().into_iter().map(|(_, step)| return step).collect();
            result.success = true;
            tracing::info!(steps = result.planned_steps.len(), "dry run; nothing executed");
            return Ok(result);
        }

        let report = tx.execute()?;
        result
            .errors
            .extend(report.step_errors.iter().map(|e| return format!("step {}: {}", e.index.saturating_add(1), e.error)));
        result
            .errors
            .extend(report.rollback_errors.iter().map(|e| return e.error.to_string()));
        result.success = report.state == TransactionState::Committed && report.step_errors.is_empty();

        if report.state == TransactionState::Committed && !report.failed.is_empty() {
            result.warnings.push(format!("{} failed step(s) were skipped", report.failed.len()));
        }
        if report.state == TransactionState::Aborted {
            result.warnings.push("every completed step was rolled back".to_string());
            result.changes.clear();
            result.created_files.clear();
            result.deleted_files.clear();
            result.modified_files.clear();
            return Ok(result);
        }

        if options.verify {
            let mut touched = result.modified_files.clone();
            touched.extend(result.created_files.iter().cloned());
            let validation = validate::validate_files(&touched, self.home.as_deref());
            result.broken_link_count = Some(validation.broken_link_count);
            result.warnings.extend(validation.errors);
        }
        return Ok(result);
    }

    /// Home directory used for `~/` targets.
    pub fn home(&self) -> Option<&Path> {
        return self.home.as_deref();
    }

    /// Concatenate `sources` into a new document at `destination`.
    ///
    /// Each source's references are re-expressed from the destination's
    /// directory, and references between joined sources point at the
    /// destination. Unless `keep_sources` is set, every other document that
    /// referenced a source is rewritten to reference the destination and the
    /// sources are deleted.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad sources or destination, or
    /// `Error::ParseFailed` if a source cannot be read.
    pub fn join(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        join_options: &JoinOptions,
    ) -> Result<OperationResult, Error> {
        let options = &join_options.options;
        let mut warnings = Vec::new();
        let mut ordered: Vec<PathBuf> = Vec::with_capacity(sources.len());
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        for raw in sources {
            let source = self.validate_document(raw, options.allow_outside_root)?;
            if seen.insert(source.clone()) {
                ordered.push(source);
            } else {
                warnings.push(format!("{} listed twice; joined once", source.display()));
            }
        }
        if ordered.is_empty() {
            return Err(Error::EmptyPath);
        }

        let destination = paths::validate(destination, &self.root, options.allow_outside_root)?;
        if !paths::is_document(&destination) {
            return Err(Error::NotADocument { path: destination });
        }
        if seen.contains(&destination) {
            return Err(Error::SameSourceAndDestination { path: destination });
        }
        if destination.exists() && !options.force {
            return Err(Error::DestinationExists { path: destination });
        }

        let (graph, scan_warnings) = self.build_graph(&ordered);
        warnings.extend(scan_warnings);
        let order = if join_options.topological { join_order(&graph, &ordered) } else { ordered.clone() };
        let mapping: BTreeMap<PathBuf, PathBuf> =
            ordered.iter().map(|s| return (s.clone(), destination.clone())).collect();
        let home = self.home.as_deref();

        let mut result = OperationResult {
            dry_run: options.dry_run,
            ..OperationResult::default()
        };
        let mut labels: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut parts: Vec<String> = Vec::with_capacity(order.len());
        let mut link_changes = Vec::new();

        for source in &order {
            let content = std::fs::read_to_string(source).map_err(|e| {
                return Error::ParseFailed {
                    file: source.clone(),
                    reason: e.to_string(),
                };
            })?;
            let extraction = scanner::extract(&content, source, home);
            for definition in &extraction.document.definitions {
                match labels.entry(definition.id.to_lowercase()) {
                    Entry::Occupied(first) => {
                        if first.get() != source {
                            warnings.push(format!(
                                "reference label [{}] is defined in both {} and {}; the first definition wins",
                                definition.id,
                                first.get().display(),
                                source.display()
                            ));
                        }
                    },
                    Entry::Vacant(slot) => {
                        slot.insert(source.clone());
                    },
                }
            }
            let rewrite = rewrite::rewrite_document(&content, &extraction.document, &destination, &mapping, home);
            link_changes.extend(
                rewrite.edits.iter().map(|e| return ChangeRecord::link_updated(destination.clone(), e)),
            );
            parts.push(rewrite.content.trim_end_matches('\n').to_string());
        }

        let mut tx = transaction_for(options);
        tx.add_file_create(destination.clone(), format!("{}\n", parts.join("\n\n")));
        result.created_files.push(destination.clone());
        result.changes.push(ChangeRecord::file_created(destination.clone()));
        result.changes.extend(link_changes);

        if !join_options.keep_sources {
            let dependents: BTreeSet<PathBuf> = ordered
                .iter()
                .flat_map(|s| return graph.get_dependents(s))
                .filter(|d| return !seen.contains(d) && *d != destination)
                .collect();
            let mut batch = Batch::default();
            for dependent in &dependents {
                self.apply_rewrite(&mut batch, dependent, dependent, &mapping);
            }
            warnings.append(&mut batch.warnings);
            stage_updates(&mut tx, &mut result, &batch, |_| return true);

            for source in &ordered {
                tx.add_file_delete(source.clone());
                result.deleted_files.push(source.clone());
                result.changes.push(ChangeRecord::file_deleted(source.clone()));
            }
        }

        result.warnings = warnings;
        tracing::info!(
            sources = ordered.len(),
            destination = %destination.display(),
            steps = tx.len(),
            "planned join"
        );
        return self.finish(tx, result, options);
    }

    /// Move several documents in caller order as one transaction.
    ///
    /// After each move the graph is renamed in place, so later moves see
    /// references already pointing at relocated documents. Every dependent
    /// is visited once per move.
    ///
    /// # Errors
    ///
    /// Returns a validation error (bad path, not a document, missing source,
    /// same source and destination, destination collision, duplicate
    /// destination, source moved twice) before anything is staged.
    pub fn move_many(
        &self,
        moves: &[(PathBuf, PathBuf)],
        options: &MoveOptions,
    ) -> Result<OperationResult, Error> {
        let plan = self.validate_moves(moves, options)?;
        let sources: Vec<PathBuf> = plan.iter().map(|(s, _)| return s.clone()).collect();
        let (mut graph, mut warnings) = self.build_graph(&sources);
        let mut batch = Batch::default();

        for (source, destination) in &plan {
            if graph.contains(destination) {
                graph.remove_node(destination);
                batch.forget(destination);
            }
            let mapping = BTreeMap::from([(source.clone(), destination.clone())]);
            let dependents: BTreeSet<PathBuf> = graph
                .get_dependents(source)
                .into_iter()
                .filter(|d| return d != source)
                .collect();
            tracing::debug!(
                source = %source.display(),
                dependents = dependents.len(),
                "planning move"
            );

            for dependent in &dependents {
                self.apply_rewrite(&mut batch, dependent, dependent, &mapping);
            }
            self.apply_rewrite(&mut batch, source, destination, &mapping);
            graph.update_file_path(source, destination);
            batch.relocate(source, destination);
        }
        warnings.append(&mut batch.warnings);

        let mut result = OperationResult {
            dry_run: options.dry_run,
            warnings,
            ..OperationResult::default()
        };
        let mut tx = transaction_for(options);

        stage_updates(&mut tx, &mut result, &batch, |p| return !batch.origin.contains_key(p));
        for (source, destination) in &plan {
            tx.add_file_move(source.clone(), destination.clone());
            result.deleted_files.push(source.clone());
            result.created_files.push(destination.clone());
            result.changes.push(ChangeRecord::file_moved(source, destination));
        }
        stage_updates(&mut tx, &mut result, &batch, |p| return batch.origin.contains_key(p));

        tracing::info!(moves = plan.len(), steps = tx.len(), "planned move");
        return self.finish(tx, result, options);
    }

    /// Move one document. Same as a batch of one.
    ///
    /// # Errors
    ///
    /// See `move_many`.
    pub fn move_one(
        &self,
        source: &Path,
        destination: &Path,
        options: &MoveOptions,
    ) -> Result<OperationResult, Error> {
        return self.move_many(&[(source.to_path_buf(), destination.to_path_buf())], options);
    }

    /// A project rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the root cannot be made absolute.
    pub fn new(root: &Path, config: Config, home: Option<PathBuf>) -> Result<Self, Error> {
        return Ok(Self {
            config,
            home,
            root: paths::absolutize(root)?,
        });
    }

    /// Scan the project and build its dependency graph.
    pub fn graph(&self) -> (DependencyGraph, Vec<String>) {
        return self.build_graph(&[]);
    }

    /// Absolute project root.
    pub fn root(&self) -> &Path {
        return &self.root;
    }

    /// Validate a user-supplied document path: inside the root (unless
    /// allowed), a markdown file, and present on disk.
    ///
    /// # Errors
    ///
    /// Returns `EmptyPath`, `InvalidPath`, `OutsideRoot`, `NotADocument`, or
    /// `FileNotFound`.
    fn validate_document(&self, raw: &Path, allow_outside_root: bool) -> Result<PathBuf, Error> {
        let path = paths::validate(raw, &self.root, allow_outside_root)?;
        if !paths::is_document(&path) {
            return Err(Error::NotADocument { path });
        }
        if !path.is_file() {
            return Err(Error::FileNotFound { path });
        }
        return Ok(path);
    }

    /// Resolve and validate every pair of a batch.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    fn validate_moves(
        &self,
        moves: &[(PathBuf, PathBuf)],
        options: &MoveOptions,
    ) -> Result<Vec<(PathBuf, PathBuf)>, Error> {
        let mut plan: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(moves.len());
        let mut moved: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        let mut destinations: BTreeSet<PathBuf> = BTreeSet::new();

        for (raw_source, raw_destination) in moves {
            let source = self.validate_document(raw_source, options.allow_outside_root)?;
            let resolved = paths::resolve_destination(&source, raw_destination);
            let destination = paths::validate(&resolved, &self.root, options.allow_outside_root)?;
            if !paths::is_document(&destination) {
                return Err(Error::NotADocument { path: destination });
            }
            if source == destination {
                return Err(Error::SameSourceAndDestination { path: source });
            }
            if let Some(moved_to) = moved.get(&source) {
                return Err(Error::SourceAlreadyMoved {
                    moved_to: moved_to.clone(),
                    path: source,
                });
            }
            if !destinations.insert(destination.clone()) {
                return Err(Error::DuplicateDestination { path: destination });
            }
            if destination.exists() && !options.force {
                return Err(Error::DestinationExists { path: destination });
            }
            moved.insert(source.clone(), destination.clone());
            plan.push((source, destination));
        }

        // Chained moves (a -> b, b -> c) would overwrite a batch source.
        if let Some((_, destination)) = plan.iter().find(|(_, d)| return moved.contains_key(d)) {
            return Err(Error::DestinationExists { path: destination.clone() });
        }
        return Ok(plan);
    }
}

/// Dependencies-first order of `sources`. Sources on a reference cycle have
/// no meaningful topological position; they are emitted together, in
/// caller order, where the first of them would have appeared.
fn join_order(graph: &DependencyGraph, sources: &[PathBuf]) -> Vec<PathBuf> {
    let wanted: BTreeSet<&PathBuf> = sources.iter().collect();
    let on_cycle: BTreeSet<PathBuf> = graph
        .detect_circular_dependencies()
        .into_iter()
        .flatten()
        .filter(|p| return wanted.contains(p))
        .collect();

    let mut order: Vec<PathBuf> = Vec::with_capacity(sources.len());
    let mut cycle_emitted = false;
    for path in graph.topological_sort().into_iter().rev() {
        if !wanted.contains(&path) {
            continue;
        }
        if on_cycle.contains(&path) {
            if !cycle_emitted {
                order.extend(sources.iter().filter(|s| return on_cycle.contains(*s)).cloned());
                cycle_emitted = true;
            }
            continue;
        }
        order.push(path);
    }

    for source in sources {
        if !order.contains(source) {
            order.push(source.clone());
        }
    }
    return order;
}

/// Append content updates for batch documents selected by `include`, in
/// path order, with their change records.
fn stage_updates<F>(tx: &mut Transaction, result: &mut OperationResult, batch: &Batch, include: F)
where
    F: Fn(&Path) -> bool,
{
    for path in batch.content.keys().filter(|p| return include(p.as_path())) {
        let Some(content) = batch.staged(path) else {
            continue;
        };
        tx.add_content_update(path.clone(), content.clone());
        if !batch.origin.contains_key(path) {
            result.modified_files.push(path.clone());
        }
        result.changes.push(ChangeRecord::content_modified(path.clone()));
        let edits = batch.edits.get(path).map_or(&[][..], Vec::as_slice);
        result.changes.extend(edits.iter().map(|e| return ChangeRecord::link_updated(path.clone(), e)));
    }
    return;
}

/// An empty transaction configured from the move options.
fn transaction_for(options: &MoveOptions) -> Transaction {
    return Transaction::new(options.retry)
        .with_continue_on_error(options.continue_on_error)
        .with_create_directories(options.create_directories);
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, clippy::indexing_slicing, reason = "tests")]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::report::ChangeKind;

    fn options() -> MoveOptions {
        return MoveOptions {
            allow_outside_root: false,
            continue_on_error: false,
            create_directories: true,
            dry_run: false,
            force: false,
            retry: RetryPolicy::no_retry(),
            verbose: false,
            verify: false,
        };
    }

    fn project(files: &[(&str, &str)]) -> (tempfile::TempDir, Project) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let project = Project::new(dir.path(), Config::default(), None).unwrap();
        return (dir, project);
    }

    fn read(project: &Project, name: &str) -> String {
        return std::fs::read_to_string(project.root().join(name)).unwrap();
    }

    fn docs_fixture() -> (tempfile::TempDir, Project) {
        return project(&[
            ("docs/a.md", "See [link](./b.md) and @./c.md for more.\n"),
            ("docs/b.md", "# B\n"),
            ("docs/c.md", "# C\n"),
            ("docs/d.md", "[back](./a.md)\n"),
            ("docs/e.md", "Nothing to see.\n"),
        ]);
    }

    #[test]
    fn move_into_subdirectory_rewrites_both_sides() {
        let (_dir, project) = docs_fixture();
        let root = project.root().to_path_buf();
        let result = project
            .move_one(&root.join("docs/a.md"), &root.join("docs/sub/a.md"), &options())
            .unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert!(!root.join("docs/a.md").exists());
        assert_eq!(read(&project, "docs/sub/a.md"), "See [link](../b.md) and @../c.md for more.\n");
        assert_eq!(read(&project, "docs/d.md"), "[back](./sub/a.md)\n");
        assert_eq!(read(&project, "docs/e.md"), "Nothing to see.\n");
        assert_eq!(result.modified_files, vec![root.join("docs/d.md")]);
        assert_eq!(result.created_files, vec![root.join("docs/sub/a.md")]);
        let links = result.changes.iter().filter(|c| return c.kind == ChangeKind::LinkUpdated).count();
        assert_eq!(links, 3);
    }

    #[test]
    fn dry_run_previews_without_touching_disk() {
        let (_dir, project) = docs_fixture();
        let root = project.root().to_path_buf();
        let mut opts = options();
        opts.dry_run = true;
        let result = project.move_one(&root.join("docs/a.md"), &root.join("docs/sub/"), &opts).unwrap();

        assert!(result.success);
        assert!(result.dry_run);
        assert_eq!(result.planned_steps.len(), 3);
        assert!(result.planned_steps[1].starts_with("move "));
        assert!(root.join("docs/a.md").exists());
        assert_eq!(read(&project, "docs/d.md"), "[back](./a.md)\n");
    }

    #[test]
    fn equivalent_path_is_rejected() {
        let (_dir, project) = docs_fixture();
        let root = project.root().to_path_buf();
        let err = project
            .move_one(&root.join("docs/a.md"), &root.join("docs/../docs/./a.md"), &options())
            .unwrap_err();
        assert!(matches!(err, Error::SameSourceAndDestination { .. }));
    }

    #[test]
    fn collision_needs_force() {
        let (_dir, project) = docs_fixture();
        let root = project.root().to_path_buf();
        let err = project.move_one(&root.join("docs/e.md"), &root.join("docs/b.md"), &options()).unwrap_err();
        assert!(matches!(err, Error::DestinationExists { .. }));

        let mut opts = options();
        opts.force = true;
        let result = project.move_one(&root.join("docs/e.md"), &root.join("docs/b.md"), &opts).unwrap();
        assert!(result.success);
        assert_eq!(read(&project, "docs/b.md"), "Nothing to see.\n");
    }

    #[test]
    fn non_documents_and_missing_sources_are_rejected() {
        let (_dir, project) = project(&[("a.md", "x\n"), ("notes.txt", "x\n")]);
        let root = project.root().to_path_buf();
        let err = project.move_one(&root.join("notes.txt"), &root.join("n.md"), &options()).unwrap_err();
        assert!(matches!(err, Error::NotADocument { .. }));
        let err = project.move_one(&root.join("gone.md"), &root.join("n.md"), &options()).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
        let err = project.move_one(&root.join("a.md"), Path::new("/elsewhere/a.md"), &options()).unwrap_err();
        assert!(matches!(err, Error::OutsideRoot { .. }));
    }

    #[test]
    fn mutual_references_are_visited_once() {
        let (_dir, project) = project(&[("a.md", "[b](b.md)\n"), ("b.md", "[a](a.md) [again](a.md#x)\n")]);
        let root = project.root().to_path_buf();
        let result = project.move_one(&root.join("a.md"), &root.join("sub/a.md"), &options()).unwrap();

        assert!(result.success);
        assert_eq!(read(&project, "sub/a.md"), "[b](../b.md)\n");
        assert_eq!(read(&project, "b.md"), "[a](sub/a.md) [again](sub/a.md#x)\n");
        let updates = result
            .changes
            .iter()
            .filter(|c| return c.kind == ChangeKind::ContentModified && c.file_path == root.join("b.md"))
            .count();
        assert_eq!(updates, 1);
    }

    #[test]
    fn batch_sees_earlier_moves() {
        let (_dir, project) = docs_fixture();
        let root = project.root().to_path_buf();
        let moves = vec![
            (root.join("docs/a.md"), root.join("docs/sub/")),
            (root.join("docs/d.md"), root.join("docs/sub/")),
        ];
        let result = project.move_many(&moves, &options()).unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(read(&project, "docs/sub/a.md"), "See [link](../b.md) and @../c.md for more.\n");
        assert_eq!(read(&project, "docs/sub/d.md"), "[back](./a.md)\n");
        assert!(result.modified_files.is_empty());
    }

    #[test]
    fn batch_rejects_duplicates() {
        let (_dir, project) = docs_fixture();
        let root = project.root().to_path_buf();
        let twice = vec![
            (root.join("docs/a.md"), root.join("x.md")),
            (root.join("docs/a.md"), root.join("y.md")),
        ];
        assert!(matches!(
            project.move_many(&twice, &options()).unwrap_err(),
            Error::SourceAlreadyMoved { .. }
        ));
        let same_target = vec![
            (root.join("docs/a.md"), root.join("x.md")),
            (root.join("docs/e.md"), root.join("x.md")),
        ];
        assert!(matches!(
            project.move_many(&same_target, &options()).unwrap_err(),
            Error::DuplicateDestination { .. }
        ));
    }

    #[test]
    fn failed_move_leaves_project_untouched() {
        let (_dir, project) = docs_fixture();
        let root = project.root().to_path_buf();
        let mut opts = options();
        opts.create_directories = false;
        let result = project.move_one(&root.join("docs/a.md"), &root.join("docs/sub/a.md"), &opts).unwrap();

        assert!(!result.success);
        assert!(!result.errors.is_empty());
        assert_eq!(read(&project, "docs/a.md"), "See [link](./b.md) and @./c.md for more.\n");
        assert_eq!(read(&project, "docs/d.md"), "[back](./a.md)\n");
    }

    #[cfg(unix)]
    #[test]
    fn rewritten_dependents_keep_their_mode() {
        use std::os::unix::fs::PermissionsExt as _;

        let (_dir, project) = docs_fixture();
        let root = project.root().to_path_buf();
        let d = root.join("docs/d.md");
        let mode = || return std::fs::metadata(&d).unwrap().permissions().mode() & 0o777;
        std::fs::set_permissions(&d, std::fs::Permissions::from_mode(0o604)).unwrap();

        let mut opts = options();
        opts.create_directories = false;
        let aborted = project.move_one(&root.join("docs/a.md"), &root.join("docs/sub/a.md"), &opts).unwrap();
        assert!(!aborted.success);
        assert_eq!(mode(), 0o604);

        let moved = project.move_one(&root.join("docs/a.md"), &root.join("docs/sub/a.md"), &options()).unwrap();
        assert!(moved.success);
        assert_eq!(read(&project, "docs/d.md"), "[back](./sub/a.md)\n");
        assert_eq!(mode(), 0o604);
    }

    #[test]
    fn percent_encoded_links_follow_the_move() {
        let (_dir, project) = project(&[("my doc.md", "# Doc\n"), ("index.md", "[doc](my%20doc.md)\n")]);
        let root = project.root().to_path_buf();
        let result = project.move_one(&root.join("my doc.md"), &root.join("guide/"), &options()).unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(read(&project, "index.md"), "[doc](guide/my%20doc.md)\n");
    }

    #[test]
    fn verify_counts_broken_links() {
        let (_dir, project) = project(&[("a.md", "[gone](missing.md) [b](b.md)\n"), ("b.md", "# B\n")]);
        let root = project.root().to_path_buf();
        let mut opts = options();
        opts.verify = true;
        let result = project.move_one(&root.join("a.md"), &root.join("sub/a.md"), &opts).unwrap();
        assert!(result.success);
        assert_eq!(result.broken_link_count, Some(1));
    }

    #[test]
    fn join_orders_and_redirects() {
        let (_dir, project) = project(&[
            ("x.md", "# X\n[y](y.md)\n"),
            ("y.md", "# Y\n"),
            ("z.md", "[x](x.md) [y](./y.md#top)\n"),
        ]);
        let root = project.root().to_path_buf();
        let join = JoinOptions {
            keep_sources: false,
            options: options(),
            topological: true,
        };
        let result = project
            .join(&[root.join("x.md"), root.join("y.md")], &root.join("all.md"), &join)
            .unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(read(&project, "all.md"), "# Y\n\n# X\n[y](all.md)\n");
        assert_eq!(read(&project, "z.md"), "[x](all.md) [y](./all.md#top)\n");
        assert!(!root.join("x.md").exists());
        assert!(!root.join("y.md").exists());
        assert_eq!(result.deleted_files.len(), 2);
    }

    #[test]
    fn join_cycle_falls_back_to_caller_order() {
        let (_dir, project) = project(&[("p.md", "[q](q.md)\n"), ("q.md", "[p](p.md)\n")]);
        let root = project.root().to_path_buf();
        let join = JoinOptions {
            keep_sources: true,
            options: options(),
            topological: true,
        };
        let result = project
            .join(&[root.join("q.md"), root.join("p.md")], &root.join("both.md"), &join)
            .unwrap();

        assert!(result.success);
        assert_eq!(read(&project, "both.md"), "[p](both.md)\n\n[q](both.md)\n");
        assert!(root.join("p.md").exists());
    }
}
