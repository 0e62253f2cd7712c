//! In-memory dependency graph over documents, keyed by normalized absolute
//! path. Forward edges (`dependencies`) are the stored state; `dependents`
//! are always recomputed from them and never edited directly.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::types::ParsedDocument;

/// One document in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Paths this document references (outgoing edges).
    pub dependencies: BTreeSet<PathBuf>,
    /// Documents that reference this one (incoming edges, derived).
    pub dependents: BTreeSet<PathBuf>,
    /// The parsed document this node wraps.
    pub document: ParsedDocument,
}

/// Directed "references" graph. May contain cycles.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Nodes by document path.
    nodes: BTreeMap<PathBuf, Node>,
    /// Incoming edges for every referenced path, node or not.
    reverse: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

impl DependencyGraph {
    /// Add or replace a node, then rederive dependents.
    pub fn add_node(&mut self, document: ParsedDocument) {
        self.insert_without_recompute(document);
        self.recompute_dependents();
        return;
    }

    /// Replace all state with a graph over `documents`.
    pub fn build(documents: Vec<ParsedDocument>) -> Self {
        let mut graph = Self::default();
        for document in documents {
            graph.insert_without_recompute(document);
        }
        graph.recompute_dependents();
        tracing::debug!(nodes = graph.len(), "built dependency graph");
        return graph;
    }

    /// Whether a path is a node.
    pub fn contains(&self, path: &Path) -> bool {
        return self.nodes.contains_key(path);
    }

    /// Report every cycle once, each as the ordered path from the first
    /// repeated node back to itself (`[a, b, c, a]`).
    ///
    /// DFS with an explicit recursion stack; a back edge to a node on the
    /// stack closes a cycle. Rotations of an already-reported cycle are
    /// skipped.
    pub fn detect_circular_dependencies(&self) -> Vec<Vec<PathBuf>> {
        let mut visited: BTreeSet<&Path> = BTreeSet::new();
        let mut cycles: Vec<Vec<PathBuf>> = Vec::new();
        let mut seen: BTreeSet<Vec<PathBuf>> = BTreeSet::new();

        for start in self.nodes.keys() {
            if visited.contains(start.as_path()) {
                continue;
            }
            let mut stack: Vec<&Path> = Vec::new();
            self.find_cycles_from(start, &mut visited, &mut stack, &mut cycles, &mut seen);
        }
        return cycles;
    }

    /// Recursive half of `detect_circular_dependencies`.
    fn find_cycles_from<'a>(
        &'a self,
        path: &'a Path,
        visited: &mut BTreeSet<&'a Path>,
        stack: &mut Vec<&'a Path>,
        cycles: &mut Vec<Vec<PathBuf>>,
        seen: &mut BTreeSet<Vec<PathBuf>>,
    ) {
        visited.insert(path);
        stack.push(path);

        for dependency in self.node_dependencies(path) {
            if let Some(pos) = stack.iter().position(|p| return *p == dependency.as_path()) {
                let mut cycle: Vec<PathBuf> =
                    stack.iter().skip(pos).map(|p| return p.to_path_buf()).collect();
                if seen.insert(canonical_rotation(&cycle)) {
                    cycle.push(dependency.clone());
                    cycles.push(cycle);
                }
            } else if !visited.contains(dependency.as_path()) {
                self.find_cycles_from(dependency, visited, stack, cycles, seen);
            }
        }

        stack.pop();
        return;
    }

    /// Direct dependencies of a document.
    pub fn get_dependencies(&self, path: &Path) -> Vec<PathBuf> {
        return self.node_dependencies(path).cloned().collect();
    }

    /// Documents that directly reference `path`. Works for any path, including
    /// non-document assets that are only ever referenced.
    pub fn get_dependents(&self, path: &Path) -> Vec<PathBuf> {
        return self
            .reverse
            .get(path)
            .map(|set| return set.iter().cloned().collect())
            .unwrap_or_default();
    }

    /// Look up a node.
    pub fn get_node(&self, path: &Path) -> Option<&Node> {
        return self.nodes.get(path);
    }

    /// Everything reachable by following dependencies, each path once.
    /// Terminates on cyclic graphs. The start path is excluded unless it is
    /// reachable from itself.
    pub fn get_transitive_dependencies(&self, path: &Path) -> Vec<PathBuf> {
        return self.transitive(path, |p| return self.get_dependencies(p));
    }

    /// Everything that reaches `path` by following dependencies, each once.
    pub fn get_transitive_dependents(&self, path: &Path) -> Vec<PathBuf> {
        return self.transitive(path, |p| return self.get_dependents(p));
    }

    /// Insert a node, leaving dependents stale.
    fn insert_without_recompute(&mut self, document: ParsedDocument) {
        let dependencies = document.local_dependencies.iter().cloned().collect();
        self.nodes.insert(
            document.path.clone(),
            Node {
                dependencies,
                dependents: BTreeSet::new(),
                document,
            },
        );
        return;
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        return self.nodes.len();
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        return self.nodes.is_empty();
    }

    /// Dependencies of a node, empty for unknown paths.
    fn node_dependencies(&self, path: &Path) -> impl Iterator<Item = &PathBuf> {
        return self.nodes.get(path).into_iter().flat_map(|n| return n.dependencies.iter());
    }

    /// Node paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        return self.nodes.keys();
    }

    /// Rederive every incoming edge from the forward edges.
    fn recompute_dependents(&mut self) {
        let mut reverse: BTreeMap<PathBuf, BTreeSet<PathBuf>> = BTreeMap::new();
        for (path, node) in &self.nodes {
            for dependency in &node.dependencies {
                reverse.entry(dependency.clone()).or_default().insert(path.clone());
            }
        }

        for (path, node) in &mut self.nodes {
            node.dependents = reverse.get(path).cloned().unwrap_or_default();
            node.document.dependents = node.dependents.iter().cloned().collect();
        }
        self.reverse = reverse;
        return;
    }

    /// Remove a node and every edge pointing at it.
    pub fn remove_node(&mut self, path: &Path) -> Option<ParsedDocument> {
        let removed = self.nodes.remove(path)?;
        for node in self.nodes.values_mut() {
            node.dependencies.remove(path);
        }
        self.recompute_dependents();
        return Some(removed.document);
    }

    /// Order nodes so every document comes before the documents it
    /// references. Read it backwards for dependencies first.
    ///
    /// Post-order DFS over dependencies, finish stack reversed. On an acyclic
    /// graph every edge is respected. Inside a cycle some edge must be
    /// broken; which one depends on traversal order, so the result is not
    /// unique there.
    pub fn topological_sort(&self) -> Vec<PathBuf> {
        let mut visited: BTreeSet<&Path> = BTreeSet::new();
        let mut finished: Vec<PathBuf> = Vec::with_capacity(self.nodes.len());
        for path in self.nodes.keys() {
            self.visit_post_order(path, &mut visited, &mut finished);
        }
        finished.reverse();
        return finished;
    }

    /// Follow `next` from `start` depth-first with a visited guard.
    fn transitive<F>(&self, start: &Path, next: F) -> Vec<PathBuf>
    where
        F: Fn(&Path) -> Vec<PathBuf>,
    {
        let mut visited: BTreeSet<PathBuf> = BTreeSet::new();
        let mut order: Vec<PathBuf> = Vec::new();
        let mut pending: Vec<PathBuf> = next(start);
        pending.reverse();

        while let Some(path) = pending.pop() {
            if !visited.insert(path.clone()) {
                continue;
            }
            let mut children = next(&path);
            children.reverse();
            pending.extend(children);
            order.push(path);
        }
        return order;
    }

    /// Rename a node and every edge that points at it.
    /// Returns false if `old` is not a node.
    pub fn update_file_path(&mut self, old: &Path, new: &Path) -> bool {
        let Some(mut node) = self.nodes.remove(old) else {
            return false;
        };
        node.document.path = new.to_path_buf();
        self.nodes.insert(new.to_path_buf(), node);

        for (path, node) in &mut self.nodes {
            if node.dependencies.remove(old) && path.as_path() != new {
                node.dependencies.insert(new.to_path_buf());
            }
        }
        self.recompute_dependents();
        return true;
    }

    /// Post-order visit for `topological_sort`.
    fn visit_post_order<'a>(
        &'a self,
        path: &'a Path,
        visited: &mut BTreeSet<&'a Path>,
        finished: &mut Vec<PathBuf>,
    ) {
        if !visited.insert(path) {
            return;
        }
        for dependency in self.node_dependencies(path) {
            if self.nodes.contains_key(dependency) {
                self.visit_post_order(dependency, visited, finished);
            }
        }
        finished.push(path.to_path_buf());
        return;
    }
}

/// Rotate a cycle so it starts at its smallest path, for deduplication.
fn canonical_rotation(cycle: &[PathBuf]) -> Vec<PathBuf> {
    let Some(min_pos) = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| return *p)
        .map(|(i, _)| return i)
    else {
        return Vec::new();
    };
    let mut rotated = cycle.to_vec();
    rotated.rotate_left(min_pos);
    return rotated;
}
