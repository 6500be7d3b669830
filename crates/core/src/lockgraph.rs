//! Lockfile-mode normalization over a parsed specifier → entry graph.

use std::collections::{HashMap, HashSet};

use crate::{
    DependencyType, NormalizedTree, PackageNode, VisitedSet, checksum::fingerprint_lock_entry,
};

/// One resolved lockfile entry, as declared under one or more `name@range` specifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockEntry {
    pub version: Option<String>,
    pub resolved: Option<String>,
    pub integrity: Option<String>,
    /// `(name, requested range)` pairs in declaration order.
    pub dependencies: Vec<(String, String)>,
}

impl LockEntry {
    /// Records a dependency; a repeated name keeps its first position and takes the new range.
    pub fn add_dependency(&mut self, name: impl Into<String>, range: impl Into<String>) {
        let name = name.into();
        let range = range.into();
        match self.dependencies.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing_range)) => *existing_range = range,
            None => self.dependencies.push((name, range)),
        }
    }

    pub fn dependency(&self, name: &str) -> Option<&str> {
        self.dependencies
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, range)| range.as_str())
    }
}

/// Specifier-keyed lockfile entries in declaration order, plus optional root specifiers.
#[derive(Debug, Clone, Default)]
pub struct LockfileGraph {
    entries: Vec<(String, LockEntry)>,
    index: HashMap<String, usize>,
    roots: Vec<String>,
}

impl LockfileGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry; a repeated specifier replaces the earlier entry in place.
    pub fn insert(&mut self, specifier: impl Into<String>, entry: LockEntry) {
        let specifier = specifier.into();
        if let Some(&position) = self.index.get(&specifier) {
            self.entries[position].1 = entry;
            return;
        }
        self.index.insert(specifier.clone(), self.entries.len());
        self.entries.push((specifier, entry));
    }

    pub fn get(&self, specifier: &str) -> Option<&LockEntry> {
        self.index
            .get(specifier)
            .map(|&position| &self.entries[position].1)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &LockEntry)> {
        self.entries
            .iter()
            .map(|(specifier, entry)| (specifier.as_str(), entry))
    }

    /// Root specifiers (`name@range`), usually taken from the project manifest.
    pub fn set_roots(&mut self, roots: Vec<String>) {
        self.roots = roots;
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Splits `name@range` into name and range; scoped names keep their leading `@`.
pub fn split_specifier(specifier: &str) -> (&str, &str) {
    match specifier.rfind('@') {
        Some(idx) if idx > 0 => (&specifier[..idx], &specifier[idx + 1..]),
        _ => (specifier, ""),
    }
}

struct Identity<'a> {
    name: &'a str,
    entry: &'a LockEntry,
}

/// Groups every specifier by the install it resolves to.
struct IdentityIndex<'a> {
    identities: Vec<Identity<'a>>,
    by_specifier: HashMap<&'a str, usize>,
}

impl<'a> IdentityIndex<'a> {
    fn build(graph: &'a LockfileGraph) -> Self {
        let mut identities = Vec::new();
        let mut by_key = HashMap::<(&str, Option<&str>, Option<&str>), usize>::new();
        let mut by_specifier = HashMap::new();

        for (specifier, entry) in graph.entries() {
            let (name, _) = split_specifier(specifier);
            let key = (name, entry.version.as_deref(), entry.resolved.as_deref());
            let position = *by_key.entry(key).or_insert_with(|| {
                identities.push(Identity { name, entry });
                identities.len() - 1
            });
            by_specifier.insert(specifier, position);
        }

        Self {
            identities,
            by_specifier,
        }
    }

    fn lookup(&self, specifier: &str) -> Option<usize> {
        self.by_specifier.get(specifier).copied()
    }

    /// Identities no other identity depends on, in lockfile order.
    fn unreferenced(&self) -> Vec<usize> {
        let mut referenced = HashSet::new();
        for (position, identity) in self.identities.iter().enumerate() {
            for (name, range) in &identity.entry.dependencies {
                if let Some(target) = self.lookup(&format!("{name}@{range}"))
                    && target != position
                {
                    referenced.insert(target);
                }
            }
        }
        (0..self.identities.len())
            .filter(|position| !referenced.contains(position))
            .collect()
    }
}

struct LockWalker<'a> {
    index: &'a IdentityIndex<'a>,
    visited: VisitedSet,
}

/// A node whose dependencies are still being expanded.
struct Frame<'a> {
    node: PackageNode,
    dependencies: std::slice::Iter<'a, (String, String)>,
}

enum Step<'a> {
    Leaf(PackageNode),
    Open(Frame<'a>),
}

impl<'a> LockWalker<'a> {
    /// Expands one identity depth-first with an explicit stack, so chain depth is bounded
    /// by memory rather than by the call stack.
    fn expand(&mut self, position: usize, dependency_type: DependencyType) -> PackageNode {
        let mut current = match self.open(position, dependency_type) {
            Step::Leaf(node) => return node,
            Step::Open(frame) => frame,
        };
        let mut ancestors: Vec<Frame<'a>> = Vec::new();

        loop {
            match current.dependencies.next() {
                Some((name, range)) => match self.open_dependency(name, range) {
                    Step::Leaf(child) => {
                        current.node.push_child(child);
                    }
                    Step::Open(frame) => ancestors.push(std::mem::replace(&mut current, frame)),
                },
                None => match ancestors.pop() {
                    Some(mut parent) => {
                        parent.node.push_child(current.node);
                        current = parent;
                    }
                    None => return current.node,
                },
            }
        }
    }

    fn open(&mut self, position: usize, dependency_type: DependencyType) -> Step<'a> {
        let index = self.index;
        let identity = &index.identities[position];
        let Some(version) = identity.entry.version.as_deref() else {
            tracing::debug!("lockfile entry {} has no version", identity.name);
            return Step::Leaf(PackageNode::missing(identity.name, None));
        };
        if let Some(reference) = self
            .visited
            .reference(identity.name, version, dependency_type)
        {
            return Step::Leaf(reference);
        }

        let checksum = fingerprint_lock_entry(identity.name, identity.entry).into_option();
        self.visited.record(identity.name, version, checksum.clone());
        Step::Open(Frame {
            node: PackageNode::new(identity.name, version, checksum, dependency_type),
            dependencies: identity.entry.dependencies.iter(),
        })
    }

    fn open_dependency(&mut self, name: &str, range: &str) -> Step<'a> {
        match self.index.lookup(&format!("{name}@{range}")) {
            Some(target) => self.open(target, DependencyType::Transitive),
            None => {
                tracing::debug!("{name}@{range} is not declared in the lockfile");
                Step::Leaf(PackageNode::missing(name, None))
            }
        }
    }

    fn is_expanded(&self, position: usize) -> bool {
        let identity = &self.index.identities[position];
        match identity.entry.version.as_deref() {
            Some(version) => self.visited.contains(identity.name, version),
            None => true,
        }
    }
}

/// Builds the canonical tree from a lockfile graph.
///
/// Explicit roots are walked in order; without them every entry nothing else depends on
/// becomes a root, followed by anything left unvisited (entries only reachable through a
/// cycle). Root entries are `direct`, everything below them `transitive`.
pub fn normalize_lockfile_graph(graph: &LockfileGraph) -> NormalizedTree {
    let index = IdentityIndex::build(graph);
    let mut walker = LockWalker {
        index: &index,
        visited: VisitedSet::new(),
    };
    let mut tree = NormalizedTree::default();

    if !graph.roots().is_empty() {
        for specifier in graph.roots() {
            let node = match index.lookup(specifier) {
                Some(position) => walker.expand(position, DependencyType::Direct),
                None => {
                    let (name, _) = split_specifier(specifier);
                    tracing::debug!("root dependency {specifier} is not declared in the lockfile");
                    PackageNode::missing(name, None)
                }
            };
            tree.push_child(node);
        }
        return tree;
    }

    for position in index.unreferenced() {
        let node = walker.expand(position, DependencyType::Direct);
        tree.push_child(node);
    }
    for position in 0..index.identities.len() {
        if !walker.is_expanded(position) {
            let node = walker.expand(position, DependencyType::Direct);
            tree.push_child(node);
        }
    }
    tree
}
