mod checksum;
mod lockgraph;
mod report;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use checksum::{
    ChecksumBackend, ChecksumProvider, Fingerprint, FsChecksumBackend, MANIFEST_FILE,
    fingerprint_lock_entry,
};
pub use lockgraph::{LockEntry, LockfileGraph, normalize_lockfile_graph, split_specifier};
pub use report::{ReportPayload, assemble_report};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Direct,
    Transitive,
    Dev,
    Optional,
    Peer,
    Extraneous,
    Missing,
}

impl DependencyType {
    /// Classification for a regular (unflagged) node at the given depth below the root.
    pub fn by_depth(depth: usize) -> Self {
        if depth <= 1 {
            Self::Direct
        } else {
            Self::Transitive
        }
    }
}

/// Identity key used to deduplicate nodes during traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    pub name: String,
    pub version: Option<String>,
}

impl PackageId {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub dependency_type: DependencyType,
    /// Stands in for an identity expanded elsewhere in the same tree.
    #[serde(default, skip_serializing_if = "is_false")]
    pub reference: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PackageNode>,
}

impl PackageNode {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        checksum: Option<String>,
        dependency_type: DependencyType,
    ) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
            checksum,
            dependency_type,
            reference: false,
            children: Vec::new(),
        }
    }

    /// A package that is declared but could not be located.
    pub fn missing(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
            checksum: None,
            dependency_type: DependencyType::Missing,
            reference: false,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> PackageId {
        PackageId::new(self.name.clone(), self.version.clone())
    }

    /// Appends `child` unless a sibling with the same identity is already present.
    pub fn push_child(&mut self, child: PackageNode) -> bool {
        push_unique(&mut self.children, child)
    }

    /// Pre-order walk over this node and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a PackageNode)) {
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            visit(node);
            pending.extend(node.children.iter().rev());
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

pub(crate) fn push_unique(children: &mut Vec<PackageNode>, child: PackageNode) -> bool {
    if children
        .iter()
        .any(|existing| existing.name == child.name && existing.version == child.version)
    {
        return false;
    }
    children.push(child);
    true
}

/// Output of one normalization pass: an optional root identity and its ordered children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedTree {
    pub name: Option<String>,
    pub version: Option<String>,
    pub children: Vec<PackageNode>,
}

impl NormalizedTree {
    pub fn push_child(&mut self, child: PackageNode) -> bool {
        push_unique(&mut self.children, child)
    }

    /// Every node in the tree, depth-first, in output order.
    pub fn nodes(&self) -> Vec<&PackageNode> {
        let mut nodes = Vec::new();
        for child in &self.children {
            child.walk(&mut |node| nodes.push(node));
        }
        nodes
    }
}

/// Traversal-scoped record of identities that already received a full expansion.
#[derive(Debug, Default)]
pub struct VisitedSet {
    expanded: HashMap<PackageId, Option<String>>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a reference node when `name@version` was already expanded.
    pub fn reference(
        &self,
        name: &str,
        version: &str,
        dependency_type: DependencyType,
    ) -> Option<PackageNode> {
        let id = PackageId::new(name, Some(version.to_string()));
        let checksum = self.expanded.get(&id)?;
        Some(PackageNode {
            name: id.name,
            version: id.version,
            checksum: checksum.clone(),
            dependency_type,
            reference: true,
            children: Vec::new(),
        })
    }

    /// Marks `name@version` as expanded. Must happen before recursing into children.
    pub fn record(&mut self, name: &str, version: &str, checksum: Option<String>) {
        self.expanded
            .insert(PackageId::new(name, Some(version.to_string())), checksum);
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.expanded
            .contains_key(&PackageId::new(name, Some(version.to_string())))
    }

    pub fn len(&self) -> usize {
        self.expanded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Keep root-level dev dependencies in listing mode, and read them as roots in lockfile mode.
    pub include_dev: bool,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("failed to determine current directory: {source}")]
    CurrentDirectory {
        #[source]
        source: std::io::Error,
    },
    #[error("invalid dependency input path: {path}")]
    InvalidInputPath { path: String },
    #[error("dependency input path does not exist: {path}")]
    InputPathDoesNotExist { path: String },
    #[error("unsupported file '{file_name}' (expected one of: {expected})")]
    UnsupportedFile { file_name: String, expected: String },
    #[error("no supported dependency file ({expected}) found at {path}")]
    NoSupportedDependencyFile { expected: String, path: String },
    #[error("failed to read dependency file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {source_kind} input: {message}")]
    MalformedInput {
        source_kind: &'static str,
        message: String,
    },
}

/// A package-manager output that can be normalized into the canonical tree.
pub trait DependencySource {
    fn key(&self) -> &'static str;
    fn normalize(&self, options: &NormalizeOptions) -> Result<NormalizedTree, NormalizeError>;
}

/// Resolves a user-supplied path (file or directory) to one of `supported_files`.
pub fn resolve_input(
    path: Option<&str>,
    supported_files: &[&str],
) -> Result<PathBuf, NormalizeError> {
    let candidate = match path {
        Some(value) => PathBuf::from(value),
        None => {
            std::env::current_dir().map_err(|source| NormalizeError::CurrentDirectory { source })?
        }
    };

    if candidate.is_file() {
        return validate_dependency_file(candidate.as_path(), supported_files);
    }

    if candidate.exists() && !candidate.is_dir() {
        return Err(NormalizeError::InvalidInputPath {
            path: candidate.display().to_string(),
        });
    }

    if !candidate.is_dir() {
        return Err(NormalizeError::InputPathDoesNotExist {
            path: candidate.display().to_string(),
        });
    }

    for file_name in supported_files {
        let file_path = candidate.join(file_name);
        if file_path.is_file() {
            return Ok(file_path);
        }
    }

    Err(NormalizeError::NoSupportedDependencyFile {
        expected: supported_files.join(", "),
        path: candidate.display().to_string(),
    })
}

/// Reads a whole input file, mapping I/O failures to [`NormalizeError::ReadFile`].
pub fn read_input(path: &Path) -> Result<String, NormalizeError> {
    std::fs::read_to_string(path).map_err(|source| NormalizeError::ReadFile {
        path: path.display().to_string(),
        source,
    })
}

fn validate_dependency_file(
    path: &Path,
    supported_files: &[&str],
) -> Result<PathBuf, NormalizeError> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return Err(NormalizeError::InvalidInputPath {
            path: path.display().to_string(),
        });
    };

    if supported_files.contains(&file_name) {
        return Ok(path.to_path_buf());
    }

    Err(NormalizeError::UnsupportedFile {
        file_name: file_name.to_string(),
        expected: supported_files.join(", "),
    })
}
