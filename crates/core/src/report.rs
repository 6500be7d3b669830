use serde::{Deserialize, Serialize};

use crate::{NormalizedTree, PackageNode, push_unique};

/// Outbound report: project metadata plus the merged canonical children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub children: Vec<PackageNode>,
}

impl ReportPayload {
    /// Total node count, reference nodes included.
    pub fn node_count(&self) -> usize {
        let mut count = 0usize;
        for child in &self.children {
            child.walk(&mut |_| count += 1);
        }
        count
    }
}

/// Merges normalized trees under one project identity, preserving child order.
///
/// A top-level child whose `(name, version)` already appeared from an earlier tree is dropped.
pub fn assemble_report(
    name: impl Into<String>,
    version: impl Into<String>,
    trees: impl IntoIterator<Item = NormalizedTree>,
) -> ReportPayload {
    let mut children = Vec::new();
    for tree in trees {
        for child in tree.children {
            push_unique(&mut children, child);
        }
    }
    ReportPayload {
        name: name.into(),
        version: version.into(),
        children,
    }
}
