//! Listing-mode normalization of `npm ls --json` output.

use depreport_core::{
    ChecksumBackend, ChecksumProvider, DependencyType, NormalizeError, NormalizeOptions,
    NormalizedTree, PackageId, PackageNode, VisitedSet, split_specifier,
};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::markers::deduped_markers;

const SOURCE_KIND: &str = "npm ls";
const NODE_MODULES: &str = "node_modules";

type DependencyMap = Map<String, Value>;

/// Builds the canonical tree from the JSON listing, consulting the plain rendering for
/// `deduped` markers only.
pub fn normalize_listing<B: ChecksumBackend>(
    json: &str,
    plain: &str,
    project_dir: &Path,
    options: &NormalizeOptions,
    provider: &ChecksumProvider<B>,
) -> Result<NormalizedTree, NormalizeError> {
    let root: Value = serde_json::from_str(json).map_err(|error| NormalizeError::MalformedInput {
        source_kind: SOURCE_KIND,
        message: error.to_string(),
    })?;
    let Some(root) = root.as_object() else {
        return Err(NormalizeError::MalformedInput {
            source_kind: SOURCE_KIND,
            message: "top-level value is not an object".to_string(),
        });
    };

    let deduped = deduped_markers(plain);
    let expansions = index_expansions(root, &deduped, project_dir);
    let dev_declared = root
        .get("devDependencies")
        .and_then(Value::as_object)
        .map(|declared| declared.keys().map(String::as_str).collect::<HashSet<_>>())
        .unwrap_or_default();

    let mut walker = ListingWalker {
        provider,
        project_dir,
        deduped: &deduped,
        expansions: &expansions,
        visited: VisitedSet::new(),
    };
    let mut tree = NormalizedTree {
        name: string_field(root, "name").map(ToOwned::to_owned),
        version: string_field(root, "version").map(ToOwned::to_owned),
        children: Vec::new(),
    };

    let Some(dependencies) = root.get("dependencies").and_then(Value::as_object) else {
        return Ok(tree);
    };
    for (key, value) in dependencies {
        let is_dev = flag(value, "dev") || dev_declared.contains(key.as_str());
        if is_dev && !options.include_dev {
            tracing::debug!("skipping root dev dependency {key}");
            continue;
        }
        let node = walker.visit(key, value, project_dir);
        tree.push_child(node);
    }

    tracing::debug!(
        "normalized npm listing with {} expanded packages",
        walker.visited.len()
    );
    Ok(tree)
}

/// Dependencies of one identity together with the directory they are installed under.
struct Expansion<'a> {
    dependencies: &'a DependencyMap,
    dir: PathBuf,
}

/// A node whose dependencies are still being visited.
struct Frame<'a> {
    node: PackageNode,
    dependencies: serde_json::map::Iter<'a>,
    depth: usize,
    dir: PathBuf,
}

enum Step<'a> {
    Leaf(PackageNode),
    Open(Frame<'a>),
}

struct ListingWalker<'a, B> {
    provider: &'a ChecksumProvider<B>,
    project_dir: &'a Path,
    deduped: &'a HashSet<PackageId>,
    expansions: &'a HashMap<PackageId, Expansion<'a>>,
    visited: VisitedSet,
}

impl<'a, B: ChecksumBackend> ListingWalker<'a, B> {
    /// Visits one root-level entry depth-first with an explicit stack.
    fn visit(&mut self, key: &str, value: &'a Value, parent_dir: &Path) -> PackageNode {
        let mut current = match self.open(key, value, 1, parent_dir) {
            Step::Leaf(node) => return node,
            Step::Open(frame) => frame,
        };
        let mut ancestors: Vec<Frame<'a>> = Vec::new();

        loop {
            match current.dependencies.next() {
                Some((child_key, child_value)) => {
                    match self.open(child_key, child_value, current.depth + 1, &current.dir) {
                        Step::Leaf(child) => {
                            current.node.push_child(child);
                        }
                        Step::Open(frame) => {
                            ancestors.push(std::mem::replace(&mut current, frame));
                        }
                    }
                }
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

    fn open(&mut self, key: &str, value: &'a Value, depth: usize, parent_dir: &Path) -> Step<'a> {
        let Some(object) = value.as_object() else {
            tracing::debug!("dependency entry {key} is not an object");
            return Step::Leaf(PackageNode::missing(key, None));
        };
        let (name, version) = identity(key, object);
        let dependency_type = classify(object, depth);
        let Some(version) = version else {
            tracing::debug!("dependency {name} has no version; reporting as missing");
            return Step::Leaf(PackageNode::missing(name, None));
        };
        if dependency_type == DependencyType::Missing {
            return Step::Leaf(PackageNode::missing(name, Some(version)));
        }
        if let Some(reference) = self.visited.reference(&name, &version, dependency_type) {
            return Step::Leaf(reference);
        }

        let candidates = install_candidates(&name, object, parent_dir, self.project_dir);
        let (install_dir, checksum) = match self.provider.locate_installed(&candidates) {
            Some((dir, checksum)) => (dir, Some(checksum)),
            None => {
                tracing::debug!("no readable manifest for {name}@{version}");
                (candidates[0].clone(), None)
            }
        };
        self.visited.record(&name, &version, checksum.clone());

        let node = PackageNode::new(name.as_str(), version.as_str(), checksum, dependency_type);
        let (dependencies, dir) = match self.dependencies_of(&name, &version, object) {
            Some((dependencies, Some(borrowed_dir))) => (dependencies, borrowed_dir.to_path_buf()),
            Some((dependencies, None)) => (dependencies, install_dir),
            None => return Step::Leaf(node),
        };
        Step::Open(Frame {
            node,
            dependencies: dependencies.iter(),
            depth,
            dir,
        })
    }

    /// Own `dependencies`, or the first expanded occurrence for identities npm printed as
    /// deduped. A borrowed map comes with the directory its entries were listed under.
    fn dependencies_of(
        &self,
        name: &str,
        version: &str,
        object: &'a DependencyMap,
    ) -> Option<(&'a DependencyMap, Option<&'a Path>)> {
        let own = object
            .get("dependencies")
            .and_then(Value::as_object)
            .filter(|deps| !deps.is_empty());
        if let Some(own) = own {
            return Some((own, None));
        }
        let id = PackageId::new(name, Some(version.to_string()));
        if !self.deduped.contains(&id) {
            return None;
        }
        self.expansions
            .get(&id)
            .map(|expansion| (expansion.dependencies, Some(expansion.dir.as_path())))
    }
}

/// Nested location first, then the hoisted one. An explicit `path` field wins outright.
fn install_candidates(
    name: &str,
    object: &DependencyMap,
    parent_dir: &Path,
    project_dir: &Path,
) -> Vec<PathBuf> {
    if let Some(path) = string_field(object, "path") {
        return vec![PathBuf::from(path)];
    }
    let nested = parent_dir.join(NODE_MODULES).join(name);
    let hoisted = project_dir.join(NODE_MODULES).join(name);
    if nested == hoisted {
        vec![nested]
    } else {
        vec![nested, hoisted]
    }
}

/// First occurrence with a non-empty `dependencies` map for every identity marked deduped.
///
/// The recorded directory is where that occurrence sits in the listing: its `path` field,
/// or its parent's directory joined with `node_modules/<name>`.
fn index_expansions<'a>(
    root: &'a DependencyMap,
    deduped: &HashSet<PackageId>,
    project_dir: &Path,
) -> HashMap<PackageId, Expansion<'a>> {
    let mut expansions = HashMap::new();
    if deduped.is_empty() {
        return expansions;
    }
    let mut pending = vec![(root, project_dir.to_path_buf())];
    while let Some((object, dir)) = pending.pop() {
        let Some(dependencies) = object.get("dependencies").and_then(Value::as_object) else {
            continue;
        };
        let mut children = Vec::new();
        for (key, value) in dependencies {
            let Some(child) = value.as_object() else {
                continue;
            };
            let (name, version) = identity(key, child);
            let child_dir = match string_field(child, "path") {
                Some(path) => PathBuf::from(path),
                None => dir.join(NODE_MODULES).join(&name),
            };
            if let Some(version) = version
                && let Some(child_deps) = child.get("dependencies").and_then(Value::as_object)
                && !child_deps.is_empty()
            {
                let id = PackageId::new(name, Some(version));
                if deduped.contains(&id) {
                    expansions.entry(id).or_insert_with(|| Expansion {
                        dependencies: child_deps,
                        dir: child_dir.clone(),
                    });
                }
            }
            children.push((child, child_dir));
        }
        pending.extend(children.into_iter().rev());
    }
    expansions
}

/// Name and version of a listing entry. Keys may be bare names or `name@version`.
fn identity(key: &str, object: &DependencyMap) -> (String, Option<String>) {
    let (key_name, key_version) = split_specifier(key);
    let name = string_field(object, "name").unwrap_or(key_name).to_string();
    let version = string_field(object, "version")
        .or_else(|| (!key_version.is_empty()).then_some(key_version))
        .map(ToOwned::to_owned);
    (name, version)
}

/// Flag priority: missing > peer > optional > dev > extraneous > direct/transitive by depth.
fn classify(object: &DependencyMap, depth: usize) -> DependencyType {
    let is_set = |field: &str| object.get(field).and_then(Value::as_bool) == Some(true);
    if is_set("missing") || is_set("peerMissing") {
        DependencyType::Missing
    } else if is_set("peer") {
        DependencyType::Peer
    } else if is_set("optional") {
        DependencyType::Optional
    } else if is_set("dev") {
        DependencyType::Dev
    } else if is_set("extraneous") {
        DependencyType::Extraneous
    } else {
        DependencyType::by_depth(depth)
    }
}

fn flag(value: &Value, field: &str) -> bool {
    value.get(field).and_then(Value::as_bool) == Some(true)
}

fn string_field<'a>(object: &'a DependencyMap, field: &str) -> Option<&'a str> {
    object.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider_with(manifests: &[&str]) -> ChecksumProvider<HashMap<PathBuf, Vec<u8>>> {
        let files = manifests
            .iter()
            .map(|dir| {
                (
                    PathBuf::from(dir).join("package.json"),
                    format!("{{\"dir\":\"{dir}\"}}").into_bytes(),
                )
            })
            .collect::<HashMap<_, _>>();
        ChecksumProvider::new(files)
    }

    fn normalize(json: &str, plain: &str, include_dev: bool) -> NormalizedTree {
        let provider = provider_with(&[
            "/app/node_modules/a",
            "/app/node_modules/b",
            "/app/node_modules/shared",
            "/app/node_modules/a/node_modules/nested",
        ]);
        normalize_listing(
            json,
            plain,
            Path::new("/app"),
            &NormalizeOptions { include_dev },
            &provider,
        )
        .expect("normalize listing")
    }

    fn names(nodes: &[PackageNode]) -> Vec<String> {
        nodes.iter().map(|node| node.id().to_string()).collect()
    }

    #[test]
    fn malformed_json_is_fatal_with_parser_message() {
        let provider = provider_with(&[]);
        let err = normalize_listing(
            "{not json",
            "",
            Path::new("/app"),
            &NormalizeOptions::default(),
            &provider,
        )
        .expect_err("malformed listing");
        match err {
            NormalizeError::MalformedInput {
                source_kind,
                message,
            } => {
                assert_eq!(source_kind, "npm ls");
                assert!(message.contains("key must be a string"));
            }
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn non_object_root_is_malformed() {
        let provider = provider_with(&[]);
        let err = normalize_listing(
            "[]",
            "",
            Path::new("/app"),
            &NormalizeOptions::default(),
            &provider,
        )
        .expect_err("array root");
        assert!(matches!(err, NormalizeError::MalformedInput { .. }));
    }

    #[test]
    fn classifies_by_flag_priority_and_depth() {
        let json = r#"{
          "name": "app", "version": "1.0.0",
          "dependencies": {
            "a": {"version": "1.0.0", "dependencies": {
              "nested": {"version": "0.1.0"},
              "opt": {"version": "2.0.0", "optional": true, "dev": true},
              "both": {"version": "2.0.0", "peer": true, "optional": true}
            }},
            "gone": {"required": "^3.0.0", "missing": true, "peer": true},
            "stray": {"version": "0.0.1", "extraneous": true}
          }
        }"#;
        let tree = normalize(json, "", false);
        assert_eq!(tree.name.as_deref(), Some("app"));
        assert_eq!(tree.version.as_deref(), Some("1.0.0"));

        let a = &tree.children[0];
        assert_eq!(a.dependency_type, DependencyType::Direct);
        assert_eq!(a.children[0].dependency_type, DependencyType::Transitive);
        assert_eq!(a.children[1].dependency_type, DependencyType::Optional);
        assert_eq!(a.children[2].dependency_type, DependencyType::Peer);

        let gone = &tree.children[1];
        assert_eq!(gone.dependency_type, DependencyType::Missing);
        assert!(gone.checksum.is_none());
        assert_eq!(tree.children[2].dependency_type, DependencyType::Extraneous);
    }

    #[test]
    fn node_without_version_degrades_to_missing() {
        let json = r#"{"dependencies": {"a": {"dependencies": {"b": {"version": "1.0.0"}}}}}"#;
        let tree = normalize(json, "", false);
        let a = &tree.children[0];
        assert_eq!(a.dependency_type, DependencyType::Missing);
        assert!(a.children.is_empty());
        assert!(a.version.is_none());
    }

    #[test]
    fn root_dev_dependencies_are_filtered_unless_requested() {
        let json = r#"{
          "name": "app",
          "devDependencies": {"b": "^1.0.0"},
          "dependencies": {
            "a": {"version": "1.0.0"},
            "b": {"version": "1.0.0"},
            "c": {"version": "1.0.0", "dev": true}
          }
        }"#;
        assert_eq!(names(&normalize(json, "", false).children), vec!["a@1.0.0"]);

        let with_dev = normalize(json, "", true);
        assert_eq!(
            names(&with_dev.children),
            vec!["a@1.0.0", "b@1.0.0", "c@1.0.0"]
        );
        assert_eq!(with_dev.children[2].dependency_type, DependencyType::Dev);
    }

    #[test]
    fn checksum_uses_nested_then_hoisted_install_location() {
        let json = r#"{"dependencies": {"a": {"version": "1.0.0", "dependencies": {
            "nested": {"version": "0.1.0"},
            "shared": {"version": "2.0.0"},
            "nowhere": {"version": "9.9.9"}
        }}}}"#;
        let tree = normalize(json, "", false);
        let a = &tree.children[0];
        let nested = &a.children[0];
        let shared = &a.children[1];
        let nowhere = &a.children[2];
        assert!(a.checksum.is_some());
        assert!(nested.checksum.is_some());
        assert!(shared.checksum.is_some());
        assert_ne!(nested.checksum, shared.checksum);
        assert!(nowhere.checksum.is_none());
        assert_eq!(nowhere.dependency_type, DependencyType::Transitive);
    }

    #[test]
    fn explicit_path_field_takes_precedence() {
        let json = r#"{"dependencies": {"b": {"version": "1.0.0", "path": "/app/node_modules/a"}}}"#;
        let tree = normalize(json, "", false);
        let expected = provider_with(&["/app/node_modules/a"])
            .fingerprint_installed(Path::new("/app/node_modules/a"))
            .into_option();
        assert_eq!(tree.children[0].checksum, expected);
    }

    #[test]
    fn diamond_is_expanded_once_with_reference_nodes() {
        let json = r#"{"dependencies": {
          "a": {"version": "1.0.0", "dependencies": {
              "shared": {"version": "2.0.0", "dependencies": {"leaf": {"version": "1.0.0"}}}
          }},
          "b": {"version": "1.0.0", "dependencies": {
              "shared": {"version": "2.0.0", "dependencies": {"leaf": {"version": "1.0.0"}}}
          }}
        }}"#;
        let tree = normalize(json, "", false);
        let full = tree
            .nodes()
            .into_iter()
            .filter(|node| node.name == "shared" && !node.reference)
            .count();
        assert_eq!(full, 1);
        let reference = &tree.children[1].children[0];
        assert!(reference.reference);
        assert!(reference.children.is_empty());
        assert_eq!(reference.checksum, tree.children[0].children[0].checksum);
    }

    #[test]
    fn deduped_stub_seen_first_borrows_later_expansion() {
        let json = r#"{"dependencies": {
          "a": {"version": "1.0.0", "dependencies": {"shared": {"version": "2.0.0"}}},
          "b": {"version": "1.0.0", "dependencies": {
              "shared": {"version": "2.0.0", "dependencies": {"leaf": {"version": "1.0.0"}}}
          }}
        }}"#;
        let plain = "app@1.0.0\n├─┬ a@1.0.0\n│ └── shared@2.0.0 deduped\n└─┬ b@1.0.0\n  └─┬ shared@2.0.0\n    └── leaf@1.0.0\n";

        let tree = normalize(json, plain, false);
        let shared = &tree.children[0].children[0];
        assert!(!shared.reference);
        assert_eq!(names(&shared.children), vec!["leaf@1.0.0"]);
        assert!(tree.children[1].children[0].reference);

        let without_markers = normalize(json, "", false);
        assert!(without_markers.children[0].children[0].children.is_empty());
    }

    #[test]
    fn keys_in_name_at_version_form_are_accepted() {
        let json = r#"{"dependencies": {"@scope/pkg@1.2.3": {"dependencies": {}}}}"#;
        let tree = normalize(json, "", false);
        assert_eq!(tree.children[0].name, "@scope/pkg");
        assert_eq!(tree.children[0].version.as_deref(), Some("1.2.3"));
        assert_eq!(tree.children[0].dependency_type, DependencyType::Direct);
    }

    #[test]
    fn borrowed_expansion_resolves_children_where_it_was_listed() {
        let json = r#"{"dependencies": {
          "a": {"version": "1.0.0", "dependencies": {"shared": {"version": "2.0.0"}}},
          "b": {"version": "1.0.0", "dependencies": {
              "shared": {"version": "2.0.0", "dependencies": {"inner": {"version": "3.0.0"}}}
          }}
        }}"#;
        let plain = "app@1.0.0\n├─┬ a@1.0.0\n│ └── shared@2.0.0 deduped\n└─┬ b@1.0.0\n  └─┬ shared@2.0.0\n    └── inner@3.0.0\n";
        let inner_dir = "/app/node_modules/b/node_modules/shared/node_modules/inner";
        let provider = provider_with(&["/app/node_modules/a", "/app/node_modules/b", inner_dir]);

        let tree = normalize_listing(
            json,
            plain,
            Path::new("/app"),
            &NormalizeOptions::default(),
            &provider,
        )
        .expect("normalize listing");
        let inner = &tree.children[0].children[0].children[0];
        assert_eq!(inner.name, "inner");
        assert_eq!(
            inner.checksum,
            provider.fingerprint_installed(Path::new(inner_dir)).into_option()
        );
        assert!(inner.checksum.is_some());
    }

    #[test]
    fn borrowed_expansion_that_loops_back_terminates() {
        let json = r#"{"dependencies": {
          "a": {"version": "1.0.0"},
          "b": {"version": "1.0.0", "dependencies": {
              "a": {"version": "1.0.0", "dependencies": {"b": {"version": "1.0.0"}}}
          }}
        }}"#;
        let plain = "app@1.0.0\n├── a@1.0.0 deduped\n└─┬ b@1.0.0\n  └─┬ a@1.0.0\n    └── b@1.0.0 deduped\n";

        let tree = normalize(json, plain, false);
        let a = &tree.children[0];
        assert!(!a.reference);
        assert_eq!(names(&a.children), vec!["b@1.0.0"]);
        let b = &a.children[0];
        assert!(!b.reference);
        assert_eq!(names(&b.children), vec!["a@1.0.0"]);
        assert!(b.children[0].reference);
        assert!(b.children[0].children.is_empty());
        assert!(tree.children[1].reference);
        assert_eq!(tree.nodes().len(), 4);
    }
}
