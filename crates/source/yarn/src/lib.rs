mod lockfile;
mod manifest;

use std::path::{Path, PathBuf};

use depreport_core::{
    DependencySource, MANIFEST_FILE, NormalizeError, NormalizeOptions, NormalizedTree,
    normalize_lockfile_graph, read_input, resolve_input,
};

pub use lockfile::parse_yarn_lock;
pub use manifest::{ProjectManifest, parse_manifest};

pub const SOURCE_KEY: &str = "yarn";
pub const LOCKFILE_NAME: &str = "yarn.lock";

#[derive(Debug, Clone)]
pub struct YarnLockfileSource {
    lock_path: PathBuf,
}

impl YarnLockfileSource {
    /// Accepts a `yarn.lock` path or a directory containing one; defaults to the current directory.
    pub fn from_input(path: Option<&str>) -> Result<Self, NormalizeError> {
        let lock_path = resolve_input(path, &[LOCKFILE_NAME])?;
        Ok(Self { lock_path })
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn manifest(&self, include_dev: bool) -> Result<Option<ProjectManifest>, NormalizeError> {
        let Some(manifest_path) = self.lock_path.parent().map(|dir| dir.join(MANIFEST_FILE)) else {
            return Ok(None);
        };
        if !manifest_path.is_file() {
            tracing::debug!(
                "no {MANIFEST_FILE} next to {}; deriving roots from the lockfile",
                self.lock_path.display()
            );
            return Ok(None);
        }
        let raw = read_input(&manifest_path)?;
        parse_manifest(&raw, include_dev).map(Some)
    }
}

impl DependencySource for YarnLockfileSource {
    fn key(&self) -> &'static str {
        SOURCE_KEY
    }

    fn normalize(&self, options: &NormalizeOptions) -> Result<NormalizedTree, NormalizeError> {
        let raw = read_input(&self.lock_path)?;
        let mut graph = parse_yarn_lock(&raw)?;
        let manifest = self.manifest(options.include_dev)?.unwrap_or_default();
        graph.set_roots(manifest.roots);

        tracing::debug!(
            "parsed {} lockfile specifiers from {}",
            graph.len(),
            self.lock_path.display()
        );

        let mut tree = normalize_lockfile_graph(&graph);
        tree.name = manifest.name;
        tree.version = manifest.version;
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depreport_core::DependencyType;
    use std::time::{SystemTime, UNIX_EPOCH};

    const LOCKFILE: &str = "\
# yarn lockfile v1

app-util@^1.0.0:
  version \"1.2.0\"
  resolved \"https://registry.yarnpkg.com/app-util/-/app-util-1.2.0.tgz\"
  integrity sha512-util
  dependencies:
    shared \"^2.0.0\"

jest@^29.0.0:
  version \"29.7.0\"
  dependencies:
    shared \"^2.0.0\"

shared@^2.0.0:
  version \"2.0.1\"
  integrity sha512-shared
";

    fn unique_temp_dir(suffix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("depreport-yarn-{nanos}-{suffix}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn names(tree: &NormalizedTree) -> Vec<String> {
        tree.children
            .iter()
            .map(|node| node.id().to_string())
            .collect()
    }

    #[test]
    fn manifest_roots_drive_the_walk() {
        let dir = unique_temp_dir("manifest");
        std::fs::write(dir.join("yarn.lock"), LOCKFILE).expect("write lockfile");
        std::fs::write(
            dir.join("package.json"),
            r#"{"name":"web","version":"1.0.0","dependencies":{"app-util":"^1.0.0"},"devDependencies":{"jest":"^29.0.0"}}"#,
        )
        .expect("write manifest");

        let source = YarnLockfileSource::from_input(dir.to_str()).expect("resolve lockfile");
        assert_eq!(source.lock_path(), dir.join("yarn.lock"));

        let tree = source
            .normalize(&NormalizeOptions::default())
            .expect("normalize lockfile");
        assert_eq!(tree.name.as_deref(), Some("web"));
        assert_eq!(tree.version.as_deref(), Some("1.0.0"));
        assert_eq!(names(&tree), vec!["app-util@1.2.0"]);
        assert_eq!(tree.children[0].children[0].dependency_type, DependencyType::Transitive);

        let with_dev = source
            .normalize(&NormalizeOptions { include_dev: true })
            .expect("normalize lockfile with dev");
        assert_eq!(names(&with_dev), vec!["app-util@1.2.0", "jest@29.7.0"]);
        let shared_again = &with_dev.children[1].children[0];
        assert!(shared_again.reference);
        assert_eq!(
            shared_again.checksum,
            with_dev.children[0].children[0].checksum
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn roots_are_derived_without_a_manifest() {
        let dir = unique_temp_dir("derived");
        let lock_path = dir.join("yarn.lock");
        std::fs::write(&lock_path, LOCKFILE).expect("write lockfile");

        let source =
            YarnLockfileSource::from_input(lock_path.to_str()).expect("resolve lockfile");
        let tree = source
            .normalize(&NormalizeOptions::default())
            .expect("normalize lockfile");
        assert!(tree.name.is_none());
        assert_eq!(names(&tree), vec!["app-util@1.2.0", "jest@29.7.0"]);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn directory_without_lockfile_is_rejected() {
        let dir = unique_temp_dir("empty");
        let err = YarnLockfileSource::from_input(dir.to_str()).expect_err("no lockfile");
        assert!(matches!(err, NormalizeError::NoSupportedDependencyFile { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }
}
