mod listing;
mod markers;

use std::path::PathBuf;

use depreport_core::{
    ChecksumBackend, ChecksumProvider, DependencySource, FsChecksumBackend, NormalizeError,
    NormalizeOptions, NormalizedTree, read_input,
};

pub use listing::normalize_listing;
pub use markers::deduped_markers;

pub const SOURCE_KEY: &str = "npm";

/// `npm ls --json` output plus the optional plain `npm ls` rendering of the same install.
pub struct NpmListingSource<B = FsChecksumBackend> {
    json_path: PathBuf,
    text_path: Option<PathBuf>,
    project_dir: PathBuf,
    provider: ChecksumProvider<B>,
}

impl NpmListingSource {
    pub fn new(json_path: PathBuf, text_path: Option<PathBuf>, project_dir: PathBuf) -> Self {
        Self::with_backend(json_path, text_path, project_dir, FsChecksumBackend)
    }
}

impl<B: ChecksumBackend> NpmListingSource<B> {
    pub fn with_backend(
        json_path: PathBuf,
        text_path: Option<PathBuf>,
        project_dir: PathBuf,
        backend: B,
    ) -> Self {
        Self {
            json_path,
            text_path,
            project_dir,
            provider: ChecksumProvider::new(backend),
        }
    }
}

impl<B: ChecksumBackend> DependencySource for NpmListingSource<B> {
    fn key(&self) -> &'static str {
        SOURCE_KEY
    }

    fn normalize(&self, options: &NormalizeOptions) -> Result<NormalizedTree, NormalizeError> {
        let json = read_input(&self.json_path)?;
        let plain = match &self.text_path {
            Some(path) => read_input(path)?,
            None => String::new(),
        };
        normalize_listing(&json, &plain, &self.project_dir, options, &self.provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depreport_core::DependencyType;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(suffix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("depreport-npm-{nanos}-{suffix}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn normalizes_listing_files_against_installed_manifests() {
        let dir = unique_temp_dir("installed");
        let package_dir = dir.join("node_modules").join("left-pad");
        std::fs::create_dir_all(&package_dir).expect("create package dir");
        std::fs::write(
            package_dir.join("package.json"),
            r#"{"name":"left-pad","version":"1.3.0"}"#,
        )
        .expect("write manifest");
        let json_path = dir.join("ls.json");
        std::fs::write(
            &json_path,
            r#"{"name":"app","version":"0.1.0","dependencies":{"left-pad":{"version":"1.3.0"}}}"#,
        )
        .expect("write listing");

        let source = NpmListingSource::new(json_path, None, dir.clone());
        let tree = source
            .normalize(&NormalizeOptions::default())
            .expect("normalize listing");

        assert_eq!(source.key(), "npm");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].dependency_type, DependencyType::Direct);
        assert!(tree.children[0].checksum.is_some());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_text_file_is_a_read_error() {
        let dir = unique_temp_dir("missing-text");
        let json_path = dir.join("ls.json");
        std::fs::write(&json_path, "{}").expect("write listing");

        let source = NpmListingSource::new(json_path, Some(dir.join("ls.txt")), dir.clone());
        let err = source
            .normalize(&NormalizeOptions::default())
            .expect_err("text file is absent");
        assert!(matches!(err, NormalizeError::ReadFile { .. }));

        let _ = std::fs::remove_dir_all(dir);
    }
}
