//! Content fingerprints for installed packages and lockfile entries.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::LockEntry;

/// Manifest file hashed for filesystem-resolved packages.
pub const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Available(String),
    Unavailable,
}

impl Fingerprint {
    pub fn into_option(self) -> Option<String> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable => None,
        }
    }
}

/// File access used to read package manifests. `None` means not found or unreadable.
pub trait ChecksumBackend {
    fn read(&self, path: &Path) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsChecksumBackend;

impl ChecksumBackend for FsChecksumBackend {
    fn read(&self, path: &Path) -> Option<Vec<u8>> {
        std::fs::read(path).ok()
    }
}

impl ChecksumBackend for HashMap<PathBuf, Vec<u8>> {
    fn read(&self, path: &Path) -> Option<Vec<u8>> {
        self.get(path).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct ChecksumProvider<B> {
    backend: B,
}

impl<B: ChecksumBackend> ChecksumProvider<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Hashes the manifest of the package installed at `package_dir`.
    pub fn fingerprint_installed(&self, package_dir: &Path) -> Fingerprint {
        match self.backend.read(&package_dir.join(MANIFEST_FILE)) {
            Some(bytes) => Fingerprint::Available(digest(&[bytes.as_slice()])),
            None => Fingerprint::Unavailable,
        }
    }

    /// Returns the first candidate directory holding a readable manifest, with its fingerprint.
    pub fn locate_installed(&self, candidates: &[PathBuf]) -> Option<(PathBuf, String)> {
        candidates.iter().find_map(|dir| {
            self.fingerprint_installed(dir)
                .into_option()
                .map(|checksum| (dir.clone(), checksum))
        })
    }
}

/// Fingerprint of a lockfile entry: `resolved` + `integrity`, or `version` + `name` as a fallback.
pub fn fingerprint_lock_entry(name: &str, entry: &LockEntry) -> Fingerprint {
    match entry.resolved.as_deref() {
        Some(resolved) => {
            let integrity = entry.integrity.as_deref().unwrap_or_default();
            Fingerprint::Available(digest(&[resolved.as_bytes(), integrity.as_bytes()]))
        }
        None => match entry.version.as_deref() {
            Some(version) => Fingerprint::Available(digest(&[version.as_bytes(), name.as_bytes()])),
            None => Fingerprint::Unavailable,
        },
    }
}

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
