use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk layout rooted at the configured data directory.
///
/// `raw/` holds the input record files (read-only for the warehouse),
/// `.locks/` the cross-process lock files, and `warehouse.db` the embedded
/// analytic store unless overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPaths {
    root: PathBuf,
    db_path: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let db_path = root.join("warehouse.db");
        Self { root, db_path }
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{name}.lock"))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Rewrite a stored (possibly foreign-OS) relative path into an absolute
    /// path under the raw root, using the local separator.
    ///
    /// The store carries forward-slash paths; a warehouse moved between
    /// operating systems must still resolve them against its own root.
    pub fn resolve_raw(&self, stored: &str) -> PathBuf {
        let normalized = stored.replace('\\', "/");
        let mut out = self.raw_dir();
        for segment in normalized.split('/').filter(|s| !s.is_empty() && *s != ".") {
            out.push(segment);
        }
        out
    }

    /// Inverse of [`resolve_raw`](Self::resolve_raw): strip the raw root and
    /// normalize to forward slashes for storage.
    pub fn normalize_for_store(&self, path: &Path) -> String {
        let relative = path.strip_prefix(self.raw_dir()).unwrap_or(path);
        let mut out = String::new();
        for component in relative.components() {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&component.as_os_str().to_string_lossy());
        }
        out
    }
}
