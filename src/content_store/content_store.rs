use std::path::PathBuf;

use snafu::Snafu;

use crate::content_store::{DirectoryStore, GitStore, StoreEntry};
use crate::ext::BestEffortPathExt;

/// Read-only access to the snapshot the root node stands for.
pub trait ContentStore {
    /// Resolves the snapshot reference for `branch`, or the default head.
    async fn head(&self, branch: Option<&str>) -> Result<String, ContentStoreError>;
    /// Lists `path` (empty for the top level) at `commit`. Recursive listings contain blobs only,
    /// named relative to `path`.
    async fn list(
        &self,
        commit: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<StoreEntry>, ContentStoreError>;
    /// Reads a file. A path absent from the snapshot is reported as `Missing`.
    async fn read(&self, commit: &str, path: &str) -> Result<Vec<u8>, ContentStoreError>;
}

#[derive(Debug, Clone)]
pub enum BaseContent {
    Git(GitStore),
    Directory(DirectoryStore),
}

impl ContentStore for BaseContent {
    async fn head(&self, branch: Option<&str>) -> Result<String, ContentStoreError> {
        match self {
            BaseContent::Git(store) => store.head(branch).await,
            BaseContent::Directory(store) => store.head(branch).await,
        }
    }

    async fn list(
        &self,
        commit: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<StoreEntry>, ContentStoreError> {
        match self {
            BaseContent::Git(store) => store.list(commit, path, recursive).await,
            BaseContent::Directory(store) => store.list(commit, path, recursive).await,
        }
    }

    async fn read(&self, commit: &str, path: &str) -> Result<Vec<u8>, ContentStoreError> {
        match self {
            BaseContent::Git(store) => store.read(commit, path).await,
            BaseContent::Directory(store) => store.read(commit, path).await,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ContentStoreError {
    #[snafu(display("'{}' does not exist in the base snapshot", path))]
    Missing { path: String },
    #[snafu(display("'{}' points outside the base snapshot", path))]
    OutsideSnapshot { path: String },
    #[snafu(display("Failed to access the base snapshot at {}", path.best_effort_path_display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to run git {}", args))]
    GitSpawn {
        args: String,
        source: std::io::Error,
    },
    #[snafu(display("git {} failed: {}", args, stderr))]
    GitFailed { args: String, stderr: String },
    #[snafu(display("Unexpected output from git {}: {}", args, output))]
    GitOutput { args: String, output: String },
}
