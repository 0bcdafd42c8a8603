use std::hash::Hasher;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use compio::fs;
use metrohash::MetroHash64;
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::content_store::content_store::{
    ContentStore, ContentStoreError, IoSnafu, OutsideSnapshotSnafu,
};
use crate::content_store::{EntryKind, StoreEntry};
use crate::ext::BestEffortPathExt;

/// Base content taken from a plain directory on disk.
///
/// The directory is treated as an immutable snapshot; its head is a fingerprint of the file names
/// and sizes it holds.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Joins `path` below the snapshot root, refusing anything that could step outside it.
    fn resolve(&self, path: &str) -> Result<PathBuf, ContentStoreError> {
        let mut resolved = self.root.clone();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            ensure!(
                segment != "." && segment != ".." && !segment.contains('\\'),
                OutsideSnapshotSnafu { path }
            );
            resolved.push(segment);
        }
        Ok(resolved)
    }

    /// Walks `dir` without recursion. Names are relative to `dir` and `/`-separated.
    fn walk(dir: &Path, recursive: bool) -> Result<Vec<StoreEntry>, ContentStoreError> {
        let mut entries = Vec::new();
        let mut pending = vec![(dir.to_path_buf(), String::new())];

        while let Some((current, prefix)) = pending.pop() {
            let read_dir = match std::fs::read_dir(&current) {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e).context(IoSnafu { path: current }),
            };

            for item in read_dir {
                let item = item.context(IoSnafu {
                    path: current.clone(),
                })?;
                let metadata = item.metadata().context(IoSnafu { path: item.path() })?;
                let name = format!("{prefix}{}", item.file_name().to_string_lossy());

                if metadata.is_dir() {
                    if recursive {
                        pending.push((item.path(), format!("{name}/")));
                    } else {
                        entries.push(StoreEntry::tree(name));
                    }
                } else {
                    entries.push(StoreEntry::blob(name, None, Some(metadata.len())));
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl ContentStore for DirectoryStore {
    async fn head(&self, branch: Option<&str>) -> Result<String, ContentStoreError> {
        if let Some(branch) = branch {
            debug!("Ignoring branch '{}' for a directory snapshot", branch);
        }

        let mut hasher = MetroHash64::default();
        for entry in Self::walk(&self.root, true)? {
            hasher.write(entry.name.as_bytes());
            hasher.write_u64(entry.size.unwrap_or_default());
        }
        Ok(format!("dir-{:016x}", hasher.finish()))
    }

    async fn list(
        &self,
        _commit: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<StoreEntry>, ContentStoreError> {
        let dir = self.resolve(path)?;
        debug!("Listing {}", dir.best_effort_path_display());
        let entries = Self::walk(&dir, recursive)?;
        Ok(entries
            .into_iter()
            .filter(|entry| !recursive || entry.kind == EntryKind::Blob)
            .collect())
    }

    async fn read(&self, _commit: &str, path: &str) -> Result<Vec<u8>, ContentStoreError> {
        let file = self.resolve(path)?;
        match fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ContentStoreError::Missing {
                path: path.to_string(),
            }),
            Err(e) => Err(e).context(IoSnafu { path: file }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot() -> TempDir {
        let dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::create_dir_all(dir.path().join("docs/sub")).expect("Failed to create dirs");
        std::fs::write(dir.path().join("a.txt"), "hello world").expect("Failed to write");
        std::fs::write(dir.path().join("docs/b.txt"), "bee").expect("Failed to write");
        std::fs::write(dir.path().join("docs/sub/c.txt"), "sea").expect("Failed to write");
        dir
    }

    #[compio::test]
    async fn lists_one_level() {
        let dir = snapshot();
        let store = DirectoryStore::new(dir.path());
        let names: Vec<_> = store
            .list("", "docs", false)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.kind))
            .collect();
        assert_eq!(
            names,
            vec![
                ("b.txt".to_string(), EntryKind::Blob),
                ("sub".to_string(), EntryKind::Tree)
            ]
        );
    }

    #[compio::test]
    async fn lists_recursively_with_relative_names() {
        let dir = snapshot();
        let store = DirectoryStore::new(dir.path());
        let names: Vec<_> = store
            .list("", "", true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "docs/b.txt", "docs/sub/c.txt"]);
    }

    #[compio::test]
    async fn reads_files_and_reports_missing_ones() {
        let dir = snapshot();
        let store = DirectoryStore::new(dir.path());
        assert_eq!(store.read("", "docs/b.txt").await.unwrap(), b"bee");
        assert!(matches!(
            store.read("", "nope.txt").await,
            Err(ContentStoreError::Missing { .. })
        ));
    }

    #[compio::test]
    async fn refuses_paths_leaving_the_snapshot() {
        let dir = snapshot();
        let store = DirectoryStore::new(dir.path().join("docs"));
        assert!(matches!(
            store.read("", "../a.txt").await,
            Err(ContentStoreError::OutsideSnapshot { .. })
        ));
        assert!(matches!(
            store.list("", "sub/..", false).await,
            Err(ContentStoreError::OutsideSnapshot { .. })
        ));
        assert_eq!(store.read("", "sub/c.txt").await.unwrap(), b"sea");
    }

    #[compio::test]
    async fn head_changes_with_the_snapshot() {
        let dir = snapshot();
        let store = DirectoryStore::new(dir.path());
        let first = store.head(None).await.unwrap();
        assert_eq!(first, store.head(Some("main")).await.unwrap());

        std::fs::write(dir.path().join("new.txt"), "x").expect("Failed to write");
        assert_ne!(first, store.head(None).await.unwrap());
    }
}
