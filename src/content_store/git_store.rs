use std::path::PathBuf;

use compio::process::Command;
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::content_store::content_store::{
    ContentStore, ContentStoreError, GitFailedSnafu, GitOutputSnafu, GitSpawnSnafu,
};
use crate::content_store::{EntryKind, StoreEntry};
use crate::ext::BestEffortPathExt;

/// Base content read from a git repository through the `git` executable.
#[derive(Debug, Clone)]
pub struct GitStore {
    repository: PathBuf,
}

impl GitStore {
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<Vec<u8>, ContentStoreError> {
        let joined = args.join(" ");
        debug!(
            "Running git {} in {}",
            joined,
            self.repository.best_effort_path_display()
        );

        let mut command = Command::new("git");
        command.args(args);
        command.current_dir(&self.repository);
        let output = command
            .output()
            .await
            .context(GitSpawnSnafu { args: joined.clone() })?;

        ensure!(
            output.status.success(),
            GitFailedSnafu {
                args: joined,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
        );
        Ok(output.stdout)
    }

    /// Parses `git ls-tree -lz` output. Each record is `<mode> <type> <hash> <size>\t<name>`.
    fn parse_ls_tree(output: &[u8], prefix: &str) -> Result<Vec<StoreEntry>, ContentStoreError> {
        let text = String::from_utf8_lossy(output);
        let mut entries = Vec::new();

        for record in text.split('\0').filter(|record| !record.is_empty()) {
            let malformed = || ContentStoreError::GitOutput {
                args: "ls-tree".to_string(),
                output: record.to_string(),
            };

            let (info, name) = record.split_once('\t').ok_or_else(malformed)?;
            let fields: Vec<&str> = info.split_whitespace().collect();
            let [_mode, kind, hash, size] = fields.as_slice() else {
                return Err(malformed());
            };
            let name = name.strip_prefix(prefix).ok_or_else(malformed)?;

            entries.push(match *kind {
                "tree" => StoreEntry::tree(name),
                _ => StoreEntry::blob(name, Some(hash.to_string()), size.parse().ok()),
            });
        }

        Ok(entries)
    }
}

impl ContentStore for GitStore {
    async fn head(&self, branch: Option<&str>) -> Result<String, ContentStoreError> {
        let revision = branch.unwrap_or("HEAD");
        let output = self.git(&["rev-parse", "--verify", revision]).await?;
        let hash = String::from_utf8_lossy(&output).trim().to_string();

        ensure!(
            !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit()),
            GitOutputSnafu {
                args: format!("rev-parse {revision}"),
                output: hash,
            }
        );
        Ok(hash)
    }

    async fn list(
        &self,
        commit: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<StoreEntry>, ContentStoreError> {
        // Listing the inside of a directory needs the trailing slash.
        let prefix = match path.trim_end_matches('/') {
            "" => String::new(),
            trimmed => format!("{trimmed}/"),
        };
        let flags = if recursive { "-lzr" } else { "-lz" };

        // git refuses an empty pathspec, the top level is listed without one.
        let mut args = vec!["ls-tree", flags, commit];
        if !prefix.is_empty() {
            args.push(&prefix);
        }
        let output = self.git(&args).await?;
        let entries = Self::parse_ls_tree(&output, &prefix)?;
        debug!("Listed {} entries under '{}'", entries.len(), prefix);

        Ok(entries
            .into_iter()
            .filter(|entry| !recursive || entry.kind == EntryKind::Blob)
            .collect())
    }

    async fn read(&self, commit: &str, path: &str) -> Result<Vec<u8>, ContentStoreError> {
        let object = format!("{commit}:{path}");
        if self.git(&["cat-file", "-e", &object]).await.is_err() {
            return Err(ContentStoreError::Missing {
                path: path.to_string(),
            });
        }
        self.git(&["cat-file", "blob", &object]).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .status()
            .expect("Failed to run git");
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn parses_ls_tree_records() {
        let output = b"100644 blob 3b18e512dba79e4c8300dd08aeb37f8e728b8dad      12\tdocs/a.txt\0\
040000 tree 9bd4d5b7dd0ea2a8f2a48a4cbc9d7b7e4a1f0c11       -\tdocs/sub\0";
        let entries = GitStore::parse_ls_tree(output, "docs/").unwrap();
        assert_eq!(
            entries,
            vec![
                StoreEntry::blob(
                    "a.txt",
                    Some("3b18e512dba79e4c8300dd08aeb37f8e728b8dad".to_string()),
                    Some(12)
                ),
                StoreEntry::tree("sub"),
            ]
        );
    }

    #[test]
    fn rejects_records_outside_the_prefix() {
        let output = b"100644 blob 3b18e512dba79e4c8300dd08aeb37f8e728b8dad 12\tother/a.txt\0";
        assert!(matches!(
            GitStore::parse_ls_tree(output, "docs/"),
            Err(ContentStoreError::GitOutput { .. })
        ));
    }

    #[compio::test]
    async fn reports_missing_repository() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let store = GitStore::new(dir.path().join("not-a-repo"));
        assert!(store.head(None).await.is_err());
    }

    #[compio::test]
    async fn reads_a_committed_snapshot() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        std::fs::create_dir_all(dir.path().join("docs/sub")).expect("Failed to create dirs");
        std::fs::write(dir.path().join("a.txt"), "hello world").expect("Failed to write");
        std::fs::write(dir.path().join("docs/b.txt"), "bee").expect("Failed to write");
        std::fs::write(dir.path().join("docs/sub/c.txt"), "sea").expect("Failed to write");
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "snapshot"]);

        let store = GitStore::new(dir.path());
        let head = store.head(None).await.unwrap();
        assert!(head.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(store.read(&head, "a.txt").await.unwrap(), b"hello world");
        assert!(matches!(
            store.read(&head, "nope.txt").await,
            Err(ContentStoreError::Missing { .. })
        ));

        let top: Vec<_> = store
            .list(&head, "", false)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.kind))
            .collect();
        assert_eq!(
            top,
            vec![
                ("a.txt".to_string(), EntryKind::Blob),
                ("docs".to_string(), EntryKind::Tree)
            ]
        );

        let nested: Vec<_> = store
            .list(&head, "docs", true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(nested, vec!["b.txt", "sub/c.txt"]);
    }
}
