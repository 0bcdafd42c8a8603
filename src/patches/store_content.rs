use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;

use compio::fs;
use snafu::{OptionExt, ResultExt, ensure};
use tracing::debug;

use crate::content_store::{ContentStore, ContentStoreError, EntryKind};
use crate::operations::{OpSet, diff_to_operation};
use crate::patches::names::{dir_prefix, is_readable_path, is_valid_path, storage_name};
use crate::patches::node::{Change, Node};
use crate::patches::store::{
    BlobSnafu, ContentSnafu, CycleSnafu, ImmutableSnafu, InvalidPathSnafu, MissingBaseCommitSnafu,
    NotUtf8Snafu, PatchStore, PathExistsSnafu, PathMissingSnafu, StoreError,
};

/// Resolved content of one path at one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathContent {
    /// Content at the parent, when it was asked for. Always `None` at the root.
    pub base: Option<String>,
    pub current: String,
}

/// Whether a write honours the immutability of nodes with children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    Checked,
    /// Only for restructuring, which re-derives a consistent state.
    Bypass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub name: String,
    pub kind: EntryKind,
    pub deleted: bool,
}

/// Trees first, then by name.
pub fn sort_entries(entries: &mut [PathEntry]) {
    entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
}

impl<S: ContentStore> PatchStore<S> {
    /// Resolves `path` at `node`.
    ///
    /// A node storing the path itself answers directly unless the base is wanted too; everything
    /// else is found by walking up to the nearest ancestor that changed the path, or the root.
    pub async fn get_path_content(
        &self,
        node: &Node,
        path: &str,
        with_base: bool,
    ) -> Result<PathContent, StoreError> {
        ensure!(is_readable_path(path), InvalidPathSnafu { path });

        if node.is_root() {
            return Ok(PathContent {
                base: None,
                current: self.read_root(node, path).await?,
            });
        }

        if !with_base && let Some(change) = node.changes.get(path) {
            return Ok(PathContent {
                base: None,
                current: self.read_change(node, path, change).await?,
            });
        }

        let base = match node.parent {
            Some(parent) => {
                let parent = self.load_by_identity(parent).await?;
                self.resolve(&parent, path).await?
            }
            None => String::new(),
        };
        let current = match node.changes.get(path) {
            Some(change) => self.read_change(node, path, change).await?,
            None => base.clone(),
        };

        Ok(PathContent {
            base: Some(base),
            current,
        })
    }

    /// Current content of `path` at `node`, found without recursion.
    async fn resolve(&self, node: &Node, path: &str) -> Result<String, StoreError> {
        let mut seen = HashSet::new();
        let mut current = node.clone();

        loop {
            ensure!(seen.insert(current.identity), CycleSnafu { id: &node.id });

            if let Some(change) = current.changes.get(path) {
                return self.read_change(&current, path, change).await;
            }
            match current.parent {
                Some(parent) if !current.is_root() => {
                    current = self.load_by_identity(parent).await?;
                }
                _ => return self.read_root(&current, path).await,
            }
        }
    }

    /// Root content. Paths absent from the snapshot resolve to empty content.
    async fn read_root(&self, root: &Node, path: &str) -> Result<String, StoreError> {
        let commit = root
            .base_commit
            .as_deref()
            .context(MissingBaseCommitSnafu { id: &root.id })?;

        let bytes = match self.content.read(commit, path).await {
            Ok(bytes) => bytes,
            Err(ContentStoreError::Missing { .. }) => return Ok(String::new()),
            Err(e) => return Err(e).context(ContentSnafu),
        };
        String::from_utf8(bytes).context(NotUtf8Snafu { path })
    }

    async fn read_change(
        &self,
        node: &Node,
        path: &str,
        change: &Change,
    ) -> Result<String, StoreError> {
        match change {
            Change::Delete => Ok(String::new()),
            Change::Write { storage } => {
                let blob = self.node_dir(&node.id).join(storage);
                let bytes = fs::read(&blob).await.context(BlobSnafu { path: &blob })?;
                String::from_utf8(bytes).context(NotUtf8Snafu { path })
            }
        }
    }

    /// Stores `content` as the new state of `path` at `node`. Empty content is recorded as a
    /// deletion.
    pub async fn write_path_content(
        &self,
        node: &Node,
        path: &str,
        content: &str,
        guard: WriteGuard,
    ) -> Result<Node, StoreError> {
        ensure!(is_valid_path(path), InvalidPathSnafu { path });

        let mut node = self.load_by_identity(node.identity).await?;
        ensure!(
            !node.is_root() && (guard == WriteGuard::Bypass || !node.has_children()),
            ImmutableSnafu { id: &node.id }
        );

        let dir = self.node_dir(&node.id);
        let change = if content.is_empty() {
            if let Some(Change::Write { storage }) = node.changes.get(path) {
                let blob = dir.join(storage);
                match fs::remove_file(&blob).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e).context(BlobSnafu { path: &blob }),
                }
            }
            Change::Delete
        } else {
            let storage = storage_name(path);
            let blob = dir.join(&storage);
            fs::write(&blob, content.as_bytes().to_vec())
                .await
                .0
                .context(BlobSnafu { path: &blob })?;
            Change::Write { storage }
        };
        debug!("Wrote '{}' in node '{}' ({:?})", path, node.id, change);

        if node.changes.get(path) != Some(&change) {
            node.changes.insert(path.to_string(), change);
            self.save(&node).await?;
        }
        Ok(node)
    }

    /// Lists `dir` at `node`: the base listing overlaid with every change along the chain.
    pub async fn get_paths(
        &self,
        node: &Node,
        dir: &str,
        recursive: bool,
        include_deleted: bool,
    ) -> Result<Vec<PathEntry>, StoreError> {
        let trimmed = dir.trim_matches('/');
        ensure!(
            trimmed.is_empty() || is_readable_path(trimmed),
            InvalidPathSnafu { path: dir }
        );
        let prefix = dir_prefix(dir);
        let mut chain = self.ancestors(node).await?;
        chain.push(node.clone());

        // relative file name -> deleted
        let mut files: BTreeMap<String, bool> = BTreeMap::new();
        for layer in &chain {
            if layer.is_root() {
                let commit = layer
                    .base_commit
                    .as_deref()
                    .context(MissingBaseCommitSnafu { id: &layer.id })?;
                let listing = match self.content.list(commit, &prefix, true).await {
                    Ok(listing) => listing,
                    Err(ContentStoreError::Missing { .. }) => Vec::new(),
                    Err(e) => return Err(e).context(ContentSnafu),
                };
                files.extend(listing.into_iter().map(|entry| (entry.name, false)));
                continue;
            }

            for (path, change) in &layer.changes {
                if let Some(relative) = path.strip_prefix(&prefix) {
                    files.insert(relative.to_string(), *change == Change::Delete);
                }
            }
        }

        let mut entries: Vec<PathEntry> = if recursive {
            files
                .into_iter()
                .map(|(name, deleted)| PathEntry {
                    name,
                    kind: EntryKind::Blob,
                    deleted,
                })
                .collect()
        } else {
            // A directory only counts as deleted once everything in it is.
            let mut level: BTreeMap<(EntryKind, String), bool> = BTreeMap::new();
            for (name, deleted) in files {
                let key = match name.split_once('/') {
                    Some((top, _)) => (EntryKind::Tree, top.to_string()),
                    None => (EntryKind::Blob, name),
                };
                level
                    .entry(key)
                    .and_modify(|all_deleted| *all_deleted &= deleted)
                    .or_insert(deleted);
            }
            level
                .into_iter()
                .map(|((kind, name), deleted)| PathEntry {
                    name,
                    kind,
                    deleted,
                })
                .collect()
        };

        if !include_deleted {
            entries.retain(|entry| !entry.deleted);
        }
        sort_entries(&mut entries);
        Ok(entries)
    }

    pub async fn path_exists(&self, node: &Node, path: &str) -> Result<bool, StoreError> {
        let content = self.get_path_content(node, path, false).await?;
        Ok(!content.current.is_empty())
    }

    /// Moves the content of `from` to `to` within `node`.
    pub async fn rename_path(&self, node: &Node, from: &str, to: &str) -> Result<Node, StoreError> {
        ensure!(is_valid_path(to), InvalidPathSnafu { path: to });

        let content = self.get_path_content(node, from, false).await?.current;
        ensure!(!content.is_empty(), PathMissingSnafu { path: from });
        ensure!(
            !self.path_exists(node, to).await?,
            PathExistsSnafu { path: to }
        );

        let node = self
            .write_path_content(node, to, &content, WriteGuard::Checked)
            .await?;
        self.write_path_content(&node, from, "", WriteGuard::Checked)
            .await
    }

    /// The change-set of `node` as operations from its parent's content.
    pub async fn get_operations(&self, node: &Node) -> Result<OpSet, StoreError> {
        let mut operations = OpSet::new();
        if node.is_root() {
            return Ok(operations);
        }

        for path in node.changes.keys() {
            let content = self.get_path_content(node, path, true).await?;
            let base = content.base.unwrap_or_default();
            operations.insert(
                path.clone(),
                diff_to_operation(&base, &content.current, self.settings.granularity),
            );
        }
        Ok(operations)
    }
}
