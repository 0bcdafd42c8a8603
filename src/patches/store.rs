use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use compio::fs;
use futures::future::try_join_all;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, info, warn};

use crate::content_store::{ContentStore, ContentStoreError};
use crate::ext::{AsyncTryInto, BestEffortPathExt};
use crate::operations::DiffGranularity;
use crate::patches::identity_cache::IdentityCache;
use crate::patches::names::{DEFAULT_NODE_NAME, id_candidates, is_valid_node_id};
use crate::patches::node::{INDEX_FILE_NAME, Identity, Metadata, Node, NodeRecordError};

pub const ROOT_NODE_ID: &str = "root";

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Branch whose head becomes the root snapshot on first run.
    pub branch: Option<String>,
    pub granularity: DiffGranularity,
    pub identity_cache_capacity: usize,
    /// Unchanged lines kept around an ellipsis in human diffs.
    pub diff_context: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            branch: None,
            granularity: DiffGranularity::default(),
            identity_cache_capacity: 256,
            diff_context: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The node still changes these paths, nothing was deleted.
    Modified { paths: Vec<String> },
}

/// Durable storage of the patch tree: one directory per node under the workspace.
///
/// Every mutating method reloads the records it touches by identity, so callers may hold on to
/// stale `Node` values between calls.
pub struct PatchStore<S: ContentStore> {
    pub(super) workspace: PathBuf,
    pub(super) content: S,
    pub(super) settings: StoreSettings,
    pub(super) cache: IdentityCache,
}

impl<S: ContentStore> PatchStore<S> {
    /// Opens the workspace, creating it and its root node on first use.
    pub async fn open(
        workspace: impl Into<PathBuf>,
        content: S,
        settings: StoreSettings,
    ) -> Result<Self, StoreError> {
        let workspace = workspace.into();
        fs::create_dir_all(&workspace)
            .await
            .context(WorkspaceSnafu { path: &workspace })?;

        let store = Self {
            cache: IdentityCache::new(settings.identity_cache_capacity),
            workspace,
            content,
            settings,
        };

        if store.node_ids()?.is_empty() {
            let head = store
                .content
                .head(store.settings.branch.as_deref())
                .await
                .context(ContentSnafu)?;
            info!("Creating root node for base snapshot {}", head);
            store.save(&Node::new_root(ROOT_NODE_ID, head)).await?;
        }

        Ok(store)
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub(super) fn node_dir(&self, id: &str) -> PathBuf {
        self.workspace.join(id)
    }

    /// Ids of every node directory, sorted.
    pub fn node_ids(&self) -> Result<Vec<String>, StoreError> {
        let read_dir = std::fs::read_dir(&self.workspace).context(WorkspaceSnafu {
            path: &self.workspace,
        })?;

        let mut ids = Vec::new();
        for item in read_dir {
            let item = item.context(WorkspaceSnafu {
                path: &self.workspace,
            })?;
            let name = item.file_name().to_string_lossy().to_string();
            if is_valid_node_id(&name) && item.path().join(INDEX_FILE_NAME).is_file() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn load(&self, id: &str) -> Result<Node, StoreError> {
        ensure!(is_valid_node_id(id), NotFoundSnafu { id });

        let dir = self.node_dir(id);
        let loaded: Result<Node, NodeRecordError> = dir.as_path().async_try_into().await;
        let node = match loaded {
            Ok(node) => node,
            Err(NodeRecordError::Missing { .. }) => return NotFoundSnafu { id }.fail(),
            Err(e) => return Err(e).context(RecordSnafu),
        };
        self.cache.remember(node.identity, id);
        Ok(node)
    }

    /// Loads a node by identity. The cache is only trusted once the loaded record confirms it;
    /// otherwise the whole workspace is scanned.
    pub async fn load_by_identity(&self, identity: Identity) -> Result<Node, StoreError> {
        if let Some(id) = self.cache.get(&identity) {
            match self.load(&id).await {
                Ok(node) if node.identity == identity => return Ok(node),
                Ok(_) | Err(StoreError::NotFound { .. }) => {
                    debug!("Stale identity cache entry {} -> '{}'", identity, id);
                }
                Err(e) => return Err(e),
            }
            self.cache.forget(&identity);
        }

        debug!("Scanning workspace for identity {}", identity);
        for id in self.node_ids()? {
            let node = self.load(&id).await?;
            if node.identity == identity {
                return Ok(node);
            }
        }
        IdentityNotFoundSnafu { identity }.fail()
    }

    pub async fn save(&self, node: &Node) -> Result<(), StoreError> {
        node.write_to(&self.node_dir(&node.id))
            .await
            .context(RecordSnafu)?;
        self.cache.remember(node.identity, node.id.clone());
        Ok(())
    }

    /// Every node in the workspace, in id order.
    pub async fn all_nodes(&self) -> Result<Vec<Node>, StoreError> {
        self.cache.clear();
        let mut nodes = Vec::new();
        for id in self.node_ids()? {
            nodes.push(self.load(&id).await?);
        }
        Ok(nodes)
    }

    pub async fn root(&self) -> Result<Node, StoreError> {
        if let Ok(root) = self.load(ROOT_NODE_ID).await
            && root.is_root()
        {
            return Ok(root);
        }
        self.all_nodes()
            .await?
            .into_iter()
            .find(Node::is_root)
            .ok_or(StoreError::RootMissing)
    }

    pub async fn parent(&self, node: &Node) -> Result<Option<Node>, StoreError> {
        match node.parent {
            Some(parent) => Ok(Some(self.load_by_identity(parent).await?)),
            None => Ok(None),
        }
    }

    /// Children in their stored order.
    pub async fn children(&self, node: &Node) -> Result<Vec<Node>, StoreError> {
        try_join_all(
            node.children
                .iter()
                .map(|child| self.load_by_identity(*child)),
        )
        .await
    }

    /// Ancestors of `node`, root first, `node` itself excluded.
    pub async fn ancestors(&self, node: &Node) -> Result<Vec<Node>, StoreError> {
        let mut seen = HashSet::from([node.identity]);
        let mut chain = Vec::new();
        let mut next = node.parent;

        while let Some(identity) = next {
            ensure!(seen.insert(identity), CycleSnafu { id: &node.id });
            let ancestor = self.load_by_identity(identity).await?;
            next = ancestor.parent;
            chain.push(ancestor);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Creates an empty node under `parent`, named `base_name` or the first free variant of it.
    pub async fn create_child(
        &self,
        parent: &Node,
        base_name: Option<&str>,
    ) -> Result<Node, StoreError> {
        let base_name = base_name.unwrap_or(DEFAULT_NODE_NAME);
        ensure!(
            is_valid_node_id(base_name),
            InvalidNameSnafu { name: base_name }
        );

        let id = id_candidates(base_name)
            .find(|candidate| !self.node_dir(candidate).exists())
            .unwrap_or_else(|| base_name.to_string());

        let mut parent = self.load_by_identity(parent.identity).await?;
        let child = Node::new_child(&id, parent.identity);
        self.save(&child).await?;
        parent.children.push(child.identity);
        self.save(&parent).await?;

        info!("Created node '{}' under '{}'", child.id, parent.id);
        Ok(child)
    }

    /// Renames the node directory. Links use identities, so nothing else has to change.
    pub async fn rename(&self, node: &Node, new_id: &str) -> Result<Node, StoreError> {
        ensure!(is_valid_node_id(new_id), InvalidNameSnafu { name: new_id });
        let new_dir = self.node_dir(new_id);
        ensure!(!new_dir.exists(), NameInUseSnafu { name: new_id });

        let node = self.load_by_identity(node.identity).await?;
        let old_dir = self.node_dir(&node.id);
        fs::rename(&old_dir, &new_dir)
            .await
            .context(WorkspaceSnafu { path: &old_dir })?;
        info!("Renamed node '{}' to '{}'", node.id, new_id);

        self.cache.remember(node.identity, new_id);
        self.load(new_id).await
    }

    /// Deletes `node`, handing its children over to its parent.
    ///
    /// Without `force` only a node whose changes are all no-ops may go; otherwise the changed
    /// paths are reported and nothing happens.
    pub async fn delete(&self, node: &Node, force: bool) -> Result<DeleteOutcome, StoreError> {
        let node = self.load_by_identity(node.identity).await?;
        ensure!(
            !(node.is_root() && node.has_children()),
            HasChildrenCannotDeleteSnafu { id: &node.id }
        );

        if !force {
            let mut modified = Vec::new();
            for path in node.changes.keys() {
                let content = self.get_path_content(&node, path, true).await?;
                if content.base.as_deref() != Some(content.current.as_str()) {
                    modified.push(path.clone());
                }
            }
            if !modified.is_empty() {
                debug!("Node '{}' still modifies {:?}", node.id, modified);
                return Ok(DeleteOutcome::Modified { paths: modified });
            }
        }

        for child in &node.children {
            let mut child = self.load_by_identity(*child).await?;
            child.parent = node.parent;
            self.save(&child).await?;
        }

        if let Some(parent) = node.parent {
            let mut parent = self.load_by_identity(parent).await?;
            parent.splice_child(node.identity, &node.children);
            self.save(&parent).await?;
        }

        let dir = self.node_dir(&node.id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Node directory {} already gone", dir.best_effort_path_display());
            }
            Err(e) => return Err(e).context(WorkspaceSnafu { path: &dir }),
        }
        self.cache.forget(&node.identity);

        info!("Deleted node '{}'", node.id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn update_metadata(
        &self,
        node: &Node,
        update: impl FnOnce(&mut Metadata),
    ) -> Result<Node, StoreError> {
        let mut node = self.load_by_identity(node.identity).await?;
        update(&mut node.metadata);
        self.save(&node).await?;
        Ok(node)
    }

    pub async fn set_notes(&self, node: &Node, notes: &str) -> Result<Node, StoreError> {
        self.update_metadata(node, |metadata| metadata.notes = notes.to_string())
            .await
    }

    pub async fn set_draft(&self, node: &Node, draft: bool) -> Result<Node, StoreError> {
        self.update_metadata(node, |metadata| metadata.draft = draft)
            .await
    }

    pub async fn set_effective_date(
        &self,
        node: &Node,
        date: Option<NaiveDate>,
    ) -> Result<Node, StoreError> {
        self.update_metadata(node, |metadata| metadata.effective_date = date)
            .await
    }

    /// Sets an annotation, or removes it when `value` is `None`.
    pub async fn set_annotation(
        &self,
        node: &Node,
        key: &str,
        value: Option<&str>,
    ) -> Result<Node, StoreError> {
        self.update_metadata(node, |metadata| match value {
            Some(value) => {
                metadata
                    .annotations
                    .insert(key.to_string(), value.to_string());
            }
            None => {
                metadata.annotations.remove(key);
            }
        })
        .await
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("No node named '{}'", id))]
    NotFound { id: String },
    #[snafu(display("No node with identity {}", identity))]
    IdentityNotFound { identity: Identity },
    #[snafu(display("The workspace has no root node"))]
    RootMissing,
    #[snafu(display("The root node '{}' has no base snapshot reference", id))]
    MissingBaseCommit { id: String },
    #[snafu(display(
        "'{}' is not a valid name. Names may only contain letters, numbers, dashes and underscores",
        name
    ))]
    InvalidName { name: String },
    #[snafu(display("A node named '{}' already exists", name))]
    NameInUse { name: String },
    #[snafu(display("'{}' is not a valid file path", path))]
    InvalidPath { path: String },
    #[snafu(display("'{}' is not listed as a child of '{}'", child, parent))]
    ChildMissing { parent: String, child: String },
    #[snafu(display("'{}' already exists", path))]
    PathExists { path: String },
    #[snafu(display("'{}' does not exist", path))]
    PathMissing { path: String },
    #[snafu(display("Node '{}' cannot be modified directly", id))]
    Immutable { id: String },
    #[snafu(display(
        "The root node '{}' cannot be deleted while other nodes are applied after it",
        id
    ))]
    HasChildrenCannotDelete { id: String },
    #[snafu(display("The ancestor chain of '{}' contains a cycle", id))]
    Cycle { id: String },
    #[snafu(display("Failed to access the workspace at {}", path.best_effort_path_display()))]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to access the change blob {}", path.best_effort_path_display()))]
    Blob {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Content of '{}' is not valid UTF-8", path))]
    NotUtf8 {
        path: String,
        source: std::string::FromUtf8Error,
    },
    #[snafu(display("Invalid node record"))]
    Record { source: NodeRecordError },
    #[snafu(display("Failed to read the base snapshot"))]
    Content { source: ContentStoreError },
}

#[cfg(test)]
pub(crate) mod test_support {
    use tempfile::TempDir;

    use super::*;
    use crate::content_store::DirectoryStore;

    pub struct Fixture {
        pub dir: TempDir,
        pub store: PatchStore<DirectoryStore>,
    }

    /// A workspace over a base directory holding `files`.
    pub async fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let base = dir.path().join("base");
        std::fs::create_dir_all(&base).expect("Failed to create base directory");
        for (path, content) in files {
            let file = base.join(path);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create directories");
            }
            std::fs::write(file, content).expect("Failed to write base file");
        }

        let store = PatchStore::open(
            dir.path().join("workspace"),
            DirectoryStore::new(base),
            StoreSettings::default(),
        )
        .await
        .expect("Failed to open store");
        Fixture { dir, store }
    }
}
