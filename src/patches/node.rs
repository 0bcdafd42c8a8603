use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use compio::fs;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::debug;
use uuid::Uuid;

use crate::ext::{AsyncTryFrom, BestEffortPathExt};

pub const INDEX_FILE_NAME: &str = "index.json";

/// Stable key of a node. Structural links only ever use identities, so renaming a node never
/// breaks a reference.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct Identity(Uuid);

impl Identity {
    pub fn generate() -> Self {
        Identity(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[display("root")]
    Root,
    #[display("edit")]
    Edit,
}

/// What a node did to one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Change {
    /// Full content is stored in the blob `storage` inside the node directory.
    Write { storage: String },
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    pub fn now() -> Self {
        Metadata {
            created: Utc::now(),
            notes: String::new(),
            draft: false,
            effective_date: None,
            annotations: BTreeMap::new(),
        }
    }
}

/// The persistent record of a patch. Derived display data lives in `NodeView`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Directory name; never serialized.
    #[serde(skip)]
    pub id: String,
    pub identity: Identity,
    pub kind: NodeKind,
    /// Snapshot reference of the base content, only set on the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    #[serde(default)]
    pub parent: Option<Identity>,
    #[serde(default)]
    pub children: Vec<Identity>,
    #[serde(default)]
    pub changes: BTreeMap<String, Change>,
    #[serde(flatten)]
    pub metadata: Metadata,
}

impl Node {
    pub fn new_root(id: impl Into<String>, base_commit: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            identity: Identity::generate(),
            kind: NodeKind::Root,
            base_commit: Some(base_commit.into()),
            parent: None,
            children: Vec::new(),
            changes: BTreeMap::new(),
            metadata: Metadata::now(),
        }
    }

    pub fn new_child(id: impl Into<String>, parent: Identity) -> Self {
        Node {
            id: id.into(),
            identity: Identity::generate(),
            kind: NodeKind::Edit,
            base_commit: None,
            parent: Some(parent),
            children: Vec::new(),
            changes: BTreeMap::new(),
            metadata: Metadata::now(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::Root
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Replaces `old` with `new` in the children list, keeping its position.
    pub fn replace_child(&mut self, old: Identity, new: Identity) -> bool {
        match self.children.iter().position(|child| *child == old) {
            Some(index) => {
                self.children[index] = new;
                true
            }
            None => false,
        }
    }

    /// Replaces `old` with `replacements`, keeping their position.
    pub fn splice_child(&mut self, old: Identity, replacements: &[Identity]) {
        if let Some(index) = self.children.iter().position(|child| *child == old) {
            self.children
                .splice(index..=index, replacements.iter().copied());
        }
    }

    pub fn to_json(&self) -> Result<String, NodeRecordError> {
        serde_json::to_string_pretty(self).context(EncodeSnafu {
            id: self.id.clone(),
        })
    }

    /// Parses a record. Bytes that are not valid UTF-8 are refused as malformed.
    pub fn from_json(id: &str, contents: impl AsRef<[u8]>) -> Result<Self, NodeRecordError> {
        let mut node: Node = serde_json::from_slice(contents.as_ref())
            .context(DecodeSnafu { id: id.to_string() })?;
        node.id = id.to_string();
        Ok(node)
    }

    pub async fn write_to(&self, dir: &Path) -> Result<(), NodeRecordError> {
        let json = self.to_json()?;
        fs::create_dir_all(dir)
            .await
            .context(WriteSnafu { path: dir })?;
        let path = dir.join(INDEX_FILE_NAME);
        fs::write(&path, json.into_bytes())
            .await
            .0
            .context(WriteSnafu { path: &path })?;
        debug!("Saved node record {}", path.best_effort_path_display());
        Ok(())
    }
}

/// Loads a node from its directory; the directory name becomes the id.
impl AsyncTryFrom<&Path> for Node {
    type Error = NodeRecordError;

    async fn async_try_from(dir: &Path) -> Result<Self, Self::Error> {
        let id = dir
            .file_name()
            .and_then(|name| name.to_str())
            .context(NoIdSnafu { path: dir })?;
        let path = dir.join(INDEX_FILE_NAME);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(NodeRecordError::Missing { id: id.to_string() });
            }
            Err(e) => return Err(e).context(ReadSnafu { path: &path }),
        };
        Node::from_json(id, bytes)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum NodeRecordError {
    #[snafu(display("No node named '{}'", id))]
    Missing { id: String },
    #[snafu(display("Node directory {} has no usable name", path.best_effort_path_display()))]
    NoId { path: PathBuf },
    #[snafu(display("Failed to read node record {}", path.best_effort_path_display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write node record {}", path.best_effort_path_display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Node record of '{}' is malformed", id))]
    Decode {
        id: String,
        source: serde_json::Error,
    },
    #[snafu(display("Failed to serialize node '{}'", id))]
    Encode {
        id: String,
        source: serde_json::Error,
    },
}
