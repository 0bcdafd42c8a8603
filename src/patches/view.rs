use crate::patches::node::{Identity, Node, NodeKind};

/// Display data derived from a `Node`. Computed on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    pub id: String,
    pub identity: Identity,
    pub kind: NodeKind,
    pub title: String,
    pub address: String,
    pub can_modify: bool,
    pub created_formatted: String,
    pub child_count: usize,
    pub draft: bool,
}

impl From<&Node> for NodeView {
    fn from(node: &Node) -> Self {
        NodeView {
            id: node.id.clone(),
            identity: node.identity,
            kind: node.kind,
            title: node.id.clone(),
            address: format!("/patch/{}", node.id),
            can_modify: !node.is_root() && !node.has_children(),
            created_formatted: node
                .metadata
                .created
                .format("%Y-%m-%d %H:%M UTC")
                .to_string(),
            child_count: node.children.len(),
            draft: node.metadata.draft,
        }
    }
}
