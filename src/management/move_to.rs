use std::collections::HashMap;
use std::collections::hash_map::Entry;

use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::content_store::ContentStore;
use crate::management::rebase_plan::RebasePlan;
use crate::management::tree_mutation::{
    BranchingPathSnafu, ManagementError, NothingToDoSnafu, Phase, RootMoveSnafu, SelfMoveSnafu,
    StoreSnafu, TreeMutation,
};
use crate::operations::OpSet;
use crate::patches::{Identity, Node, PatchStore, StoreError};

/// Nodes re-linked by a move, each loaded once so no record is written from two stale copies.
/// Links are rewritten in memory only; a link that is not where the tree says fails the move
/// before anything is written.
struct Relink<'a, S: ContentStore> {
    store: &'a PatchStore<S>,
    nodes: HashMap<Identity, Node>,
}

impl<'a, S: ContentStore> Relink<'a, S> {
    fn new(store: &'a PatchStore<S>) -> Self {
        Self {
            store,
            nodes: HashMap::new(),
        }
    }

    async fn node(&mut self, identity: Identity) -> Result<&mut Node, StoreError> {
        match self.nodes.entry(identity) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let node = self.store.load_by_identity(identity).await?;
                Ok(entry.insert(node))
            }
        }
    }

    /// `node` moves directly below `new_base`, in front of `first ..= last`.
    async fn toward_root(
        &mut self,
        node: &Node,
        new_base: &Node,
        first: Identity,
        last: Identity,
    ) -> Result<(), StoreError> {
        let below = node.children.first().copied();

        let first_id = self.node(first).await?.id.clone();
        let base = self.node(new_base.identity).await?;
        if !base.replace_child(first, node.identity) {
            return Err(StoreError::ChildMissing {
                parent: base.id.clone(),
                child: first_id,
            });
        }
        let moved = self.node(node.identity).await?;
        moved.parent = Some(new_base.identity);
        moved.children = vec![first];
        self.node(first).await?.parent = Some(node.identity);
        self.node(last).await?.children = below.into_iter().collect();
        if let Some(below) = below {
            self.node(below).await?.parent = Some(last);
        }
        Ok(())
    }

    /// `first`, the node after `node`, takes its place under `parent`; `node` moves below
    /// `new_base`.
    async fn toward_leaf(
        &mut self,
        node: &Node,
        new_base: &Node,
        parent: Identity,
        first: Identity,
    ) -> Result<(), StoreError> {
        let below = new_base.children.first().copied();

        let parent = self.node(parent).await?;
        if !parent.replace_child(node.identity, first) {
            return Err(StoreError::ChildMissing {
                parent: parent.id.clone(),
                child: node.id.clone(),
            });
        }
        let parent = parent.identity;
        self.node(first).await?.parent = Some(parent);
        let moved = self.node(node.identity).await?;
        moved.parent = Some(new_base.identity);
        moved.children = below.into_iter().collect();
        self.node(new_base.identity).await?.children = vec![node.identity];
        if let Some(below) = below {
            self.node(below).await?.parent = Some(node.identity);
        }
        Ok(())
    }

    fn into_nodes(self) -> impl Iterator<Item = Node> {
        self.nodes.into_values()
    }
}

impl<S: ContentStore> TreeMutation<'_, S> {
    /// Makes `node` a child of `new_base`, which must be an ancestor or a descendant of it.
    ///
    /// The nodes between the two trade places with `node` one flip at a time; every flip is
    /// computed before anything is written. Returns the moved node.
    pub async fn move_to(&mut self, node: &Node, new_base: &Node) -> Result<Node, ManagementError> {
        self.begin("move", &node.id);
        ensure!(node.identity != new_base.identity, SelfMoveSnafu);

        let node = self
            .store
            .load_by_identity(node.identity)
            .await
            .context(StoreSnafu)?;
        let new_base = self
            .store
            .load_by_identity(new_base.identity)
            .await
            .context(StoreSnafu)?;
        ensure!(!node.is_root(), RootMoveSnafu);

        let node_ancestors = self.store.ancestors(&node).await.context(StoreSnafu)?;
        if let Some(index) = node_ancestors
            .iter()
            .position(|ancestor| ancestor.identity == new_base.identity)
        {
            let route = node_ancestors[index + 1..].to_vec();
            ensure!(
                !route.is_empty(),
                NothingToDoSnafu {
                    id: &node.id,
                    new_base: &new_base.id
                }
            );
            return self.move_toward_root(node, new_base, route).await;
        }

        let base_ancestors = self.store.ancestors(&new_base).await.context(StoreSnafu)?;
        if let Some(index) = base_ancestors
            .iter()
            .position(|ancestor| ancestor.identity == node.identity)
        {
            let route = base_ancestors[index + 1..].to_vec();
            return self.move_toward_leaf(node, new_base, route).await;
        }

        Err(ManagementError::InvalidMove {
            id: node.id,
            new_base: new_base.id,
        })
    }

    /// `new_base C1 .. CN node D1` becomes `new_base node C1 .. CN D1`.
    async fn move_toward_root(
        &mut self,
        node: Node,
        new_base: Node,
        route: Vec<Node>,
    ) -> Result<Node, ManagementError> {
        ensure!(node.children.len() <= 1, BranchingPathSnafu { id: &node.id });
        for fixed in &route {
            ensure!(fixed.children.len() == 1, BranchingPathSnafu { id: &fixed.id });
        }

        self.advance(Phase::ComputingRebase);
        let mut moving = self.store.get_operations(&node).await.context(StoreSnafu)?;
        let mut flipped = Vec::with_capacity(route.len());
        for fixed in route.iter().rev() {
            let fixed_ops = self.store.get_operations(fixed).await.context(StoreSnafu)?;
            let (fixed_new, moving_new) = flip(&fixed_ops, &moving, fixed)?;
            flipped.push((fixed, fixed_new));
            moving = moving_new;
        }

        let mut plan = RebasePlan::default();
        plan.push(&node, moving);
        for (fixed, operations) in flipped.into_iter().rev() {
            plan.push(fixed, operations);
        }

        let (first, last) = match (route.first(), route.last()) {
            (Some(first), Some(last)) => (first.identity, last.identity),
            _ => {
                return NothingToDoSnafu {
                    id: &node.id,
                    new_base: &new_base.id,
                }
                .fail();
            }
        };
        let mut relink = Relink::new(self.store);
        relink
            .toward_root(&node, &new_base, first, last)
            .await
            .context(StoreSnafu)?;
        self.start_writing(&plan).await?;

        self.finish_move(relink, &plan, node.identity).await
    }

    /// `P node C1 .. CK new_base D1` becomes `P C1 .. CK new_base node D1`.
    async fn move_toward_leaf(
        &mut self,
        node: Node,
        new_base: Node,
        route: Vec<Node>,
    ) -> Result<Node, ManagementError> {
        ensure!(node.children.len() == 1, BranchingPathSnafu { id: &node.id });
        for fixed in &route {
            ensure!(fixed.children.len() == 1, BranchingPathSnafu { id: &fixed.id });
        }
        ensure!(
            new_base.children.len() <= 1,
            BranchingPathSnafu { id: &new_base.id }
        );
        let parent = node.parent.ok_or(ManagementError::RootMove)?;

        self.advance(Phase::ComputingRebase);
        let mut moving = self.store.get_operations(&node).await.context(StoreSnafu)?;
        let mut plan = RebasePlan::default();
        for fixed in route.iter().chain([&new_base]) {
            let fixed_ops = self.store.get_operations(fixed).await.context(StoreSnafu)?;
            let (moving_new, fixed_new) = flip(&moving, &fixed_ops, fixed)?;
            plan.push(fixed, fixed_new);
            moving = moving_new;
        }
        plan.push(&node, moving);

        let first = route.first().unwrap_or(&new_base).identity;
        let mut relink = Relink::new(self.store);
        relink
            .toward_leaf(&node, &new_base, parent, first)
            .await
            .context(StoreSnafu)?;
        self.start_writing(&plan).await?;

        self.finish_move(relink, &plan, node.identity).await
    }

    async fn finish_move(
        &mut self,
        relink: Relink<'_, S>,
        plan: &RebasePlan,
        moved: Identity,
    ) -> Result<Node, ManagementError> {
        for node in relink.into_nodes() {
            self.store
                .save(&node)
                .await
                .map_err(|e| self.persist_failure(&node.id, e))?;
            debug!("Re-linked '{}'", node.id);
        }

        self.advance(Phase::PersistingContent);
        plan.persist(self).await?;
        self.finish().await?;

        self.store.load_by_identity(moved).await.context(StoreSnafu)
    }
}

/// Flips adjacent `parent` and `child` change-sets; `fixed` is the node named on conflict.
fn flip(parent: &OpSet, child: &OpSet, fixed: &Node) -> Result<(OpSet, OpSet), ManagementError> {
    OpSet::flip(parent, child).map_err(|e| {
        debug!("Flip with '{}' failed: {}", fixed.id, e);
        ManagementError::MoveConflict {
            id: fixed.id.clone(),
        }
    })
}
