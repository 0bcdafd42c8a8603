use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::content_store::ContentStore;
use crate::management::rebase_plan::RebasePlan;
use crate::management::tree_mutation::{
    ManagementError, MergeIntoRootSnafu, Phase, RootMergeSnafu, StoreSnafu, TreeMutation,
};
use crate::patches::{Node, WriteGuard};

impl<S: ContentStore> TreeMutation<'_, S> {
    /// Folds `node` into its parent and returns the updated parent.
    ///
    /// Siblings of `node` and everything below them are rebased so they keep their own changes on
    /// top of the merged content. `node`'s children move up to the parent unchanged.
    pub async fn merge_up(&mut self, node: &Node) -> Result<Node, ManagementError> {
        self.begin("merge-up", &node.id);

        let node = self
            .store
            .load_by_identity(node.identity)
            .await
            .context(StoreSnafu)?;
        ensure!(!node.is_root(), RootMergeSnafu);
        let parent = self
            .store
            .parent(&node)
            .await
            .context(StoreSnafu)?
            .ok_or(ManagementError::RootMerge)?;
        ensure!(!parent.is_root(), MergeIntoRootSnafu);

        self.advance(Phase::ComputingRebase);
        let operations = self.store.get_operations(&node).await.context(StoreSnafu)?;
        let siblings: Vec<Node> = self
            .store
            .children(&parent)
            .await
            .context(StoreSnafu)?
            .into_iter()
            .filter(|sibling| sibling.identity != node.identity)
            .collect();
        debug!(
            "Rebasing {} sibling subtree(s) of '{}'",
            siblings.len(),
            node.id
        );
        let plan = RebasePlan::for_subtrees(self.store, siblings, &operations).await?;

        // Final content has to be read before the node and its blobs are gone.
        let mut merged = Vec::new();
        for path in node.changes.keys() {
            let content = self
                .store
                .get_path_content(&node, path, false)
                .await
                .context(StoreSnafu)?;
            merged.push((path.clone(), content.current));
        }

        self.start_writing(&plan).await?;
        for (path, content) in &merged {
            self.store
                .write_path_content(&parent, path, content, WriteGuard::Bypass)
                .await
                .map_err(|e| self.persist_failure(&parent.id, e))?;
        }
        let outcome = self
            .store
            .delete(&node, true)
            .await
            .map_err(|e| self.persist_failure(&node.id, e))?;
        debug!("Removed '{}': {:?}", node.id, outcome);

        self.advance(Phase::PersistingContent);
        plan.persist(self).await?;
        self.finish().await?;

        self.store
            .load_by_identity(parent.identity)
            .await
            .context(StoreSnafu)
    }
}
