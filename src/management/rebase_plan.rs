use std::collections::HashSet;

use snafu::ResultExt;
use tracing::debug;

use crate::content_store::ContentStore;
use crate::management::journal::PlannedWrite;
use crate::management::tree_mutation::{ManagementError, StoreSnafu, TreeMutation};
use crate::operations::OpSet;
use crate::patches::{Identity, Node, PatchStore, StoreError, WriteGuard};

#[derive(Debug, Clone)]
pub struct PlanStep {
    pub identity: Identity,
    pub id: String,
    pub operations: OpSet,
}

/// Rebased change-sets, ordered so every node comes after its ancestors.
#[derive(Debug, Clone, Default)]
pub struct RebasePlan {
    steps: Vec<PlanStep>,
}

impl RebasePlan {
    pub fn push(&mut self, node: &Node, operations: OpSet) {
        self.steps.push(PlanStep {
            identity: node.identity,
            id: node.id.clone(),
            operations,
        });
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn planned_writes(&self) -> Vec<PlannedWrite> {
        self.steps
            .iter()
            .map(|step| PlannedWrite {
                identity: step.identity.to_string(),
                id: step.id.clone(),
                operations: step.operations.clone(),
            })
            .collect()
    }

    /// Rebases the whole subtree under each of `heads` against `against`.
    ///
    /// Each node's change-set is rebased onto what arrives from above, and `against` is rebased
    /// past the node's own change before it moves on to the children. The first conflict aborts
    /// with the node that could not be rebased.
    pub async fn for_subtrees<S: ContentStore>(
        store: &PatchStore<S>,
        heads: Vec<Node>,
        against: &OpSet,
    ) -> Result<Self, ManagementError> {
        let mut plan = RebasePlan::default();
        let mut seen = HashSet::new();
        let mut pending: Vec<(Node, OpSet)> = heads
            .into_iter()
            .rev()
            .map(|head| (head, against.clone()))
            .collect();

        while let Some((node, against)) = pending.pop() {
            if !seen.insert(node.identity) {
                return Err(StoreError::Cycle { id: node.id }).context(StoreSnafu);
            }

            let own = store.get_operations(&node).await.context(StoreSnafu)?;
            let rebased = own.rebase_onto(&against).map_err(|e| {
                debug!("Cannot rebase '{}': {}", node.id, e);
                ManagementError::MergeConflict {
                    id: node.id.clone(),
                }
            })?;
            let carried = against.rebase_onto(&own).map_err(|e| {
                debug!("Cannot carry changes past '{}': {}", node.id, e);
                ManagementError::MergeConflict {
                    id: node.id.clone(),
                }
            })?;

            let children = store.children(&node).await.context(StoreSnafu)?;
            pending.extend(
                children
                    .into_iter()
                    .rev()
                    .map(|child| (child, carried.clone())),
            );
            plan.push(&node, rebased);
        }

        Ok(plan)
    }

    /// Rewrites every planned node on top of its parent's current content, in plan order.
    pub async fn persist<S: ContentStore>(
        &self,
        mutation: &TreeMutation<'_, S>,
    ) -> Result<(), ManagementError> {
        let store = mutation.store;

        for step in &self.steps {
            let node = store
                .load_by_identity(step.identity)
                .await
                .map_err(|e| mutation.persist_failure(&step.id, e))?;

            for (path, operation) in step.operations.iter() {
                let base = store
                    .get_path_content(&node, path, true)
                    .await
                    .map_err(|e| mutation.persist_failure(&step.id, e))?
                    .base
                    .unwrap_or_default();
                let content = operation
                    .apply(&base)
                    .map_err(|e| mutation.mismatch(&step.id, path, e))?;

                store
                    .write_path_content(&node, path, &content, WriteGuard::Bypass)
                    .await
                    .map_err(|e| mutation.persist_failure(&step.id, e))?;
                debug!("Persisted '{}' in '{}'", path, step.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patches::test_support::fixture;

    async fn write(store: &PatchStore<impl ContentStore>, node: &Node, path: &str, text: &str) {
        store
            .write_path_content(node, path, text, WriteGuard::Checked)
            .await
            .unwrap();
    }

    #[compio::test]
    async fn plan_lists_ancestors_first() {
        let f = fixture(&[("a.txt", "one two three")]).await;
        let root = f.store.root().await.unwrap();
        let a = f.store.create_child(&root, Some("A")).await.unwrap();
        let b = f.store.create_child(&root, Some("B")).await.unwrap();
        let a1 = f.store.create_child(&a, Some("A1")).await.unwrap();
        write(&f.store, &a1, "a.txt", "one two three four").await;
        f.store.create_child(&a1, Some("A2")).await.unwrap();

        let against = f.store.get_operations(&b).await.unwrap();
        let plan = RebasePlan::for_subtrees(&f.store, vec![a, b], &against)
            .await
            .unwrap();
        let ids: Vec<_> = plan.steps().iter().map(|step| step.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "A1", "A2", "B"]);
        assert_eq!(plan.planned_writes().len(), 4);
    }

    #[compio::test]
    async fn descendants_are_rebased_past_their_ancestors() {
        let f = fixture(&[("a.txt", "one two three")]).await;
        let root = f.store.root().await.unwrap();
        let sibling = f.store.create_child(&root, Some("Sibling")).await.unwrap();
        write(&f.store, &sibling, "a.txt", "one two three four").await;
        let child = f.store.create_child(&sibling, Some("Child")).await.unwrap();
        write(&f.store, &child, "a.txt", "ONE two three four").await;

        let against: OpSet = [(
            "a.txt".to_string(),
            crate::operations::diff_to_operation(
                "one two three",
                "one TWO three",
                crate::operations::DiffGranularity::Words,
            ),
        )]
        .into_iter()
        .collect();
        let plan = RebasePlan::for_subtrees(&f.store, vec![sibling], &against)
            .await
            .unwrap();

        let sibling_op = plan.steps()[0].operations.get("a.txt").unwrap();
        let sibling_text = sibling_op.apply("one TWO three").unwrap();
        assert_eq!(sibling_text, "one TWO three four");
        let child_op = plan.steps()[1].operations.get("a.txt").unwrap();
        assert_eq!(child_op.apply(&sibling_text).unwrap(), "ONE TWO three four");
    }

    #[compio::test]
    async fn conflicts_name_the_node() {
        let f = fixture(&[]).await;
        let root = f.store.root().await.unwrap();
        let sibling = f.store.create_child(&root, Some("Sibling")).await.unwrap();
        write(&f.store, &sibling, "b.txt", "Y").await;

        let against: OpSet = [(
            "b.txt".to_string(),
            crate::operations::diff_to_operation(
                "",
                "X",
                crate::operations::DiffGranularity::Words,
            ),
        )]
        .into_iter()
        .collect();
        let result = RebasePlan::for_subtrees(&f.store, vec![sibling], &against).await;
        assert!(matches!(
            result,
            Err(ManagementError::MergeConflict { id }) if id == "Sibling"
        ));
    }
}
