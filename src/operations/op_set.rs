use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::operations::operation::{Operation, OperationError};
use crate::operations::rebase::rebase;

/// The change-set of one node: one operation per changed path.
///
/// Paths without an entry are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct OpSet {
    operations: BTreeMap<String, Operation>,
}

impl OpSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, operation: Operation) {
        self.operations.insert(path.into(), operation);
    }

    pub fn get(&self, path: &str) -> Option<&Operation> {
        self.operations.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Operation)> {
        self.operations.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.operations.keys()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.operations.values().all(Operation::is_identity)
    }

    pub fn invert(&self) -> OpSet {
        OpSet {
            operations: self
                .operations
                .iter()
                .map(|(path, op)| (path.clone(), op.invert()))
                .collect(),
        }
    }

    /// Transforms `self` so it applies after `applied`, path by path.
    pub fn rebase_onto(&self, applied: &OpSet) -> Result<OpSet, OpSetError> {
        let mut result = OpSet::new();
        for (path, op) in &self.operations {
            let rebased = match applied.get(path) {
                Some(other) => rebase(other, op).context(OpSetSnafu { path: path.clone() })?,
                None => op.clone(),
            };
            result.insert(path.clone(), rebased);
        }
        Ok(result)
    }

    /// Swaps two adjacent change-sets: `parent` followed by `child` becomes `child` followed by
    /// `parent`. Returns the new `(parent, child)` pair, each expressed in its new position.
    ///
    /// The swapped pair must end in the same content as the original one. A child that undoes
    /// its parent cannot be pulled in front of it, so that case is a conflict.
    pub fn flip(parent: &OpSet, child: &OpSet) -> Result<(OpSet, OpSet), OpSetError> {
        let child_first = child.rebase_onto(&parent.invert())?;
        let parent_second = parent.rebase_onto(&child_first)?;

        for (path, parent_op) in &parent.operations {
            let (Some(child_op), Some(first), Some(second)) = (
                child.get(path),
                child_first.get(path),
                parent_second.get(path),
            ) else {
                continue;
            };
            let before = parent_op
                .compose(child_op)
                .context(OpSetSnafu { path: path.clone() })?;
            let after = first
                .compose(second)
                .context(OpSetSnafu { path: path.clone() })?;
            if !before.same_effect(&after) {
                debug!("Flipping changes to '{}' would change the result", path);
                let position = parent_op.hunks().first().map_or(0, |hunk| hunk.start);
                return Err(OperationError::Conflict { position })
                    .context(OpSetSnafu { path: path.clone() });
            }
        }

        Ok((parent_second, child_first))
    }
}

impl FromIterator<(String, Operation)> for OpSet {
    fn from_iter<I: IntoIterator<Item = (String, Operation)>>(iter: I) -> Self {
        OpSet {
            operations: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("Cannot rebase changes to '{}'", path))]
pub struct OpSetError {
    pub path: String,
    source: OperationError,
}

impl OpSetError {
    pub fn is_conflict(&self) -> bool {
        matches!(self.source, OperationError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{DiffGranularity, diff_to_operation};

    fn set(entries: &[(&str, &str, &str)]) -> OpSet {
        entries
            .iter()
            .map(|(path, base, new)| {
                (
                    path.to_string(),
                    diff_to_operation(base, new, DiffGranularity::Words),
                )
            })
            .collect()
    }

    #[test]
    fn paths_missing_on_one_side_pass_through() {
        let a = set(&[("a.txt", "one", "one two")]);
        let b = set(&[("b.txt", "", "new")]);
        let rebased = b.rebase_onto(&a).unwrap();
        assert_eq!(rebased, b);
    }

    #[test]
    fn conflict_names_the_path() {
        let a = set(&[("b.txt", "", "X")]);
        let b = set(&[("b.txt", "", "Y")]);
        let err = b.rebase_onto(&a).unwrap_err();
        assert_eq!(err.path, "b.txt");
        assert!(err.is_conflict());
    }

    #[test]
    fn flip_preserves_final_content() {
        let base = "alpha beta gamma";
        let middle = "alpha BETA gamma";
        let top = "ALPHA BETA gamma";
        let parent = set(&[("f", base, middle)]);
        let child = set(&[("f", middle, top)]);

        let (parent_new, child_new) = OpSet::flip(&parent, &child).unwrap();
        let after_child = child_new.get("f").unwrap().apply(base).unwrap();
        assert_eq!(after_child, "ALPHA beta gamma");
        let after_both = parent_new.get("f").unwrap().apply(&after_child).unwrap();
        assert_eq!(after_both, top);
    }

    #[test]
    fn flip_fails_when_child_builds_on_parent() {
        let parent = set(&[("f", "a", "a b")]);
        let child = set(&[("f", "a b", "a c")]);
        assert!(OpSet::flip(&parent, &child).unwrap_err().is_conflict());
    }

    #[test]
    fn flip_refuses_a_child_undoing_its_parent() {
        let parent = set(&[("f", "hello world", "hello there world")]);
        let child = set(&[("f", "hello there world", "hello world")]);
        let err = OpSet::flip(&parent, &child).unwrap_err();
        assert_eq!(err.path, "f");
        assert!(err.is_conflict());
    }

    #[test]
    fn invert_round_trips_every_path() {
        let ops = set(&[("x", "1 2 3", "1 3"), ("y", "", "fresh")]);
        let inverted = ops.invert();
        assert_eq!(
            inverted.get("x").unwrap().apply("1 3").unwrap(),
            "1 2 3"
        );
        assert_eq!(inverted.get("y").unwrap().apply("fresh").unwrap(), "");
        assert!(!ops.is_identity());
        assert_eq!(ops.len(), 2);
    }
}
