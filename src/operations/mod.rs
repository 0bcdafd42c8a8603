//! Text operation algebra.
//!
//! An operation describes how one file's text changes, an [`OpSet`] groups the operations of
//! every file a node touches. Operations can be applied, inverted, composed and rebased over
//! one another, which is what lets the tree be restructured without losing edits.

mod diff;
mod op_set;
mod operation;
mod rebase;

pub use diff::{DiffGranularity, diff_to_operation};
pub use op_set::OpSet;
pub use operation::OperationError;
