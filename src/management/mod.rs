//! Restructuring of the patch tree: merge-up and move, both built on rebasing whole change-sets.

mod journal;
mod merge_up;
mod move_to;
mod rebase_plan;
mod tree_mutation;

pub use journal::{Journal, JournalError};
pub use tree_mutation::{ManagementError, TreeMutation};
