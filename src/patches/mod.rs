//! Patch node store: one directory per node, content resolved along the ancestor chain.

mod diff_view;
mod identity_cache;
mod names;
mod node;
mod store;
mod store_content;
mod view;

pub use diff_view::{DiffHunk, DiffTag, FileDiff};
pub use node::{Change, Identity, Node};
pub use store::{DeleteOutcome, PatchStore, StoreError, StoreSettings};
pub use store_content::{PathEntry, WriteGuard};
pub use view::NodeView;

#[cfg(test)]
pub(crate) use store::test_support;
