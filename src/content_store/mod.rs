//! The external snapshot the root node stands for.

mod content_store;
mod directory_store;
mod entry;
mod git_store;

pub use content_store::{BaseContent, ContentStore, ContentStoreError};
pub use directory_store::DirectoryStore;
pub use entry::{EntryKind, StoreEntry};
pub use git_store::GitStore;
