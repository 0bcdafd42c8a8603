/// Listings order trees before blobs, hence the variant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum EntryKind {
    #[display("tree")]
    Tree,
    #[display("blob")]
    Blob,
}

/// A directory listing entry of the base snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub kind: EntryKind,
    pub reference: Option<String>,
    pub size: Option<u64>,
}

impl StoreEntry {
    pub fn blob(name: impl Into<String>, reference: Option<String>, size: Option<u64>) -> Self {
        StoreEntry {
            name: name.into(),
            kind: EntryKind::Blob,
            reference,
            size,
        }
    }

    pub fn tree(name: impl Into<String>) -> Self {
        StoreEntry {
            name: name.into(),
            kind: EntryKind::Tree,
            reference: None,
            size: None,
        }
    }
}
