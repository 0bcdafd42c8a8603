use std::cell::RefCell;

use hashlink::LruCache;

use crate::patches::node::Identity;

/// Advisory identity → id mapping. Entries may be stale after a rename or delete, so every hit
/// has to be verified against the loaded record.
#[derive(Debug)]
pub struct IdentityCache {
    entries: RefCell<LruCache<Identity, String>>,
}

impl IdentityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RefCell::new(LruCache::new(capacity.max(1))),
        }
    }

    pub fn get(&self, identity: &Identity) -> Option<String> {
        self.entries.borrow_mut().get(identity).cloned()
    }

    pub fn remember(&self, identity: Identity, id: impl Into<String>) {
        self.entries.borrow_mut().insert(identity, id.into());
    }

    pub fn forget(&self, identity: &Identity) {
        self.entries.borrow_mut().remove(identity);
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}
