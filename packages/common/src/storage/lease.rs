use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

/// Exclusive, in-process leases on blobs, keyed by `container/key`.
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    held: Arc<DashMap<String, Uuid>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease on `container/key`, or `None` if someone else holds it.
    pub fn try_acquire(&self, container: &str, key: &str) -> Option<BlobLease> {
        let path = format!("{container}/{key}");
        match self.held.entry(path.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let id = Uuid::new_v4();
                slot.insert(id);
                Some(BlobLease {
                    held: Arc::clone(&self.held),
                    path,
                    id,
                })
            }
        }
    }

    pub fn is_leased(&self, container: &str, key: &str) -> bool {
        self.held.contains_key(&format!("{container}/{key}"))
    }
}

/// A held lease. Released when dropped, on every exit path.
#[derive(Debug)]
pub struct BlobLease {
    held: Arc<DashMap<String, Uuid>>,
    path: String,
    id: Uuid,
}

impl BlobLease {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for BlobLease {
    fn drop(&mut self) {
        self.held.remove_if(&self.path, |_, holder| *holder == self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_is_exclusive_until_dropped() {
        let leases = LeaseRegistry::new();
        let lease = leases.try_acquire("private", "a/b.zip").unwrap();
        assert!(leases.is_leased("private", "a/b.zip"));
        assert!(leases.try_acquire("private", "a/b.zip").is_none());
        assert!(leases.try_acquire("public", "a/b.zip").is_some());

        drop(lease);
        assert!(!leases.is_leased("private", "a/b.zip"));
        assert!(leases.try_acquire("private", "a/b.zip").is_some());
    }
}
