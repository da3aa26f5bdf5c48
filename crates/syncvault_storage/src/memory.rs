//! In-memory container store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::ContainerStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Shared object map keyed by logical name.
pub type Objects = Arc<RwLock<BTreeMap<String, Vec<u8>>>>;

/// An in-memory object store holding containers under logical keys.
///
/// Stands in for a remote object store in tests. Several `MemoryStore`
/// values can share one object map via [`MemoryStore::with_objects`].
///
/// # Example
///
/// ```rust
/// use syncvault_storage::{ContainerStore, MemoryStore};
///
/// let store = MemoryStore::new("tenant/sync.c1z");
/// assert_eq!(store.location(), "memory://tenant/sync.c1z");
/// assert!(store.data().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    key: String,
    objects: Objects,
}

impl MemoryStore {
    /// Creates a store with its own empty object map.
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_objects(Arc::default(), key)
    }

    /// Creates a store over an existing shared object map.
    pub fn with_objects(objects: Objects, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            objects,
        }
    }

    /// Returns the shared object map.
    #[must_use]
    pub fn objects(&self) -> Objects {
        Arc::clone(&self.objects)
    }

    /// Returns a copy of the stored container, if any.
    #[must_use]
    pub fn data(&self) -> Option<Vec<u8>> {
        self.objects.read().get(&self.key).cloned()
    }
}

impl ContainerStore for MemoryStore {
    fn load_to(&self, dest: &Path) -> StorageResult<bool> {
        let objects = self.objects.read();
        let Some(bytes) = objects.get(&self.key) else {
            return Ok(false);
        };
        fs::write(dest, bytes)?;
        let actual = fs::metadata(dest)?.len();
        if actual != bytes.len() as u64 {
            return Err(StorageError::SizeMismatch {
                expected: bytes.len() as u64,
                actual,
            });
        }
        Ok(true)
    }

    fn save_from(&self, src: &Path) -> StorageResult<u64> {
        let bytes = fs::read(src)?;
        let len = bytes.len() as u64;
        self.objects.write().insert(self.key.clone(), bytes);
        tracing::debug!(key = %self.key, bytes = len, "stored container in memory");
        Ok(len)
    }

    fn location(&self) -> String {
        format!("memory://{}", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn shared_objects_are_visible_across_stores() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, b"abc").unwrap();

        let a = MemoryStore::new("a");
        let b = MemoryStore::with_objects(a.objects(), "b");
        a.save_from(&src).unwrap();
        b.save_from(&src).unwrap();

        assert_eq!(a.objects().read().len(), 2);
        assert_eq!(b.data().unwrap(), b"abc");
    }

    #[test]
    fn load_round_trip() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new("k");
        assert!(!store.load_to(&dir.path().join("none")).unwrap());

        let src = dir.path().join("src");
        fs::write(&src, vec![9u8; 1000]).unwrap();
        store.save_from(&src).unwrap();

        let dest = dir.path().join("dest");
        assert!(store.load_to(&dest).unwrap());
        assert_eq!(fs::read(dest).unwrap(), vec![9u8; 1000]);
    }
}
