//! Test fixtures and sync file helpers.
//!
//! Provides convenience functions for setting up sync files and sample
//! records for common test scenarios.

use std::path::{Path, PathBuf};
use syncvault_core::{
    Config, Entitlement, Grant, Record, Resource, ResourceId, ResourceTrait, ResourceType,
    SyncFile, SyncType,
};
use syncvault_storage::{MemoryStore, Objects};
use tempfile::TempDir;

enum Backing {
    Memory { objects: Objects, key: String },
    File { _temp_dir: TempDir, path: PathBuf },
}

/// A sync file with automatic cleanup.
///
/// Memory-backed vaults keep their container in a shared [`MemoryStore`]
/// map; file-backed vaults keep it in a temporary directory. Either kind
/// can be closed and reopened with [`TestVault::reopen`].
pub struct TestVault {
    /// The sync file.
    pub file: SyncFile,
    config: Config,
    backing: Backing,
}

impl TestVault {
    /// Creates a vault backed by an in-memory container store.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates a memory-backed vault with `config`.
    pub fn memory_with_config(config: Config) -> Self {
        let store = MemoryStore::new("testkit/vault.c1z");
        let objects = store.objects();
        let file = SyncFile::open_store(store, config.clone()).expect("Failed to open sync file");
        Self {
            file,
            config,
            backing: Backing::Memory {
                objects,
                key: "testkit/vault.c1z".to_string(),
            },
        }
    }

    /// Creates a vault backed by a container file in a temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a file-backed vault with `config`.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("vault.c1z");
        let file = SyncFile::open(&path, config.clone()).expect("Failed to open sync file");
        Self {
            file,
            config,
            backing: Backing::File {
                _temp_dir: temp_dir,
                path,
            },
        }
    }

    /// Returns the container path of a file-backed vault.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File { path, .. } => Some(path),
            Backing::Memory { .. } => None,
        }
    }

    /// Returns the raw container bytes of a memory-backed vault, if saved.
    pub fn container_bytes(&self) -> Option<Vec<u8>> {
        match &self.backing {
            Backing::Memory { objects, key } => objects.read().get(key).cloned(),
            Backing::File { path, .. } => std::fs::read(path).ok(),
        }
    }

    /// Closes the sync file and opens the saved container again.
    pub fn reopen(self) -> Self {
        self.reopen_with_config(None)
    }

    /// Closes the sync file and opens it again with a different config.
    pub fn reopen_with(self, config: Config) -> Self {
        self.reopen_with_config(Some(config))
    }

    fn reopen_with_config(self, config: Option<Config>) -> Self {
        let Self {
            file,
            config: old,
            backing,
        } = self;
        file.close().expect("Failed to close sync file");
        drop(file);

        let config = config.unwrap_or(old);
        let file = match &backing {
            Backing::Memory { objects, key } => SyncFile::open_store(
                MemoryStore::with_objects(objects.clone(), key.clone()),
                config.clone(),
            ),
            Backing::File { path, .. } => SyncFile::open(path, config.clone()),
        }
        .expect("Failed to reopen sync file");

        Self {
            file,
            config,
            backing,
        }
    }

    /// Runs a full sync writing `records` and returns its id.
    pub fn finished_sync<R: Record>(&self, records: &[R]) -> String {
        self.finished_sync_of_type(SyncType::Full, None, records)
    }

    /// Runs a sync of `sync_type` writing `records` and returns its id.
    pub fn finished_sync_of_type<R: Record>(
        &self,
        sync_type: SyncType,
        parent: Option<&str>,
        records: &[R],
    ) -> String {
        let id = self
            .file
            .start_new_sync(sync_type, parent)
            .expect("Failed to start sync");
        self.file.put(records).expect("Failed to put records");
        self.file.end_sync().expect("Failed to end sync");
        id
    }
}

impl std::ops::Deref for TestVault {
    type Target = SyncFile;

    fn deref(&self) -> &Self::Target {
        &self.file
    }
}

/// Runs a test with a temporary memory-backed vault.
///
/// # Example
///
/// ```rust
/// use syncvault_testkit::with_temp_vault;
///
/// with_temp_vault(|vault| {
///     let (_, is_new) = vault.start_sync().unwrap();
///     assert!(is_new);
/// });
/// ```
pub fn with_temp_vault<F, R>(f: F) -> R
where
    F: FnOnce(&TestVault) -> R,
{
    let vault = TestVault::memory();
    f(&vault)
}

/// Creates a user resource.
pub fn user(id: &str) -> Resource {
    Resource::new(ResourceId::new("user", id), format!("User {id}"))
}

/// Creates `count` user resources named `user-0`, `user-1`, ...
pub fn sample_users(count: usize) -> Vec<Resource> {
    (0..count).map(|i| user(&format!("user-{i}"))).collect()
}

/// Creates the `user` and `group` resource types.
pub fn sample_resource_types() -> Vec<ResourceType> {
    vec![
        ResourceType {
            id: "user".into(),
            display_name: "User".into(),
            traits: vec![ResourceTrait::User],
            ..Default::default()
        },
        ResourceType {
            id: "group".into(),
            display_name: "Group".into(),
            traits: vec![ResourceTrait::Group],
            ..Default::default()
        },
    ]
}

/// A group, its membership entitlement, and grants to `members`.
pub fn sample_membership(group: &str, members: &[Resource]) -> (Resource, Entitlement, Vec<Grant>) {
    let group = Resource::new(ResourceId::new("group", group), group.to_uppercase());
    let entitlement = Entitlement::new(format!("{}:member", group.id), group.clone(), "member");
    let grants = members
        .iter()
        .map(|m| Grant::new(entitlement.clone(), m.clone()))
        .collect();
    (group, entitlement, grants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncvault_core::ListRequest;

    #[test]
    fn test_memory_vault_reopen() {
        let vault = TestVault::memory();
        let id = vault.finished_sync(&sample_users(2));
        let vault = vault.reopen();
        assert_eq!(vault.latest_finished_sync_id(None).unwrap(), Some(id));
        assert!(vault.container_bytes().is_some());
    }

    #[test]
    fn test_file_vault_reopen() {
        let vault = TestVault::file();
        assert!(vault.path().is_some());
        vault.finished_sync(&sample_users(3));
        let vault = vault.reopen();
        let page = vault.list::<Resource>(&ListRequest::new()).unwrap();
        assert_eq!(page.items.len(), 3);
    }

    #[test]
    fn test_sample_membership() {
        let members = sample_users(2);
        let (group, ent, grants) = sample_membership("eng", &members);
        assert_eq!(ent.resource, group);
        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0].principal, members[0]);
    }
}
