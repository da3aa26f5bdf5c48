//! Per-generation record counts.

use crate::error::{CoreError, CoreResult};
use crate::file::SyncFile;
use crate::schema::{TableDescriptor, ASSETS, ENTITLEMENTS, GRANTS, RESOURCES, RESOURCE_TYPES};
use crate::sync_runs::get_sync;
use crate::types::SyncType;
use rusqlite::Connection;
use std::collections::BTreeMap;

/// Record counts for one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Generation counted; `None` when the file has no syncs.
    pub sync_id: Option<String>,
    /// Number of resource types.
    pub resource_types: u64,
    /// Number of resources per resource type id.
    pub resources: BTreeMap<String, u64>,
    /// Number of entitlements; `None` for resources-only syncs.
    pub entitlements: Option<u64>,
    /// Number of grants; `None` for resources-only syncs.
    pub grants: Option<u64>,
    /// Number of assets.
    pub assets: u64,
}

fn count(conn: &Connection, table: &TableDescriptor, sync_id: &str) -> CoreResult<u64> {
    let n: i64 = conn
        .query_row(
            &format!("SELECT count(*) FROM {} WHERE sync_id = ?1", table.name),
            [sync_id],
            |row| row.get(0),
        )
        .map_err(CoreError::persistence("count", table.name, None))?;
    Ok(u64::try_from(n).unwrap_or_default())
}

impl SyncFile {
    /// Counts the records of a generation.
    ///
    /// Without `sync_id` the generation is resolved the same way reads are.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` for an unknown explicit `sync_id`.
    pub fn stats(&self, sync_id: Option<&str>) -> CoreResult<SyncStats> {
        let state = self.state_snapshot();
        let conn = self.conn()?;
        let Some(sync_id) = self.resolve_sync_id(&conn, &state, sync_id)? else {
            return Ok(SyncStats::default());
        };
        let run = get_sync(&conn, &sync_id)?.ok_or_else(|| CoreError::sync_not_found(&sync_id))?;

        let mut resources = BTreeMap::new();
        {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT resource_type_id, count(*) FROM {} WHERE sync_id = ?1 \
                 GROUP BY resource_type_id ORDER BY resource_type_id",
                RESOURCES.name
            ))?;
            let rows = stmt.query_map([&sync_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (resource_type, n) = row?;
                resources.insert(resource_type, u64::try_from(n).unwrap_or_default());
            }
        }

        let full_detail = run.sync_type != SyncType::ResourcesOnly;
        Ok(SyncStats {
            resource_types: count(&conn, &RESOURCE_TYPES, &sync_id)?,
            resources,
            entitlements: full_detail
                .then(|| count(&conn, &ENTITLEMENTS, &sync_id))
                .transpose()?,
            grants: full_detail
                .then(|| count(&conn, &GRANTS, &sync_id))
                .transpose()?,
            assets: count(&conn, &ASSETS, &sync_id)?,
            sync_id: Some(sync_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Entitlement, Resource, ResourceId, ResourceType};
    use syncvault_storage::MemoryStore;

    fn open() -> SyncFile {
        SyncFile::open_store(MemoryStore::new("stats"), Config::default()).unwrap()
    }

    #[test]
    fn counts_by_resource_type() {
        let file = open();
        let (id, _) = file.start_sync().unwrap();
        file.put(&[ResourceType {
            id: "user".into(),
            ..Default::default()
        }])
        .unwrap();
        let alice = Resource::new(ResourceId::new("user", "alice"), "Alice");
        file.put(&[
            alice.clone(),
            Resource::new(ResourceId::new("user", "bob"), "Bob"),
            Resource::new(ResourceId::new("group", "eng"), "Eng"),
        ])
        .unwrap();
        file.put(&[Entitlement::new("user:alice:owner", alice, "owner")])
            .unwrap();
        file.end_sync().unwrap();

        let stats = file.stats(None).unwrap();
        assert_eq!(stats.sync_id, Some(id));
        assert_eq!(stats.resource_types, 1);
        assert_eq!(stats.resources.get("user"), Some(&2));
        assert_eq!(stats.resources.get("group"), Some(&1));
        assert_eq!(stats.entitlements, Some(1));
        assert_eq!(stats.grants, Some(0));
    }

    #[test]
    fn resources_only_omits_grants() {
        let file = open();
        let id = file.start_new_sync(SyncType::ResourcesOnly, None).unwrap();
        file.end_sync().unwrap();

        let stats = file.stats(Some(&id)).unwrap();
        assert_eq!(stats.entitlements, None);
        assert_eq!(stats.grants, None);
    }

    #[test]
    fn empty_file_and_unknown_sync() {
        let file = open();
        assert_eq!(file.stats(None).unwrap(), SyncStats::default());
        assert!(matches!(
            file.stats(Some("missing")),
            Err(CoreError::SyncNotFound { .. })
        ));
    }
}
