//! Folding generations together.
//!
//! Compaction merges an applied generation onto a base generation: every
//! base row is carried over, and an applied row wins when the destination
//! has no row for its external id or holds an older one.

use crate::error::{CoreError, CoreResult};
use crate::file::SyncFile;
use crate::schema::{object_tables, TableDescriptor, TableKind, SYNC_RUNS};
use crate::sync_runs::get_sync;
use crate::types::SyncRun;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

/// Returns `columns` as a select list reading from `alias`, with `sync_id`
/// replaced by `placeholder`.
pub(crate) fn select_list(table: &TableDescriptor, alias: &str, placeholder: &str) -> String {
    table
        .column_names()
        .into_iter()
        .map(|c| {
            if c == "sync_id" {
                placeholder.to_string()
            } else {
                format!("{alias}.{c}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT OR REPLACE` of `source.table` rows of one sync into `main.table`
/// under `?1`, taking only rows missing from `?1` or strictly newer.
///
/// Parameters: `?1` destination sync, `?2` applied sync.
fn merge_sql(table: &TableDescriptor, source: &str) -> String {
    let t = table.name;
    format!(
        "INSERT OR REPLACE INTO main.{t} ({cols}) \
         SELECT {select} FROM {source}.{t} AS a \
         WHERE a.sync_id = ?2 AND ( \
             NOT EXISTS (SELECT 1 FROM main.{t} AS m \
                         WHERE m.external_id = a.external_id AND m.sync_id = ?1) \
             OR EXISTS (SELECT 1 FROM main.{t} AS m \
                        WHERE m.external_id = a.external_id AND m.sync_id = ?1 \
                        AND a.discovered_at > m.discovered_at))",
        cols = table.column_names().join(", "),
        select = select_list(table, "a", "?1"),
    )
}

fn require_object_table(table: &TableDescriptor) -> CoreResult<()> {
    if table.kind != TableKind::Object {
        return Err(CoreError::invalid_argument(format!(
            "{} is not a record table",
            table.name
        )));
    }
    Ok(())
}

fn compact_table_in(
    conn: &Connection,
    table: &TableDescriptor,
    dest: &str,
    base: &str,
    applied: &str,
) -> CoreResult<()> {
    let t = table.name;
    if dest != base {
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {t} ({cols}) SELECT {select} FROM {t} AS b WHERE b.sync_id = ?2",
                cols = table.column_names().join(", "),
                select = select_list(table, "b", "?1"),
            ),
            params![dest, base],
        )
        .map_err(CoreError::persistence("compact", t, None))?;
    }
    conn.execute(&merge_sql(table, "main"), params![dest, applied])
        .map_err(CoreError::persistence("compact", t, None))?;
    Ok(())
}

impl SyncFile {
    /// Merges `applied` onto `base`, writing the result into `dest`.
    ///
    /// `dest` may equal `base` to fold in place. Running the same
    /// compaction twice leaves the same rows.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` if any of the three syncs is missing, or
    /// `InvalidArgument` if `dest` equals `applied`.
    pub fn compact(&self, dest: &str, base: &str, applied: &str) -> CoreResult<()> {
        let mut conn = self.conn()?;
        check_syncs(&conn, dest, base, applied)?;

        let tx = conn.transaction()?;
        for table in object_tables() {
            compact_table_in(&tx, table, dest, base, applied)?;
        }
        tx.commit()?;
        self.mark_mutated();
        info!(dest, base, applied, "compacted syncs");
        Ok(())
    }

    /// Runs the compaction step for a single record table.
    ///
    /// # Errors
    ///
    /// Same as [`SyncFile::compact`], plus `InvalidArgument` for a table
    /// that does not hold records.
    pub fn compact_table(
        &self,
        dest: &str,
        base: &str,
        applied: &str,
        table: &TableDescriptor,
    ) -> CoreResult<()> {
        require_object_table(table)?;
        let conn = self.conn()?;
        check_syncs(&conn, dest, base, applied)?;
        compact_table_in(&conn, table, dest, base, applied)?;
        self.mark_mutated();
        debug!(table = table.name, dest, base, applied, "compacted table");
        Ok(())
    }

    /// Attaches another handle's working database under `alias` for
    /// cross-file compaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an alias that is not a plain identifier.
    pub fn attach<'a>(&'a self, other: &SyncFile, alias: &str) -> CoreResult<AttachedFile<'a>> {
        let valid = !alias.is_empty()
            && alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !alias.starts_with(|c: char| c.is_ascii_digit())
            && !matches!(alias, "main" | "temp");
        if !valid {
            return Err(CoreError::invalid_argument(format!("invalid alias: {alias}")));
        }

        let conn = self.conn()?;
        conn.execute(
            "ATTACH DATABASE ?1 AS ?2",
            params![other.db_path().to_string_lossy().into_owned(), alias],
        )?;
        debug!(alias, other = %other.location(), "attached database");
        Ok(AttachedFile {
            file: self,
            alias: alias.to_string(),
            attached: true,
        })
    }
}

fn check_syncs(conn: &Connection, dest: &str, base: &str, applied: &str) -> CoreResult<()> {
    if dest == applied {
        return Err(CoreError::invalid_argument(
            "compaction destination cannot be the applied sync",
        ));
    }
    for id in [dest, base, applied] {
        if get_sync(conn, id)?.is_none() {
            return Err(CoreError::sync_not_found(id));
        }
    }
    Ok(())
}

/// Another sync file attached to this handle's connection.
///
/// Detaches on drop.
#[derive(Debug)]
pub struct AttachedFile<'a> {
    file: &'a SyncFile,
    alias: String,
    attached: bool,
}

impl AttachedFile<'_> {
    fn ensure_attached(&self) -> CoreResult<()> {
        if self.attached {
            Ok(())
        } else {
            Err(CoreError::Detached)
        }
    }

    /// Merges the attached file's `applied` rows of `table` into this
    /// file's `base` rows.
    ///
    /// # Errors
    ///
    /// Returns `Detached` after [`AttachedFile::detach`], or
    /// `InvalidArgument` for a table that does not hold records.
    pub fn compact_table(&self, base: &str, applied: &str, table: &TableDescriptor) -> CoreResult<()> {
        self.ensure_attached()?;
        require_object_table(table)?;
        let conn = self.file.conn()?;
        conn.execute(&merge_sql(table, &self.alias), params![base, applied])
            .map_err(CoreError::persistence("compact", table.name, None))?;
        self.file.mark_mutated();
        Ok(())
    }

    /// Merges every record table.
    ///
    /// # Errors
    ///
    /// Same as [`AttachedFile::compact_table`].
    pub fn compact(&self, base: &str, applied: &str) -> CoreResult<()> {
        for table in object_tables() {
            self.compact_table(base, applied, table)?;
        }
        Ok(())
    }

    /// Folds `applied` into the ledger entry of `base`: the sync types are
    /// combined and the later end time is kept.
    ///
    /// # Errors
    ///
    /// Returns `Detached` after [`AttachedFile::detach`].
    pub fn update_sync(&self, base: &SyncRun, applied: &SyncRun) -> CoreResult<()> {
        self.ensure_attached()?;
        let ended_at = match (base.ended_at, applied.ended_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let sync_type = base.sync_type.union(applied.sync_type);

        let conn = self.file.conn()?;
        conn.execute(
            &format!(
                "UPDATE {} SET ended_at = ?1, sync_type = ?2 WHERE sync_id = ?3",
                SYNC_RUNS.name
            ),
            params![ended_at.map(|t| t.0), sync_type, base.id],
        )
        .map_err(CoreError::persistence("update", SYNC_RUNS.name, Some(&base.id)))?;
        self.file.mark_mutated();
        Ok(())
    }

    /// Detaches the database. Later calls return `Detached`.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error if detaching fails.
    pub fn detach(&mut self) -> CoreResult<()> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        let conn = self.file.conn()?;
        conn.execute_batch(&format!("DETACH DATABASE {}", self.alias))?;
        debug!(alias = %self.alias, "detached database");
        Ok(())
    }
}

impl Drop for AttachedFile<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.detach() {
            warn!(alias = %self.alias, error = %err, "failed to detach database");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Resource, ResourceId};
    use crate::record::ListRequest;
    use crate::schema::{RESOURCES, SESSIONS};
    use crate::types::SyncType;
    use syncvault_storage::MemoryStore;

    fn open(name: &str) -> SyncFile {
        SyncFile::open_store(MemoryStore::new(name), Config::default()).unwrap()
    }

    fn user(id: &str, name: &str) -> Resource {
        Resource::new(ResourceId::new("user", id), name)
    }

    fn names(file: &SyncFile, sync_id: &str) -> Vec<(String, String)> {
        let mut rows: Vec<_> = file
            .list::<Resource>(&ListRequest::new().sync_id(sync_id))
            .unwrap()
            .items
            .into_iter()
            .map(|r| (r.id.resource, r.display_name))
            .collect();
        rows.sort();
        rows
    }

    #[test]
    fn select_list_swaps_sync_id() {
        let select = select_list(&RESOURCES, "a", "?1");
        assert!(select.contains("a.external_id"));
        assert!(select.contains("?1"));
        assert!(!select.contains("a.sync_id"));
    }

    #[test]
    fn compact_in_place() {
        let file = open("compact");
        let base = file.start_new_sync(SyncType::Full, None).unwrap();
        file.put(&[user("k1", "v1"), user("k2", "v2")]).unwrap();
        file.end_sync().unwrap();

        let applied = file.start_new_sync(SyncType::Partial, Some(&base)).unwrap();
        file.put(&[user("k2", "v2b"), user("k3", "v3")]).unwrap();
        file.end_sync().unwrap();

        file.compact(&base, &base, &applied).unwrap();
        let expected = vec![
            ("k1".to_string(), "v1".to_string()),
            ("k2".to_string(), "v2b".to_string()),
            ("k3".to_string(), "v3".to_string()),
        ];
        assert_eq!(names(&file, &base), expected);

        file.compact(&base, &base, &applied).unwrap();
        assert_eq!(names(&file, &base), expected);
    }

    #[test]
    fn compact_rejects_bad_arguments() {
        let file = open("bad");
        let base = file.start_new_sync(SyncType::Full, None).unwrap();
        file.end_sync().unwrap();

        assert!(matches!(
            file.compact(&base, &base, "missing"),
            Err(CoreError::SyncNotFound { .. })
        ));
        assert!(matches!(
            file.compact(&base, "x", &base),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(matches!(
            file.compact_table(&base, &base, &base, &SESSIONS),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn attached_compaction_across_files() {
        let target = open("target");
        let base = target.start_new_sync(SyncType::Full, None).unwrap();
        target.put(&[user("k1", "v1"), user("k2", "v2")]).unwrap();
        target.end_sync().unwrap();

        let source = open("source");
        let applied = source.start_new_sync(SyncType::Partial, None).unwrap();
        source.put(&[user("k2", "v2b"), user("k3", "v3")]).unwrap();
        source.end_sync().unwrap();

        let base_run = target.get_sync(&base).unwrap().unwrap();
        let applied_run = source.get_sync(&applied).unwrap().unwrap();

        let mut attached = target.attach(&source, "src").unwrap();
        attached.compact(&base, &applied).unwrap();
        attached.update_sync(&base_run, &applied_run).unwrap();
        attached.detach().unwrap();
        assert!(matches!(
            attached.compact(&base, &applied),
            Err(CoreError::Detached)
        ));
        drop(attached);

        assert_eq!(
            names(&target, &base),
            vec![
                ("k1".to_string(), "v1".to_string()),
                ("k2".to_string(), "v2b".to_string()),
                ("k3".to_string(), "v3".to_string()),
            ]
        );
        let merged = target.get_sync(&base).unwrap().unwrap();
        assert_eq!(merged.sync_type, SyncType::Full);
        assert_eq!(merged.ended_at, applied_run.ended_at.max(base_run.ended_at));
    }

    #[test]
    fn attach_validates_alias() {
        let a = open("a");
        let b = open("b");
        assert!(a.attach(&b, "bad alias").is_err());
        assert!(a.attach(&b, "main").is_err());
        assert!(a.attach(&b, "").is_err());
    }
}
