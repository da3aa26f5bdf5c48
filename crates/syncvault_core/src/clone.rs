//! Extracting one generation into a standalone container.

use crate::error::{CoreError, CoreResult};
use crate::file::{scratch_dir, SyncFile};
use crate::schema::{init_tables, ALL_TABLES};
use crate::sync_runs::{finished_sync, get_sync};
use rusqlite::{params, Connection};
use std::path::Path;
use syncvault_container::encode_file;
use tracing::info;

const CLONE_ALIAS: &str = "clone";

impl SyncFile {
    /// Writes a new container at `dest` holding only one finished generation.
    ///
    /// Without `sync_id` the latest finished sync is cloned. Every table's
    /// rows for the generation are copied, its ledger entry and session data
    /// included.
    ///
    /// # Errors
    ///
    /// Returns `DestinationExists` if `dest` exists, `SyncNotFound` or
    /// `SyncNotFinished` for an unusable generation, or a container error
    /// from writing `dest`.
    pub fn clone_sync(&self, dest: impl AsRef<Path>, sync_id: Option<&str>) -> CoreResult<String> {
        let dest = dest.as_ref();
        if dest.exists() {
            return Err(CoreError::DestinationExists {
                path: dest.display().to_string(),
            });
        }

        let mut conn = self.conn()?;
        let sync_id = match sync_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                finished_sync(&conn, 0, None)?
                    .ok_or_else(|| CoreError::invalid_argument("no finished sync to clone"))?
                    .id
            }
        };
        let run = get_sync(&conn, &sync_id)?.ok_or_else(|| CoreError::sync_not_found(&sync_id))?;
        if !run.is_finished() {
            return Err(CoreError::SyncNotFinished { sync_id });
        }

        let workdir = scratch_dir(&self.config)?;
        let clone_db = workdir.path().join("clone.db");
        {
            let out = Connection::open(&clone_db)?;
            init_tables(&out)?;
        }

        conn.execute(
            "ATTACH DATABASE ?1 AS ?2",
            params![clone_db.to_string_lossy().into_owned(), CLONE_ALIAS],
        )?;
        let copied = copy_generation(&mut conn, &sync_id);
        let detached = conn.execute_batch(&format!("DETACH DATABASE {CLONE_ALIAS}"));
        copied?;
        detached?;

        encode_file(&clone_db, dest, &self.config.encoder)?;
        info!(sync_id = %sync_id, path = %dest.display(), "cloned sync");
        Ok(sync_id)
    }
}

fn copy_generation(conn: &mut Connection, sync_id: &str) -> CoreResult<()> {
    let tx = conn.transaction()?;
    for table in ALL_TABLES {
        tx.execute(
            &format!(
                "INSERT INTO {CLONE_ALIAS}.{t} SELECT * FROM main.{t} WHERE sync_id = ?1",
                t = table.name
            ),
            [sync_id],
        )
        .map_err(CoreError::persistence("clone", table.name, None))?;
    }
    tx.commit()?;
    Ok(())
}
