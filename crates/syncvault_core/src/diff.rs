//! Diffing two generations into a new partial generation.

use crate::compact::select_list;
use crate::error::{CoreError, CoreResult};
use crate::file::SyncFile;
use crate::schema::object_tables;
use crate::sync_runs::{end_run, get_sync, insert_run};
use crate::types::{new_sync_id, SyncType};
use rusqlite::params;
use tracing::info;

impl SyncFile {
    /// Creates a finished partial sync holding the records of `applied`
    /// whose external id does not appear in `base`.
    ///
    /// The new sync's parent is `base`. Records present in both
    /// generations, changed or not, are not part of the diff, and records
    /// removed in `applied` are not represented. Returns the new sync id.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` if either sync is missing.
    pub fn generate_diff(&self, base: &str, applied: &str) -> CoreResult<String> {
        let mut conn = self.conn()?;
        for id in [base, applied] {
            if get_sync(&conn, id)?.is_none() {
                return Err(CoreError::sync_not_found(id));
            }
        }

        let diff_id = new_sync_id();
        let tx = conn.transaction()?;
        insert_run(&tx, &diff_id, self.clock.now(), SyncType::Partial, Some(base))?;
        for table in object_tables() {
            let t = table.name;
            tx.execute(
                &format!(
                    "INSERT INTO {t} ({cols}) SELECT {select} FROM {t} AS a \
                     WHERE a.sync_id = ?2 AND a.external_id NOT IN \
                     (SELECT external_id FROM {t} WHERE sync_id = ?3)",
                    cols = table.column_names().join(", "),
                    select = select_list(table, "a", "?1"),
                ),
                params![diff_id, applied, base],
            )
            .map_err(CoreError::persistence("diff", t, None))?;
        }
        end_run(&tx, &diff_id, self.clock.now())?;
        tx.commit()?;
        self.mark_mutated();

        info!(sync_id = %diff_id, base, applied, "generated diff");
        Ok(diff_id)
    }
}
