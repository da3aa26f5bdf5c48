//! Retention: pruning old generations and compacting the database file.

use crate::error::{CoreResult, StateError};
use crate::file::SyncFile;
use crate::schema::ALL_TABLES;
use crate::types::SyncType;
use tracing::{debug, info};

impl SyncFile {
    /// Deletes old generations.
    ///
    /// Keeps the newest `keep_sync_count` finished full syncs. Older full
    /// syncs are deleted, as are finished partial and resources-only syncs
    /// that ended before the oldest kept full sync started. Unfinished syncs
    /// are never touched. Returns the deleted sync ids.
    ///
    /// # Errors
    ///
    /// Returns `SyncInProgress` while a sync is being written.
    pub fn cleanup(&self) -> CoreResult<Vec<String>> {
        if self.config.skip_cleanup {
            debug!("cleanup disabled, skipping");
            return Ok(Vec::new());
        }
        if let Some(current) = self.current_sync_id() {
            return Err(StateError::SyncInProgress(current).into());
        }

        let keep = self.config.keep_sync_count;
        let runs = self.all_sync_runs()?;
        let (full, partial): (Vec<_>, Vec<_>) = runs
            .into_iter()
            .filter(|run| run.is_finished())
            .partition(|run| run.sync_type == SyncType::Full);

        if full.len() <= keep {
            debug!(full = full.len(), keep, "nothing to clean up");
            return Ok(Vec::new());
        }

        let cutoff = full.len() - keep;
        let earliest_kept = full[cutoff].started_at;
        let mut doomed: Vec<String> = full[..cutoff].iter().map(|run| run.id.clone()).collect();
        doomed.extend(
            partial
                .iter()
                .filter(|run| run.ended_at.is_some_and(|ended| ended < earliest_kept))
                .map(|run| run.id.clone()),
        );

        for id in &doomed {
            self.delete_sync_run(id)?;
        }
        self.vacuum()?;
        info!(deleted = doomed.len(), kept = keep, "cleaned up sync runs");
        Ok(doomed)
    }

    /// Deletes every row of a generation, including its ledger entry and
    /// session data.
    ///
    /// # Errors
    ///
    /// Returns `DeleteActive` for the sync being written.
    pub fn delete_sync_run(&self, sync_id: &str) -> CoreResult<()> {
        let state = self.state.read();
        if state.current_sync() == Some(sync_id) {
            return Err(StateError::DeleteActive(sync_id.to_string()).into());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for table in ALL_TABLES {
            tx.execute(
                &format!("DELETE FROM {} WHERE sync_id = ?1", table.name),
                [sync_id],
            )?;
        }
        tx.commit()?;
        self.mark_mutated();
        debug!(sync_id, "deleted sync run");
        Ok(())
    }

    /// Rebuilds the database file, reclaiming space left by deletes.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error if the rebuild fails.
    pub fn vacuum(&self) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("VACUUM")?;
        self.mark_mutated();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::CoreError;
    use crate::model::{Resource, ResourceId};
    use crate::record::ListRequest;
    use crate::state::SyncState;
    use syncvault_storage::MemoryStore;

    fn open(config: Config) -> SyncFile {
        SyncFile::open_store(MemoryStore::new("retention"), config).unwrap()
    }

    fn finished(file: &SyncFile, sync_type: SyncType) -> String {
        let id = file.start_new_sync(sync_type, None).unwrap();
        file.put(&[Resource::new(ResourceId::new("user", &id), "u")]).unwrap();
        file.end_sync().unwrap();
        id
    }

    #[test]
    fn keeps_newest_full_syncs() {
        let file = open(Config::default());
        let f1 = finished(&file, SyncType::Full);
        let p1 = file.start_new_sync(SyncType::Partial, Some(&f1)).unwrap();
        file.end_sync().unwrap();
        let f2 = finished(&file, SyncType::Full);
        let f3 = finished(&file, SyncType::Full);

        let mut deleted = file.cleanup().unwrap();
        deleted.sort();
        let mut expected = vec![f1.clone(), p1.clone()];
        expected.sort();
        assert_eq!(deleted, expected);

        assert!(file.get_sync(&f1).unwrap().is_none());
        assert!(file.get_sync(&p1).unwrap().is_none());
        assert!(file.get_sync(&f2).unwrap().is_some());
        assert!(file.get_sync(&f3).unwrap().is_some());

        let rows = file
            .list::<Resource>(&ListRequest::new().sync_id(f1))
            .unwrap();
        assert!(rows.items.is_empty());
    }

    #[test]
    fn nothing_deleted_under_limit() {
        let file = open(Config::default());
        finished(&file, SyncType::Full);
        finished(&file, SyncType::Full);
        assert!(file.cleanup().unwrap().is_empty());
    }

    #[test]
    fn skip_flag_disables_cleanup() {
        let file = open(Config::new().skip_cleanup(true).keep_sync_count(1));
        finished(&file, SyncType::Full);
        finished(&file, SyncType::Full);
        assert!(file.cleanup().unwrap().is_empty());
    }

    #[test]
    fn refused_while_syncing() {
        let file = open(Config::default());
        let (id, _) = file.start_sync().unwrap();
        let err = file.cleanup().unwrap_err();
        assert!(matches!(err, CoreError::State(StateError::SyncInProgress(_))));

        let err = file.delete_sync_run(&id).unwrap_err();
        assert!(matches!(err, CoreError::State(StateError::DeleteActive(_))));
    }

    #[test]
    fn unfinished_runs_survive() {
        let file = open(Config::new().keep_sync_count(1));
        finished(&file, SyncType::Full);
        finished(&file, SyncType::Full);
        let open_run = file.start_new_sync(SyncType::Partial, None).unwrap();

        // Leave the partial run unfinished without it being the active sync.
        *file.state.write() = SyncState::Idle;

        assert_eq!(file.cleanup().unwrap().len(), 1);
        assert!(file.get_sync(&open_run).unwrap().is_some());
    }
}
