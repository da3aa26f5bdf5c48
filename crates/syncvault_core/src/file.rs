//! The sync file handle.
//!
//! A [`SyncFile`] owns a private working copy of the database, materialized
//! from the container on open. All operations run against the working copy.
//! On close the copy is re-encoded and handed back to the container store,
//! but only if something changed.
//!
//! Locks are always taken in the order `state` then `conn`. Code holding
//! the connection never reaches for the state lock; callers snapshot the
//! state first.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::state::SyncState;
use crate::sync_runs;
use crate::types::{CloseOutcome, Clock, SyncType};
use fs2::FileExt;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard, RwLock};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use syncvault_container::{decode_file, encode_file};
use syncvault_storage::{ContainerStore, LocalFileStore};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const DB_FILE: &str = "db";
const STAGING_FILE: &str = "container.c1z";

/// Unfinished syncs older than this are not resumed.
pub(crate) const RESUME_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

/// Handle to one snapshot file.
pub struct SyncFile {
    conn: Mutex<Option<Connection>>,
    pub(crate) state: RwLock<SyncState>,
    mutated: AtomicBool,
    closed: AtomicBool,
    pub(crate) clock: Clock,
    pub(crate) config: Config,
    db_path: PathBuf,
    staging_path: PathBuf,
    workdir: Mutex<Option<TempDir>>,
    store: Box<dyn ContainerStore>,
    lock: Mutex<Option<File>>,
    slow_queries: Mutex<HashMap<String, Instant>>,
}

impl SyncFile {
    /// Opens the container at `path`, creating a fresh file if it does not exist.
    ///
    /// Writable handles take an exclusive lock on `<path>.lock` for their
    /// lifetime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid config, `Locked` if another
    /// handle holds the lock, or a container, I/O or SQLite error.
    pub fn open(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let path = path.as_ref();
        let lock = if config.read_only {
            None
        } else {
            Some(acquire_lock(path)?)
        };
        Self::open_inner(Box::new(LocalFileStore::new(path)), lock, config)
    }

    /// Opens a container held by `store`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid config, or a storage,
    /// container, I/O or SQLite error.
    pub fn open_store(store: impl ContainerStore + 'static, config: Config) -> CoreResult<Self> {
        config.validate()?;
        Self::open_inner(Box::new(store), None, config)
    }

    fn open_inner(
        store: Box<dyn ContainerStore>,
        lock: Option<File>,
        config: Config,
    ) -> CoreResult<Self> {
        let workdir = scratch_dir(&config)?;
        let db_path = workdir.path().join(DB_FILE);
        let staging_path = workdir.path().join(STAGING_FILE);

        if store.load_to(&staging_path)? {
            decode_file(&staging_path, &db_path, &config.decoder)?;
        }

        let conn = Connection::open(&db_path)?;
        init_connection(&conn, &config)?;

        info!(
            location = %store.location(),
            read_only = config.read_only,
            "opened sync file"
        );

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            state: RwLock::new(SyncState::Idle),
            mutated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            clock: Clock::new(),
            config,
            db_path,
            staging_path,
            workdir: Mutex::new(Some(workdir)),
            store,
            lock: Mutex::new(lock),
            slow_queries: Mutex::new(HashMap::new()),
        })
    }

    /// Closes the handle, saving the container if anything changed.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` if a read-only handle was mutated, or an error
    /// from encoding or saving the container.
    pub fn close(&self) -> CoreResult<CloseOutcome> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(CloseOutcome { saved: false });
        }

        let conn = self.conn.lock().take();
        let result = match conn {
            Some(conn) => match conn.close() {
                Ok(()) => self.persist(),
                Err((_, err)) => Err(err.into()),
            },
            None => Ok(CloseOutcome { saved: false }),
        };

        self.lock.lock().take();
        if let Some(dir) = self.workdir.lock().take() {
            if let Err(err) = dir.close() {
                warn!(error = %err, "failed to remove working directory");
            }
        }
        result
    }

    fn persist(&self) -> CoreResult<CloseOutcome> {
        if !self.mutated.load(Ordering::SeqCst) {
            debug!(location = %self.store.location(), "no changes, skipping save");
            return Ok(CloseOutcome { saved: false });
        }
        if self.config.read_only {
            return Err(CoreError::ReadOnly);
        }

        encode_file(&self.db_path, &self.staging_path, &self.config.encoder)?;
        let size = self.store.save_from(&self.staging_path)?;
        info!(location = %self.store.location(), bytes = size, "saved sync file");
        Ok(CloseOutcome { saved: true })
    }

    /// Returns true once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns true if the handle has changes that close would save.
    #[must_use]
    pub fn is_mutated(&self) -> bool {
        self.mutated.load(Ordering::SeqCst)
    }

    /// Returns the handle configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns where the container is saved.
    #[must_use]
    pub fn location(&self) -> String {
        self.store.location()
    }

    pub(crate) fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn mark_mutated(&self) {
        self.mutated.store(true, Ordering::SeqCst);
    }

    /// Returns a snapshot of the sync state.
    pub(crate) fn state_snapshot(&self) -> SyncState {
        self.state.read().clone()
    }

    /// Locks the connection.
    pub(crate) fn conn(&self) -> CoreResult<MappedMutexGuard<'_, Connection>> {
        MutexGuard::try_map(self.conn.lock(), Option::as_mut).map_err(|_| CoreError::Closed)
    }

    /// Picks the generation a read should target.
    ///
    /// In order: an explicit id, the sync being written, the pinned view,
    /// the latest finished full sync, the latest unfinished sync. `None`
    /// means no generation exists and reads are unfiltered.
    pub(crate) fn resolve_sync_id(
        &self,
        conn: &Connection,
        state: &SyncState,
        requested: Option<&str>,
    ) -> CoreResult<Option<String>> {
        if let Some(id) = requested.filter(|id| !id.is_empty()) {
            return Ok(Some(id.to_string()));
        }
        match state {
            SyncState::Syncing(id) | SyncState::Viewing(id) => return Ok(Some(id.clone())),
            SyncState::Idle => {}
        }
        if let Some(run) = sync_runs::finished_sync(conn, 0, Some(SyncType::Full))? {
            return Ok(Some(run.id));
        }
        let since = self.clock.now().minus_secs(RESUME_WINDOW_SECS);
        Ok(sync_runs::latest_unfinished(conn, None, since)?.map(|run| run.id))
    }

    /// Runs `f`, logging it when it exceeds the slow query threshold.
    ///
    /// Logs for the same `label` are throttled to one per
    /// `slow_query_log_interval`.
    pub(crate) fn timed<T>(&self, label: &str, f: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        if elapsed > self.config.slow_query_threshold {
            let mut last = self.slow_queries.lock();
            let due = last
                .get(label)
                .map_or(true, |at| at.elapsed() >= self.config.slow_query_log_interval);
            if due {
                last.insert(label.to_string(), Instant::now());
                warn!(query = label, elapsed_ms = elapsed.as_millis() as u64, "slow query");
            }
        }
        result
    }
}

impl std::fmt::Debug for SyncFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncFile")
            .field("location", &self.store.location())
            .field("state", &*self.state.read())
            .field("mutated", &self.is_mutated())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for SyncFile {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "error closing sync file on drop");
        }
    }
}

fn init_connection(conn: &Connection, config: &Config) -> CoreResult<()> {
    crate::schema::init_tables(conn)?;
    if config.read_only {
        conn.execute_batch("PRAGMA journal_mode = OFF; PRAGMA synchronous = OFF;")?;
    }
    for (name, value) in &config.pragmas {
        conn.execute_batch(&format!("PRAGMA {name} = {value};"))?;
    }
    Ok(())
}

/// Creates a private temp directory under `config.tmp_dir` or the system default.
pub(crate) fn scratch_dir(config: &Config) -> CoreResult<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("syncvault-");
    let dir = match &config.tmp_dir {
        Some(dir) => builder.tempdir_in(dir)?,
        None => builder.tempdir()?,
    };
    Ok(dir)
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn acquire_lock(path: &Path) -> CoreResult<File> {
    let lock_path = lock_path(path);
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    if lock_file.try_lock_exclusive().is_err() {
        return Err(CoreError::Locked {
            path: path.display().to_string(),
        });
    }
    Ok(lock_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncvault_storage::MemoryStore;
    use tempfile::tempdir;

    #[test]
    fn fresh_file_is_not_saved_without_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.c1z");

        let file = SyncFile::open(&path, Config::default()).unwrap();
        assert!(!file.is_mutated());
        assert_eq!(file.close().unwrap(), CloseOutcome { saved: false });
        assert!(!path.exists());
    }

    #[test]
    fn mutated_file_is_saved_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.c1z");

        let file = SyncFile::open(&path, Config::default()).unwrap();
        file.start_sync().unwrap();
        assert!(file.is_mutated());
        assert_eq!(file.close().unwrap(), CloseOutcome { saved: true });

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..5], b"C1ZF\0");
    }

    #[test]
    fn second_writer_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.c1z");

        let first = SyncFile::open(&path, Config::default()).unwrap();
        let second = SyncFile::open(&path, Config::default());
        assert!(matches!(second, Err(CoreError::Locked { .. })));

        first.close().unwrap();
        SyncFile::open(&path, Config::default()).unwrap();
    }

    #[test]
    fn read_only_refuses_to_save_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.c1z");

        let file = SyncFile::open(&path, Config::new().read_only(true)).unwrap();
        file.start_sync().unwrap();
        assert!(matches!(file.close(), Err(CoreError::ReadOnly)));
        assert!(!path.exists());
    }

    #[test]
    fn closed_handle_rejects_operations() {
        let store = MemoryStore::new("closed");
        let file = SyncFile::open_store(store, Config::default()).unwrap();
        file.close().unwrap();
        assert!(file.is_closed());
        assert!(matches!(file.start_sync(), Err(CoreError::Closed)));
        assert_eq!(file.close().unwrap(), CloseOutcome { saved: false });
    }

    #[test]
    fn store_round_trip() {
        let store = MemoryStore::new("vault");
        let objects = store.objects();

        let file = SyncFile::open_store(store, Config::default()).unwrap();
        let (id, _) = file.start_sync().unwrap();
        file.end_sync().unwrap();
        file.close().unwrap();

        let reopened =
            SyncFile::open_store(MemoryStore::with_objects(objects, "vault"), Config::default())
                .unwrap();
        assert_eq!(reopened.latest_finished_sync_id(None).unwrap(), Some(id));
    }

    #[test]
    fn invalid_config_is_rejected_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zero.c1z");
        let err = SyncFile::open(&path, Config::new().keep_sync_count(0)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
        assert!(!lock_path(&path).exists());

        let err = SyncFile::open_store(MemoryStore::new("zero"), Config::new().keep_sync_count(0))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn working_copy_lives_in_tmp_dir() {
        let tmp = tempdir().unwrap();
        let file =
            SyncFile::open_store(MemoryStore::new("t"), Config::new().tmp_dir(tmp.path())).unwrap();
        assert!(file.db_path().starts_with(tmp.path()));
        file.close().unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
