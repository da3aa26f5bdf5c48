//! Sync run ledger and the operations that move the state machine.

use crate::error::{CoreError, CoreResult, StateError};
use crate::file::{SyncFile, RESUME_WINDOW_SECS};
use crate::schema::SYNC_RUNS;
use crate::types::{new_sync_id, Page, SyncRun, SyncType, Timestamp};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

const RUN_COLUMNS: &str = "sync_id, started_at, ended_at, sync_token, sync_type, parent_sync_id";

/// Page size used when walking the whole ledger.
const LEDGER_PAGE: u32 = 100;

impl ToSql for SyncType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SyncType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|err: CoreError| FromSqlError::Other(Box::new(err)))
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRun> {
    let parent: String = row.get(5)?;
    Ok(SyncRun {
        id: row.get(0)?,
        started_at: Timestamp(row.get(1)?),
        ended_at: row.get::<_, Option<i64>>(2)?.map(Timestamp),
        sync_token: row.get(3)?,
        sync_type: row.get(4)?,
        parent_sync_id: (!parent.is_empty()).then_some(parent),
    })
}

/// Looks up one run.
pub(crate) fn get_sync(conn: &Connection, sync_id: &str) -> CoreResult<Option<SyncRun>> {
    conn.query_row(
        &format!(
            "SELECT {RUN_COLUMNS} FROM {} WHERE sync_id = ?1",
            SYNC_RUNS.name
        ),
        [sync_id],
        run_from_row,
    )
    .optional()
    .map_err(CoreError::persistence("get", SYNC_RUNS.name, Some(sync_id)))
}

/// Returns the `offset`-th most recently ended run, optionally of one type.
pub(crate) fn finished_sync(
    conn: &Connection,
    offset: u32,
    sync_type: Option<SyncType>,
) -> CoreResult<Option<SyncRun>> {
    let type_clause = if sync_type.is_some() {
        "AND sync_type = ?2"
    } else {
        ""
    };
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM {} WHERE ended_at IS NOT NULL {type_clause} \
         ORDER BY ended_at DESC, id DESC LIMIT 1 OFFSET ?1",
        SYNC_RUNS.name
    );
    let result = match sync_type {
        Some(t) => conn.query_row(&sql, params![offset, t], run_from_row),
        None => conn.query_row(&sql, params![offset], run_from_row),
    };
    Ok(result.optional()?)
}

/// Returns the most recently started unfinished run started after `since`.
pub(crate) fn latest_unfinished(
    conn: &Connection,
    sync_type: Option<SyncType>,
    since: Timestamp,
) -> CoreResult<Option<SyncRun>> {
    let type_clause = if sync_type.is_some() {
        "AND sync_type = ?2"
    } else {
        ""
    };
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM {} WHERE ended_at IS NULL AND started_at > ?1 {type_clause} \
         ORDER BY started_at DESC, id DESC LIMIT 1",
        SYNC_RUNS.name
    );
    let result = match sync_type {
        Some(t) => conn.query_row(&sql, params![since.0, t], run_from_row),
        None => conn.query_row(&sql, params![since.0], run_from_row),
    };
    Ok(result.optional()?)
}

/// Inserts a new unfinished run.
pub(crate) fn insert_run(
    conn: &Connection,
    sync_id: &str,
    started_at: Timestamp,
    sync_type: SyncType,
    parent: Option<&str>,
) -> CoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (sync_id, started_at, sync_token, sync_type, parent_sync_id) \
             VALUES (?1, ?2, '', ?3, ?4)",
            SYNC_RUNS.name
        ),
        params![sync_id, started_at.0, sync_type, parent.unwrap_or("")],
    )
    .map_err(CoreError::persistence("insert", SYNC_RUNS.name, Some(sync_id)))?;
    Ok(())
}

/// Sets `ended_at` on a run that has not ended yet.
pub(crate) fn end_run(conn: &Connection, sync_id: &str, ended_at: Timestamp) -> CoreResult<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET ended_at = ?1 WHERE sync_id = ?2 AND ended_at IS NULL",
            SYNC_RUNS.name
        ),
        params![ended_at.0, sync_id],
    )
    .map_err(CoreError::persistence("end", SYNC_RUNS.name, Some(sync_id)))?;
    Ok(())
}

/// Lists runs in insertion order using row-id tokens.
pub(crate) fn list_runs(
    conn: &Connection,
    page_token: &str,
    page_size: u32,
) -> CoreResult<Page<SyncRun>> {
    let start = parse_page_token(page_token)?;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT id, {RUN_COLUMNS} FROM {} WHERE id >= ?1 ORDER BY id ASC LIMIT ?2",
        SYNC_RUNS.name
    ))?;
    let rows = stmt.query_map(params![start, i64::from(page_size) + 1], |row| {
        let id: i64 = row.get(0)?;
        let parent: String = row.get(6)?;
        Ok((
            id,
            SyncRun {
                id: row.get(1)?,
                started_at: Timestamp(row.get(2)?),
                ended_at: row.get::<_, Option<i64>>(3)?.map(Timestamp),
                sync_token: row.get(4)?,
                sync_type: row.get(5)?,
                parent_sync_id: (!parent.is_empty()).then_some(parent),
            },
        ))
    })?;
    let mut rows = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(paginate(&mut rows, page_size))
}

/// Parses a row-id page token. An empty token starts at the beginning.
pub(crate) fn parse_page_token(token: &str) -> CoreResult<i64> {
    if token.is_empty() {
        return Ok(0);
    }
    token
        .parse::<i64>()
        .map_err(|_| CoreError::invalid_argument(format!("invalid page token: {token}")))
}

/// Turns `size + 1` fetched rows into a page.
///
/// When the extra row is present it is dropped and the token points just
/// past the last returned row id.
pub(crate) fn paginate<T>(rows: &mut Vec<(i64, T)>, page_size: u32) -> Page<T> {
    let mut next_page_token = String::new();
    if rows.len() > page_size as usize {
        rows.truncate(page_size as usize);
        if let Some((last, _)) = rows.last() {
            next_page_token = (last + 1).to_string();
        }
    }
    Page {
        items: rows.drain(..).map(|(_, item)| item).collect(),
        next_page_token,
    }
}

impl SyncFile {
    /// Starts or resumes a full sync. Returns the sync id and whether it is new.
    ///
    /// # Errors
    ///
    /// Returns a state error if the active sync is of another type.
    pub fn start_sync(&self) -> CoreResult<(String, bool)> {
        self.start_or_resume_sync(SyncType::Full, None)
    }

    /// Starts or resumes a sync of `sync_type`.
    ///
    /// With `sync_id`, that unfinished run is resumed. Otherwise the active
    /// sync is returned if there is one, then the most recent unfinished run
    /// of the type from the last seven days, and failing that a new run is
    /// started.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` for an unknown `sync_id`, `AlreadyEnded` for a
    /// finished one, `ResumeMismatch` if another sync is active, and
    /// `InvalidArgument` on a sync type mismatch.
    pub fn start_or_resume_sync(
        &self,
        sync_type: SyncType,
        sync_id: Option<&str>,
    ) -> CoreResult<(String, bool)> {
        if let Some(id) = self.resume_sync(sync_type, sync_id)? {
            return Ok((id, false));
        }
        let id = self.start_new_sync(sync_type, None)?;
        Ok((id, true))
    }

    /// Resumes a sync without ever creating one.
    ///
    /// Returns `None` when there is nothing to resume.
    ///
    /// # Errors
    ///
    /// Same as [`SyncFile::start_or_resume_sync`].
    pub fn resume_sync(
        &self,
        sync_type: SyncType,
        sync_id: Option<&str>,
    ) -> CoreResult<Option<String>> {
        let mut state = self.state.write();
        let conn = self.conn()?;
        let requested = sync_id.filter(|id| !id.is_empty());

        if let Some(current) = state.current_sync() {
            if let Some(requested) = requested {
                if requested != current {
                    return Err(StateError::ResumeMismatch {
                        current: current.to_string(),
                        requested: requested.to_string(),
                    }
                    .into());
                }
            }
            let run = get_sync(&conn, current)?.ok_or_else(|| CoreError::sync_not_found(current))?;
            check_type(&run, sync_type)?;
            return Ok(Some(run.id));
        }

        let run = match requested {
            Some(id) => {
                let run = get_sync(&conn, id)?.ok_or_else(|| CoreError::sync_not_found(id))?;
                if run.is_finished() {
                    return Err(StateError::AlreadyEnded(run.id).into());
                }
                check_type(&run, sync_type)?;
                run
            }
            None => {
                let since = self.clock.now().minus_secs(RESUME_WINDOW_SECS);
                match latest_unfinished(&conn, Some(sync_type), since)? {
                    Some(run) => run,
                    None => return Ok(None),
                }
            }
        };

        *state = state.start(&run.id)?;
        info!(sync_id = %run.id, sync_type = %run.sync_type, "resuming sync");
        Ok(Some(run.id))
    }

    /// Starts a new sync, or returns the active one if it has the same type.
    ///
    /// Full and resources-only syncs cannot have a parent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a parent on a full or resources-only
    /// sync, or when the active sync has a different type.
    pub fn start_new_sync(&self, sync_type: SyncType, parent: Option<&str>) -> CoreResult<String> {
        let parent = parent.filter(|p| !p.is_empty());
        if parent.is_some() && sync_type != SyncType::Partial {
            return Err(CoreError::invalid_argument(format!(
                "parent sync id is not allowed for {sync_type} syncs"
            )));
        }

        let mut state = self.state.write();
        let conn = self.conn()?;

        if let Some(current) = state.current_sync() {
            let run = get_sync(&conn, current)?.ok_or_else(|| CoreError::sync_not_found(current))?;
            check_type(&run, sync_type)?;
            return Ok(run.id);
        }

        let id = new_sync_id();
        insert_run(&conn, &id, self.clock.now(), sync_type, parent)?;
        self.mark_mutated();
        *state = state.start(&id)?;
        info!(sync_id = %id, sync_type = %sync_type, parent = ?parent, "started sync");
        Ok(id)
    }

    /// Ends the active sync.
    ///
    /// # Errors
    ///
    /// Returns `NotSyncing` if no sync is active.
    pub fn end_sync(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        let (next, id) = state.end()?;
        let conn = self.conn()?;
        end_run(&conn, &id, self.clock.now())?;
        self.mark_mutated();
        *state = next;
        info!(sync_id = %id, "ended sync");
        Ok(())
    }

    /// Stores a resumable checkpoint token on the active sync.
    ///
    /// # Errors
    ///
    /// Returns `NotSyncing` if no sync is active.
    pub fn checkpoint_sync(&self, token: &str) -> CoreResult<()> {
        let state = self.state.read();
        let id = state.require_syncing()?;
        let conn = self.conn()?;
        conn.execute(
            &format!("UPDATE {} SET sync_token = ?1 WHERE sync_id = ?2", SYNC_RUNS.name),
            params![token, id],
        )
        .map_err(CoreError::persistence("checkpoint", SYNC_RUNS.name, Some(id)))?;
        self.mark_mutated();
        debug!(sync_id = %id, "checkpointed sync");
        Ok(())
    }

    /// Returns the checkpoint token of the active sync.
    ///
    /// # Errors
    ///
    /// Returns `NotSyncing` if no sync is active.
    pub fn current_sync_step(&self) -> CoreResult<String> {
        let state = self.state.read();
        let id = state.require_syncing()?;
        let conn = self.conn()?;
        let run = get_sync(&conn, id)?.ok_or_else(|| CoreError::sync_not_found(id))?;
        Ok(run.sync_token)
    }

    /// Returns the id of the sync being written, if any.
    #[must_use]
    pub fn current_sync_id(&self) -> Option<String> {
        self.state.read().current_sync().map(str::to_string)
    }

    /// Pins reads to `sync_id` until [`SyncFile::clear_view`].
    ///
    /// # Errors
    ///
    /// Returns `SyncActive` while a sync is being written.
    pub fn view_sync(&self, sync_id: &str) -> CoreResult<()> {
        let mut state = self.state.write();
        *state = state.view_sync(sync_id)?;
        debug!(sync_id, "pinned view");
        Ok(())
    }

    /// Drops a pinned view.
    pub fn clear_view(&self) {
        let mut state = self.state.write();
        *state = state.clear_view();
    }

    /// Returns the pinned view, if any.
    #[must_use]
    pub fn view_sync_id(&self) -> Option<String> {
        self.state.read().view().map(str::to_string)
    }

    /// Returns the id of the most recently ended sync, optionally of one type.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error if the lookup fails.
    pub fn latest_finished_sync_id(&self, sync_type: Option<SyncType>) -> CoreResult<Option<String>> {
        let conn = self.conn()?;
        Ok(finished_sync(&conn, 0, sync_type)?.map(|run| run.id))
    }

    /// Returns the id of the second most recently ended sync.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error if the lookup fails.
    pub fn previous_finished_sync_id(
        &self,
        sync_type: Option<SyncType>,
    ) -> CoreResult<Option<String>> {
        let conn = self.conn()?;
        Ok(finished_sync(&conn, 1, sync_type)?.map(|run| run.id))
    }

    /// Looks up a sync run.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error if the lookup fails.
    pub fn get_sync(&self, sync_id: &str) -> CoreResult<Option<SyncRun>> {
        let conn = self.conn()?;
        get_sync(&conn, sync_id)
    }

    /// Lists sync runs in the order they were started.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed page token.
    pub fn list_sync_runs(&self, page_token: &str, page_size: u32) -> CoreResult<Page<SyncRun>> {
        let page_size = self.clamp_page_size(page_size);
        let conn = self.conn()?;
        list_runs(&conn, page_token, page_size)
    }

    /// Returns every sync run, oldest first.
    pub(crate) fn all_sync_runs(&self) -> CoreResult<Vec<SyncRun>> {
        let conn = self.conn()?;
        let mut runs = Vec::new();
        let mut token = String::new();
        loop {
            let page = list_runs(&conn, &token, LEDGER_PAGE)?;
            runs.extend(page.items);
            if page.next_page_token.is_empty() {
                return Ok(runs);
            }
            token = page.next_page_token;
        }
    }

    /// Clamps a requested page size to `1..=max_page_size`; 0 means the maximum.
    pub(crate) fn clamp_page_size(&self, requested: u32) -> u32 {
        let max = self.config.max_page_size.max(1);
        if requested == 0 || requested > max {
            max
        } else {
            requested
        }
    }
}

fn check_type(run: &SyncRun, expected: SyncType) -> CoreResult<()> {
    if run.sync_type != expected {
        return Err(CoreError::invalid_argument(format!(
            "sync {} is a {} sync, not {}",
            run.id, run.sync_type, expected
        )));
    }
    Ok(())
}
