//! Session key/value store.
//!
//! Sessions hold scratch state a connector keeps between calls of one
//! sync. Keys are scoped by sync id and an optional prefix; the prefix is
//! stored as part of the key and stripped on the way out.
//!
//! Batched reads answer within a byte budget so one response never grows
//! past what a caller can carry. Keys that do not fit are reported back so
//! the caller can ask again.

use crate::error::{CoreError, CoreResult};
use crate::file::SyncFile;
use crate::schema::SESSIONS;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::collections::BTreeMap;
use tracing::trace;

/// Per-row overhead counted against the budget in `get_many`.
const KEY_OVERHEAD: usize = 10;

/// Per-item overhead counted against the budget in `get_all`.
const ITEM_OVERHEAD: usize = 20;

/// Number of keys bound per `IN` query.
const KEY_CHUNK: usize = 500;

/// The keyspace a session store reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionScope {
    /// Owning sync id; required.
    pub sync_id: String,
    /// Prefix prepended to every key.
    pub prefix: String,
}

impl SessionScope {
    /// Creates a scope for `sync_id` with no prefix.
    pub fn new(sync_id: impl Into<String>) -> Self {
        Self {
            sync_id: sync_id.into(),
            prefix: String::new(),
        }
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn strip<'k>(&self, key: &'k str) -> &'k str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }
}

/// Result of a `get_many` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionBatch {
    /// Values found, keyed without the prefix.
    pub values: BTreeMap<String, Vec<u8>>,
    /// Found keys left out because the budget ran out.
    pub unprocessed: Vec<String>,
}

/// One page of a `get_all` walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPage {
    /// Values on this page, keyed without the prefix.
    pub values: BTreeMap<String, Vec<u8>>,
    /// Key to resume from, or empty when the walk is complete.
    pub next_page_token: String,
}

/// Condition matching keys that start with parameter `?{index}`.
///
/// The comparison is exact, so wildcards and letter case in the prefix
/// are literal.
fn prefix_clause(index: usize) -> String {
    format!("substr(key, 1, length(?{index})) = ?{index}")
}

/// Session operations bound to one scope.
#[derive(Debug)]
pub struct SessionStore<'a> {
    file: &'a SyncFile,
    scope: SessionScope,
}

impl SyncFile {
    /// Returns the session store for `scope`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the scope has no sync id.
    pub fn session_store(&self, scope: SessionScope) -> CoreResult<SessionStore<'_>> {
        if scope.sync_id.is_empty() {
            return Err(CoreError::invalid_argument("session sync id is required"));
        }
        Ok(SessionStore { file: self, scope })
    }
}

impl SessionStore<'_> {
    /// Returns the scope.
    #[must_use]
    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    /// Reads one value.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the lookup fails.
    pub fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        let conn = self.file.conn()?;
        let full = self.scope.key(key);
        conn.query_row(
            &format!(
                "SELECT value FROM {} WHERE sync_id = ?1 AND key = ?2",
                SESSIONS.name
            ),
            params![self.scope.sync_id, full],
            |row| row.get(0),
        )
        .optional()
        .map_err(CoreError::persistence("get", SESSIONS.name, Some(&full)))
    }

    /// Writes one value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the write fails.
    pub fn set(&self, key: &str, value: &[u8]) -> CoreResult<()> {
        let conn = self.file.conn()?;
        let full = self.scope.key(key);
        conn.execute(&upsert_sql(), params![self.scope.sync_id, full, value])
            .map_err(CoreError::persistence("set", SESSIONS.name, Some(&full)))?;
        self.file.mark_mutated();
        Ok(())
    }

    /// Writes several values in one transaction.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if any write fails; nothing is written then.
    pub fn set_many(&self, values: &BTreeMap<String, Vec<u8>>) -> CoreResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.file.conn()?;
        let tx = conn.transaction()?;
        {
            let sql = upsert_sql();
            let mut stmt = tx.prepare_cached(&sql)?;
            for (key, value) in values {
                let full = self.scope.key(key);
                stmt.execute(params![self.scope.sync_id, full, value])
                    .map_err(CoreError::persistence("set", SESSIONS.name, Some(&full)))?;
            }
        }
        tx.commit()?;
        self.file.mark_mutated();
        trace!(count = values.len(), "set session values");
        Ok(())
    }

    /// Deletes one value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the delete fails.
    pub fn delete(&self, key: &str) -> CoreResult<()> {
        let conn = self.file.conn()?;
        let full = self.scope.key(key);
        conn.execute(
            &format!("DELETE FROM {} WHERE sync_id = ?1 AND key = ?2", SESSIONS.name),
            params![self.scope.sync_id, full],
        )
        .map_err(CoreError::persistence("delete", SESSIONS.name, Some(&full)))?;
        self.file.mark_mutated();
        Ok(())
    }

    /// Deletes every value in the scope.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the delete fails.
    pub fn clear(&self) -> CoreResult<()> {
        let conn = self.file.conn()?;
        let result = if self.scope.prefix.is_empty() {
            conn.execute(
                &format!("DELETE FROM {} WHERE sync_id = ?1", SESSIONS.name),
                params![self.scope.sync_id],
            )
        } else {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE sync_id = ?1 AND {}",
                    SESSIONS.name,
                    prefix_clause(2)
                ),
                params![self.scope.sync_id, self.scope.prefix],
            )
        };
        let removed = result.map_err(CoreError::persistence("clear", SESSIONS.name, None))?;
        self.file.mark_mutated();
        trace!(removed, "cleared session scope");
        Ok(())
    }

    /// Reads several values within the byte budget.
    ///
    /// Found keys are taken in key order. Every found key costs its length
    /// plus a fixed overhead up front; each value then costs its length
    /// plus the same overhead. Values past the budget are returned as
    /// unprocessed keys. Missing keys are simply absent.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the lookup fails.
    pub fn get_many(&self, keys: &[&str]) -> CoreResult<SessionBatch> {
        let mut found: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        if keys.is_empty() {
            return Ok(SessionBatch::default());
        }

        let conn = self.file.conn()?;
        for chunk in keys.chunks(KEY_CHUNK) {
            let placeholders: Vec<String> = (0..chunk.len()).map(|i| format!("?{}", i + 2)).collect();
            let sql = format!(
                "SELECT key, value FROM {} WHERE sync_id = ?1 AND key IN ({})",
                SESSIONS.name,
                placeholders.join(", ")
            );
            let mut args = vec![Value::Text(self.scope.sync_id.clone())];
            args.extend(chunk.iter().map(|k| Value::Text(self.scope.key(k))));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(CoreError::persistence("get_many", SESSIONS.name, None))?;
            for row in rows {
                let (key, value) = row?;
                found.insert(self.scope.strip(&key).to_string(), value);
            }
        }

        let budget = self.file.config.session_size_budget;
        let mut size: usize = found.keys().map(|k| k.len() + KEY_OVERHEAD).sum();
        let mut batch = SessionBatch::default();
        for (key, value) in found {
            let cost = value.len() + KEY_OVERHEAD;
            if size + cost > budget {
                batch.unprocessed.push(key);
                continue;
            }
            size += cost;
            batch.values.insert(key, value);
        }
        Ok(batch)
    }

    /// Reads values in key order starting at `page_token`, within the byte budget.
    ///
    /// Each item costs its key length plus value length plus a fixed
    /// overhead. When the next item would exceed the budget the page ends
    /// and its key becomes the next page token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a single item is larger than the budget.
    pub fn get_all(&self, page_token: &str) -> CoreResult<SessionPage> {
        let conn = self.file.conn()?;
        let mut clauses = vec!["sync_id = ?1".to_string()];
        let mut args = vec![Value::Text(self.scope.sync_id.clone())];
        if !self.scope.prefix.is_empty() {
            args.push(Value::Text(self.scope.prefix.clone()));
            clauses.push(prefix_clause(args.len()));
        }
        if !page_token.is_empty() {
            args.push(Value::Text(self.scope.key(page_token)));
            clauses.push(format!("key >= ?{}", args.len()));
        }
        let sql = format!(
            "SELECT key, value FROM {} WHERE {} ORDER BY key ASC",
            SESSIONS.name,
            clauses.join(" AND ")
        );

        let budget = self.file.config.session_size_budget;
        let mut page = SessionPage::default();
        let mut size = 0usize;

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt
            .query(params_from_iter(args.iter()))
            .map_err(CoreError::persistence("get_all", SESSIONS.name, None))?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            let key = self.scope.strip(&key).to_string();
            let cost = key.len() + value.len() + ITEM_OVERHEAD;

            if size + cost > budget {
                if page.values.is_empty() {
                    return Err(CoreError::invalid_argument(format!(
                        "session item {key} is larger than the response budget of {budget} bytes"
                    )));
                }
                page.next_page_token = key;
                break;
            }
            size += cost;
            page.values.insert(key, value);
        }
        Ok(page)
    }
}

fn upsert_sql() -> String {
    format!(
        "INSERT INTO {} (sync_id, key, value) VALUES (?1, ?2, ?3) \
         ON CONFLICT (sync_id, key) DO UPDATE SET value = excluded.value",
        SESSIONS.name
    )
}
