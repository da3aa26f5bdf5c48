//! Typed record operations over the object tables.

use crate::error::{CoreError, CoreResult};
use crate::file::SyncFile;
use crate::model::{Entitlement, Grant, Resource, ResourceId, ResourceType};
use crate::record::{ListFilter, ListRequest, Record};
use crate::schema::TableDescriptor;
use crate::sync_runs::{paginate, parse_page_token};
use crate::types::{Page, Timestamp};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use syncvault_codec::{Decode, Encode};
use tracing::trace;

/// Builds the upsert statement for `table`.
///
/// Conflicts on `(external_id, sync_id)` replace the payload, timestamp
/// and filter columns. With `only_newer` the update is skipped unless the
/// incoming row was discovered later than the stored one.
fn upsert_sql(table: &TableDescriptor, only_newer: bool) -> String {
    let columns = table.column_names();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let mut updates = vec![
        "data = excluded.data".to_string(),
        "discovered_at = excluded.discovered_at".to_string(),
    ];
    updates.extend(
        table
            .filter_columns
            .iter()
            .map(|c| format!("{c} = excluded.{c}")),
    );

    let mut sql = format!(
        "INSERT INTO {t} ({cols}) VALUES ({vals}) \
         ON CONFLICT (external_id, sync_id) DO UPDATE SET {updates}",
        t = table.name,
        cols = columns.join(", "),
        vals = placeholders.join(", "),
        updates = updates.join(", "),
    );
    if only_newer {
        sql.push_str(&format!(
            " WHERE excluded.discovered_at > {}.discovered_at",
            table.name
        ));
    }
    sql
}

/// Orders a row's values to match `table.column_names()`.
pub(crate) fn row_values(
    table: &TableDescriptor,
    external_id: &str,
    filters: &[Option<String>],
    data: Vec<u8>,
    sync_id: &str,
    discovered_at: Timestamp,
) -> CoreResult<Vec<Value>> {
    if filters.len() != table.filter_columns.len() {
        return Err(CoreError::invalid_argument(format!(
            "{} expects {} filter values, got {}",
            table.name,
            table.filter_columns.len(),
            filters.len()
        )));
    }
    let mut data = Some(data);
    table
        .column_names()
        .into_iter()
        .map(|column| {
            Ok(match column {
                "external_id" => Value::Text(external_id.to_string()),
                "data" => Value::Blob(data.take().unwrap_or_default()),
                "sync_id" => Value::Text(sync_id.to_string()),
                "discovered_at" => Value::Integer(discovered_at.0),
                other => {
                    let idx = table
                        .filter_columns
                        .iter()
                        .position(|f| *f == other)
                        .ok_or_else(|| {
                            CoreError::invalid_argument(format!(
                                "{} has no value for column {other}",
                                table.name
                            ))
                        })?;
                    filters[idx].clone().map_or(Value::Null, Value::Text)
                }
            })
        })
        .collect()
}

/// Builds the `WHERE` clause for a list or get, numbering parameters from 1.
fn where_clause(
    table: &TableDescriptor,
    sync_id: Option<&str>,
    filter: &ListFilter,
) -> CoreResult<(String, Vec<Value>)> {
    let mut clauses = Vec::new();
    let mut args = Vec::new();

    if let Some(sync_id) = sync_id {
        args.push(Value::Text(sync_id.to_string()));
        clauses.push(format!("sync_id = ?{}", args.len()));
    }

    for condition in filter.conditions() {
        if !table.has_filter(condition.column) {
            return Err(CoreError::invalid_argument(format!(
                "{} cannot be filtered by {}",
                table.name, condition.column
            )));
        }
        let mut placeholders = Vec::with_capacity(condition.values.len());
        for value in condition.values {
            args.push(Value::Text(value));
            placeholders.push(format!("?{}", args.len()));
        }
        clauses.push(match placeholders.len() {
            1 => format!("{} = {}", condition.column, placeholders[0]),
            _ => format!("{} IN ({})", condition.column, placeholders.join(", ")),
        });
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    Ok((sql, args))
}

impl SyncFile {
    /// Upserts records into the active sync.
    ///
    /// Writing the same record twice leaves one row holding the later payload.
    ///
    /// # Errors
    ///
    /// Returns `NotSyncing` if no sync is active, or a persistence error.
    pub fn put<R: Record>(&self, records: &[R]) -> CoreResult<()> {
        self.put_records(records, false)
    }

    /// Upserts records, keeping stored rows that were discovered later.
    ///
    /// # Errors
    ///
    /// Returns `NotSyncing` if no sync is active, or a persistence error.
    pub fn put_if_newer<R: Record>(&self, records: &[R]) -> CoreResult<()> {
        self.put_records(records, true)
    }

    fn put_records<R: Record>(&self, records: &[R], only_newer: bool) -> CoreResult<()> {
        let state = self.state.read();
        let sync_id = state.require_syncing()?;
        if records.is_empty() {
            return Ok(());
        }

        let table = R::TABLE;
        let sql = upsert_sql(table, only_newer);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for record in records {
                let external_id = record.external_id();
                let data = record.encode()?;
                let values = row_values(
                    table,
                    &external_id,
                    &record.filter_values(),
                    data,
                    sync_id,
                    self.clock.now(),
                )?;
                stmt.execute(params_from_iter(values.iter()))
                    .map_err(CoreError::persistence("put", table.name, Some(&external_id)))?;
            }
        }
        tx.commit()?;
        self.mark_mutated();
        trace!(table = table.name, count = records.len(), sync_id, "put records");
        Ok(())
    }

    /// Reads one record by external id from the resolved generation.
    ///
    /// # Errors
    ///
    /// Returns a persistence or codec error.
    pub fn get<R: Record>(&self, external_id: &str, sync_id: Option<&str>) -> CoreResult<Option<R>> {
        let state = self.state_snapshot();
        let table = R::TABLE;
        let conn = self.conn()?;
        let resolved = self.resolve_sync_id(&conn, &state, sync_id)?;

        let (clause, mut args) = where_clause(table, resolved.as_deref(), &ListFilter::None)?;
        args.push(Value::Text(external_id.to_string()));
        let key_clause = format!("external_id = ?{}", args.len());
        let clause = if clause.is_empty() {
            format!("WHERE {key_clause}")
        } else {
            format!("{clause} AND {key_clause}")
        };
        let sql = format!(
            "SELECT data FROM {} {clause} ORDER BY id DESC LIMIT 1",
            table.name
        );

        let data: Option<Vec<u8>> = self.timed(table.name, || {
            conn.query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))
                .optional()
                .map_err(CoreError::persistence("get", table.name, Some(external_id)))
        })?;
        data.map(|bytes| R::decode(&bytes).map_err(CoreError::from))
            .transpose()
    }

    /// Lists one page of records from the resolved generation.
    ///
    /// Rows come back in insertion order. The next page token is opaque;
    /// an empty token means the listing is complete.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed page token or a filter the
    /// record kind does not support.
    pub fn list<R: Record>(&self, request: &ListRequest) -> CoreResult<Page<R>> {
        let state = self.state_snapshot();
        let table = R::TABLE;
        let page_size = self.clamp_page_size(request.page_size);
        let start = parse_page_token(&request.page_token)?;

        if request
            .filter
            .conditions()
            .iter()
            .any(|c| c.values.is_empty())
        {
            return Ok(Page {
                items: Vec::new(),
                next_page_token: String::new(),
            });
        }

        let conn = self.conn()?;
        let resolved = self.resolve_sync_id(&conn, &state, request.sync_id.as_deref())?;
        let (clause, mut args) = where_clause(table, resolved.as_deref(), &request.filter)?;

        args.push(Value::Integer(start));
        let token_clause = format!("id >= ?{}", args.len());
        let clause = if clause.is_empty() {
            format!("WHERE {token_clause}")
        } else {
            format!("{clause} AND {token_clause}")
        };
        args.push(Value::Integer(i64::from(page_size) + 1));
        let sql = format!(
            "SELECT id, data FROM {} {clause} ORDER BY id ASC LIMIT ?{}",
            table.name,
            args.len()
        );

        let mut rows = self.timed(table.name, || {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(CoreError::persistence("list", table.name, None))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(CoreError::persistence("list", table.name, None))
        })?;

        let page = paginate(&mut rows, page_size);
        let items = page
            .items
            .iter()
            .map(|bytes| R::decode(bytes).map_err(CoreError::from))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            next_page_token: page.next_page_token,
        })
    }

    /// Reads a resource type.
    ///
    /// # Errors
    ///
    /// See [`SyncFile::get`].
    pub fn get_resource_type(
        &self,
        id: &str,
        sync_id: Option<&str>,
    ) -> CoreResult<Option<ResourceType>> {
        self.get(id, sync_id)
    }

    /// Reads a resource.
    ///
    /// # Errors
    ///
    /// See [`SyncFile::get`].
    pub fn get_resource(&self, id: &ResourceId, sync_id: Option<&str>) -> CoreResult<Option<Resource>> {
        self.get(&id.to_string(), sync_id)
    }

    /// Reads an entitlement.
    ///
    /// # Errors
    ///
    /// See [`SyncFile::get`].
    pub fn get_entitlement(&self, id: &str, sync_id: Option<&str>) -> CoreResult<Option<Entitlement>> {
        self.get(id, sync_id)
    }

    /// Reads a grant.
    ///
    /// # Errors
    ///
    /// See [`SyncFile::get`].
    pub fn get_grant(&self, id: &str, sync_id: Option<&str>) -> CoreResult<Option<Grant>> {
        self.get(id, sync_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::StateError;
    use crate::schema::{GRANTS, RESOURCES};
    use syncvault_storage::MemoryStore;

    fn open() -> SyncFile {
        SyncFile::open_store(MemoryStore::new("records"), Config::default()).unwrap()
    }

    fn user(id: &str) -> Resource {
        Resource::new(ResourceId::new("user", id), id.to_uppercase())
    }

    #[test]
    fn upsert_sql_shape() {
        let sql = upsert_sql(&RESOURCES, false);
        assert!(sql.contains("ON CONFLICT (external_id, sync_id)"));
        assert!(sql.contains("resource_type_id = excluded.resource_type_id"));
        assert!(!sql.contains("WHERE"));
        assert!(upsert_sql(&GRANTS, true).ends_with("WHERE excluded.discovered_at > v1_grants.discovered_at"));
    }

    #[test]
    fn put_requires_sync() {
        let file = open();
        let err = file.put(&[user("a")]).unwrap_err();
        assert!(matches!(err, CoreError::State(StateError::NotSyncing)));
    }

    #[test]
    fn put_get_round_trip() {
        let file = open();
        file.start_sync().unwrap();
        let alice = user("alice");
        file.put(&[alice.clone()]).unwrap();

        let got = file.get_resource(&alice.id, None).unwrap();
        assert_eq!(got, Some(alice));
        assert_eq!(
            file.get_resource(&ResourceId::new("user", "nobody"), None).unwrap(),
            None
        );
    }

    #[test]
    fn upsert_keeps_one_row() {
        let file = open();
        file.start_sync().unwrap();
        let mut alice = user("alice");
        file.put(&[alice.clone()]).unwrap();
        alice.display_name = "Alice Liddell".into();
        file.put(&[alice.clone()]).unwrap();

        let page = file.list::<Resource>(&ListRequest::new()).unwrap();
        assert_eq!(page.items, vec![alice]);
    }

    #[test]
    fn list_filters_by_owner() {
        let file = open();
        file.start_sync().unwrap();
        let org = ResourceId::new("org", "acme");
        let repo = Resource::new(ResourceId::new("repo", "core"), "core").with_parent(org.clone());
        file.put(&[user("a"), repo.clone()]).unwrap();

        let owned = file
            .list::<Resource>(&ListRequest::new().filter(ListFilter::ByOwningResource(org)))
            .unwrap();
        assert_eq!(owned.items, vec![repo]);

        let users = file
            .list::<Resource>(&ListRequest::new().filter(ListFilter::ByResourceType("user".into())))
            .unwrap();
        assert_eq!(users.items.len(), 1);
    }

    #[test]
    fn unsupported_filter_is_rejected() {
        let file = open();
        file.start_sync().unwrap();
        let err = file
            .list::<ResourceType>(&ListRequest::new().filter(ListFilter::ByEntitlement("e".into())))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn empty_principal_type_list_matches_nothing() {
        let file = open();
        let page = file
            .list::<Grant>(&ListRequest::new().filter(ListFilter::ByPrincipalTypes(Vec::new())))
            .unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more());
    }

    #[test]
    fn bad_page_token_is_rejected() {
        let file = open();
        let err = file
            .list::<Resource>(&ListRequest::new().page_token("not-a-number"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn put_if_newer_replaces_older_row() {
        let file = open();
        file.start_sync().unwrap();
        let first = user("alice");
        file.put(&[first.clone()]).unwrap();

        let mut second = first.clone();
        second.display_name = "newer".into();
        file.put_if_newer(&[second.clone()]).unwrap();
        assert_eq!(file.get_resource(&first.id, None).unwrap(), Some(second));
    }

    #[test]
    fn put_if_newer_skips_when_stored_is_newer() {
        let file = open();
        let (sync_id, _) = file.start_sync().unwrap();
        let alice = user("alice");
        file.put(&[alice.clone()]).unwrap();
        file.conn()
            .unwrap()
            .execute(
                "UPDATE v1_resources SET discovered_at = ?1 WHERE sync_id = ?2",
                rusqlite::params![i64::MAX, sync_id],
            )
            .unwrap();

        let mut stale = alice.clone();
        stale.display_name = "stale".into();
        file.put_if_newer(&[stale]).unwrap();
        assert_eq!(file.get_resource(&alice.id, None).unwrap(), Some(alice));
    }
}
