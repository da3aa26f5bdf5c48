//! Table registry.
//!
//! Every table SyncVault stores is declared here as a static
//! [`TableDescriptor`]. Physical names carry a version prefix
//! (`v1_resources`); a breaking schema change bumps the version and
//! creates a new table next to the old one instead of migrating it.
//!
//! Creation is idempotent (`IF NOT EXISTS` everywhere) and runs on every
//! open. Columns added after a table first shipped are listed as
//! migrations and added with `ALTER TABLE` when missing.

use crate::error::CoreResult;
use rusqlite::Connection;

/// Role of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Sync-scoped records keyed by `(external_id, sync_id)`.
    Object,
    /// The sync run ledger.
    SyncRuns,
    /// The session key/value area keyed by `(sync_id, key)`.
    Session,
}

/// A column declaration.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Type and constraints.
    pub ddl: &'static str,
}

/// An index declaration.
#[derive(Debug, Clone, Copy)]
pub struct Index {
    /// Index name suffix; the full name is `idx_<table>_<suffix>`.
    pub suffix: &'static str,
    /// Indexed columns.
    pub columns: &'static [&'static str],
    /// Whether the index is unique.
    pub unique: bool,
}

/// A declared table.
#[derive(Debug)]
pub struct TableDescriptor {
    /// Physical name, `v{version}_{base}`.
    pub name: &'static str,
    /// Logical name.
    pub base: &'static str,
    /// Schema version.
    pub version: u32,
    /// Role of the table.
    pub kind: TableKind,
    /// Every column except the `id` row id.
    pub columns: &'static [Column],
    /// Denormalized filter columns.
    pub filter_columns: &'static [&'static str],
    /// Indexes.
    pub indexes: &'static [Index],
    /// Columns added after the first release, applied when missing.
    pub migrations: &'static [Column],
}

const fn col(name: &'static str, ddl: &'static str) -> Column {
    Column { name, ddl }
}

const OBJECT_KEY: Index = Index {
    suffix: "external_sync",
    columns: &["external_id", "sync_id"],
    unique: true,
};

const BY_SYNC: Index = Index {
    suffix: "sync",
    columns: &["sync_id"],
    unique: false,
};

/// Resource types.
pub static RESOURCE_TYPES: TableDescriptor = TableDescriptor {
    name: "v1_resource_types",
    base: "resource_types",
    version: 1,
    kind: TableKind::Object,
    columns: &[
        col("external_id", "TEXT NOT NULL"),
        col("data", "BLOB NOT NULL"),
        col("sync_id", "TEXT NOT NULL"),
        col("discovered_at", "INTEGER NOT NULL"),
    ],
    filter_columns: &[],
    indexes: &[OBJECT_KEY, BY_SYNC],
    migrations: &[],
};

/// Resources.
pub static RESOURCES: TableDescriptor = TableDescriptor {
    name: "v1_resources",
    base: "resources",
    version: 1,
    kind: TableKind::Object,
    columns: &[
        col("external_id", "TEXT NOT NULL"),
        col("resource_type_id", "TEXT NOT NULL"),
        col("parent_resource_type_id", "TEXT"),
        col("parent_resource_id", "TEXT"),
        col("data", "BLOB NOT NULL"),
        col("sync_id", "TEXT NOT NULL"),
        col("discovered_at", "INTEGER NOT NULL"),
    ],
    filter_columns: &[
        "resource_type_id",
        "parent_resource_type_id",
        "parent_resource_id",
    ],
    indexes: &[
        OBJECT_KEY,
        BY_SYNC,
        Index {
            suffix: "type_sync",
            columns: &["resource_type_id", "sync_id"],
            unique: false,
        },
        Index {
            suffix: "parent_sync",
            columns: &["parent_resource_type_id", "parent_resource_id", "sync_id"],
            unique: false,
        },
    ],
    migrations: &[],
};

/// Entitlements.
pub static ENTITLEMENTS: TableDescriptor = TableDescriptor {
    name: "v1_entitlements",
    base: "entitlements",
    version: 1,
    kind: TableKind::Object,
    columns: &[
        col("external_id", "TEXT NOT NULL"),
        col("resource_type_id", "TEXT NOT NULL"),
        col("resource_id", "TEXT NOT NULL"),
        col("data", "BLOB NOT NULL"),
        col("sync_id", "TEXT NOT NULL"),
        col("discovered_at", "INTEGER NOT NULL"),
    ],
    filter_columns: &["resource_type_id", "resource_id"],
    indexes: &[
        OBJECT_KEY,
        BY_SYNC,
        Index {
            suffix: "resource_sync",
            columns: &["resource_type_id", "resource_id", "sync_id"],
            unique: false,
        },
    ],
    migrations: &[],
};

/// Grants.
pub static GRANTS: TableDescriptor = TableDescriptor {
    name: "v1_grants",
    base: "grants",
    version: 1,
    kind: TableKind::Object,
    columns: &[
        col("external_id", "TEXT NOT NULL"),
        col("resource_type_id", "TEXT NOT NULL"),
        col("resource_id", "TEXT NOT NULL"),
        col("entitlement_id", "TEXT NOT NULL"),
        col("principal_resource_type_id", "TEXT NOT NULL"),
        col("principal_resource_id", "TEXT NOT NULL"),
        col("data", "BLOB NOT NULL"),
        col("sync_id", "TEXT NOT NULL"),
        col("discovered_at", "INTEGER NOT NULL"),
    ],
    filter_columns: &[
        "resource_type_id",
        "resource_id",
        "entitlement_id",
        "principal_resource_type_id",
        "principal_resource_id",
    ],
    indexes: &[
        OBJECT_KEY,
        BY_SYNC,
        Index {
            suffix: "resource_sync",
            columns: &["resource_type_id", "resource_id", "sync_id"],
            unique: false,
        },
        Index {
            suffix: "principal_sync",
            columns: &["principal_resource_type_id", "principal_resource_id", "sync_id"],
            unique: false,
        },
        Index {
            suffix: "entitlement_sync",
            columns: &["entitlement_id", "sync_id"],
            unique: false,
        },
    ],
    migrations: &[],
};

/// Binary assets.
pub static ASSETS: TableDescriptor = TableDescriptor {
    name: "v1_assets",
    base: "assets",
    version: 1,
    kind: TableKind::Object,
    columns: &[
        col("external_id", "TEXT NOT NULL"),
        col("content_type", "TEXT NOT NULL"),
        col("data", "BLOB NOT NULL"),
        col("sync_id", "TEXT NOT NULL"),
        col("discovered_at", "INTEGER NOT NULL"),
    ],
    filter_columns: &["content_type"],
    indexes: &[OBJECT_KEY, BY_SYNC],
    migrations: &[],
};

/// Sync run ledger.
pub static SYNC_RUNS: TableDescriptor = TableDescriptor {
    name: "v1_sync_runs",
    base: "sync_runs",
    version: 1,
    kind: TableKind::SyncRuns,
    columns: &[
        col("sync_id", "TEXT NOT NULL"),
        col("started_at", "INTEGER NOT NULL"),
        col("ended_at", "INTEGER"),
        col("sync_token", "TEXT NOT NULL DEFAULT ''"),
    ],
    filter_columns: &[],
    indexes: &[Index {
        suffix: "sync_id",
        columns: &["sync_id"],
        unique: true,
    }],
    migrations: &[
        col("sync_type", "TEXT NOT NULL DEFAULT 'full'"),
        col("parent_sync_id", "TEXT NOT NULL DEFAULT ''"),
    ],
};

/// Session key/value store.
pub static SESSIONS: TableDescriptor = TableDescriptor {
    name: "v1_connector_sessions",
    base: "connector_sessions",
    version: 1,
    kind: TableKind::Session,
    columns: &[
        col("sync_id", "TEXT NOT NULL"),
        col("key", "TEXT NOT NULL"),
        col("value", "BLOB NOT NULL"),
    ],
    filter_columns: &[],
    indexes: &[Index {
        suffix: "sync_key",
        columns: &["sync_id", "key"],
        unique: true,
    }],
    migrations: &[],
};

/// Every declared table, in creation order.
pub static ALL_TABLES: [&TableDescriptor; 7] = [
    &RESOURCE_TYPES,
    &RESOURCES,
    &ENTITLEMENTS,
    &GRANTS,
    &SYNC_RUNS,
    &ASSETS,
    &SESSIONS,
];

/// Returns the object tables (the ones diffed and compacted).
pub fn object_tables() -> impl Iterator<Item = &'static TableDescriptor> {
    ALL_TABLES
        .iter()
        .copied()
        .filter(|t| t.kind == TableKind::Object)
}

/// Looks up a table by physical or logical name.
#[must_use]
pub fn table_by_name(name: &str) -> Option<&'static TableDescriptor> {
    ALL_TABLES
        .iter()
        .copied()
        .find(|t| t.name == name || t.base == name)
}

impl TableDescriptor {
    /// Returns the `CREATE TABLE` and `CREATE INDEX` statements.
    #[must_use]
    pub fn create_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n    id INTEGER PRIMARY KEY", self.name);
        for c in self.columns.iter().chain(self.migrations) {
            sql.push_str(&format!(",\n    {} {}", c.name, c.ddl));
        }
        sql.push_str("\n);\n");
        for index in self.indexes {
            sql.push_str(&format!(
                "CREATE {}INDEX IF NOT EXISTS idx_{}_{} ON {} ({});\n",
                if index.unique { "UNIQUE " } else { "" },
                self.name,
                index.suffix,
                self.name,
                index.columns.join(", ")
            ));
        }
        sql
    }

    /// Returns every column name except `id`, in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .chain(self.migrations)
            .map(|c| c.name)
            .collect()
    }

    /// Returns true if `column` is one of this table's filter columns.
    #[must_use]
    pub fn has_filter(&self, column: &str) -> bool {
        self.filter_columns.contains(&column)
    }

    /// Creates the table and indexes, then adds any missing migrated columns.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub fn ensure(&self, conn: &Connection) -> CoreResult<()> {
        conn.execute_batch(&self.create_sql())?;

        for column in self.migrations {
            let exists: i64 = conn.query_row(
                &format!(
                    "SELECT count(*) FROM pragma_table_info('{}') WHERE name = ?1",
                    self.name
                ),
                [column.name],
                |row| row.get(0),
            )?;
            if exists == 0 {
                tracing::info!(table = self.name, column = column.name, "adding missing column");
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    self.name, column.name, column.ddl
                ))?;
            }
        }
        Ok(())
    }
}

/// Creates every declared table.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn init_tables(conn: &Connection) -> CoreResult<()> {
    for table in ALL_TABLES {
        table.ensure(conn)?;
    }
    Ok(())
}
