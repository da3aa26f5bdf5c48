//! Binary asset blobs keyed by asset id.

use crate::error::{CoreError, CoreResult};
use crate::file::SyncFile;
use crate::schema::ASSETS;
use rusqlite::{params, OptionalExtension};
use std::io::Cursor;
use tracing::{debug, trace};

const UNKNOWN_CONTENT_TYPE: &str = "unknown";

/// An asset read back from a generation.
#[derive(Debug)]
pub struct Asset {
    /// MIME type recorded with the asset.
    pub content_type: String,
    /// Asset bytes.
    pub reader: Cursor<Vec<u8>>,
}

impl SyncFile {
    /// Stores an asset in the active sync.
    ///
    /// Empty payloads are skipped. An empty content type is stored as
    /// `unknown`.
    ///
    /// # Errors
    ///
    /// Returns `NotSyncing` if no sync is active.
    pub fn put_asset(&self, asset_id: &str, content_type: &str, data: &[u8]) -> CoreResult<()> {
        let state = self.state.read();
        let sync_id = state.require_syncing()?;
        if asset_id.is_empty() {
            return Err(CoreError::invalid_argument("asset id is required"));
        }
        if data.is_empty() {
            debug!(asset_id, "skipping empty asset");
            return Ok(());
        }
        let content_type = if content_type.is_empty() {
            UNKNOWN_CONTENT_TYPE
        } else {
            content_type
        };

        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {t} (external_id, content_type, data, sync_id, discovered_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (external_id, sync_id) DO UPDATE SET \
                 content_type = excluded.content_type, data = excluded.data, \
                 discovered_at = excluded.discovered_at",
                t = ASSETS.name
            ),
            params![asset_id, content_type, data, sync_id, self.clock.now().0],
        )
        .map_err(CoreError::persistence("put", ASSETS.name, Some(asset_id)))?;
        self.mark_mutated();
        trace!(asset_id, bytes = data.len(), "stored asset");
        Ok(())
    }

    /// Reads an asset from the resolved generation.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the lookup fails.
    pub fn get_asset(&self, asset_id: &str, sync_id: Option<&str>) -> CoreResult<Option<Asset>> {
        let state = self.state_snapshot();
        let conn = self.conn()?;
        let resolved = self.resolve_sync_id(&conn, &state, sync_id)?;

        let row = match resolved {
            Some(sync_id) => conn
                .query_row(
                    &format!(
                        "SELECT content_type, data FROM {} WHERE external_id = ?1 AND sync_id = ?2",
                        ASSETS.name
                    ),
                    params![asset_id, sync_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional(),
            None => conn
                .query_row(
                    &format!(
                        "SELECT content_type, data FROM {} WHERE external_id = ?1 \
                         ORDER BY id DESC LIMIT 1",
                        ASSETS.name
                    ),
                    params![asset_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional(),
        }
        .map_err(CoreError::persistence("get", ASSETS.name, Some(asset_id)))?;

        Ok(row.map(|(content_type, data)| Asset {
            content_type,
            reader: Cursor::new(data),
        }))
    }
}
