//! Error types for SyncVault core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Sync run state violations.
///
/// These are caller-usage errors: they are reported immediately and never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A write or end was attempted with no sync in progress.
    #[error("sync is not active")]
    NotSyncing,

    /// A view was requested while a sync is in progress.
    #[error("cannot set view while sync {0} is running")]
    SyncActive(String),

    /// A different sync is already the write target.
    #[error("current sync is {current}, cannot resume {requested}")]
    ResumeMismatch {
        /// The sync currently being written.
        current: String,
        /// The sync the caller asked for.
        requested: String,
    },

    /// The sync has already ended.
    #[error("sync {0} has already ended")]
    AlreadyEnded(String),

    /// The active sync cannot be removed.
    #[error("unable to delete the current active sync run {0}")]
    DeleteActive(String),

    /// Maintenance was requested while a sync is being written.
    #[error("sync {0} is in progress")]
    SyncInProgress(String),
}

/// Errors that can occur in SyncVault core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Container format or decode limit error.
    #[error("container error: {0}")]
    Container(#[from] syncvault_container::ContainerError),

    /// Payload serialization error.
    #[error("codec error: {0}")]
    Codec(#[from] syncvault_codec::CodecError),

    /// Container store error.
    #[error("storage error: {0}")]
    Storage(#[from] syncvault_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// SQLite error outside of a record operation.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Sync run state violation.
    #[error("invalid sync state: {0}")]
    State(#[from] StateError),

    /// SQLite error during a record operation, with context.
    #[error("{op} failed on {table} (external id {key:?}): {source}")]
    Persistence {
        /// Operation being performed.
        op: &'static str,
        /// Physical table name.
        table: &'static str,
        /// External id involved, if any.
        key: Option<String>,
        /// Underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// The requested sync run does not exist.
    #[error("sync not found: {sync_id}")]
    SyncNotFound {
        /// The missing sync id.
        sync_id: String,
    },

    /// The requested sync run has not finished yet.
    #[error("sync {sync_id} has not finished")]
    SyncNotFinished {
        /// The unfinished sync id.
        sync_id: String,
    },

    /// The handle was opened read-only but was mutated.
    #[error("read only mode: changes cannot be saved")]
    ReadOnly,

    /// The handle has been closed.
    #[error("file is closed")]
    Closed,

    /// Another handle holds the container lock.
    #[error("container locked: another handle has exclusive access to {path}")]
    Locked {
        /// Path of the locked container.
        path: String,
    },

    /// A clone target already exists.
    #[error("destination already exists: {path}")]
    DestinationExists {
        /// The existing path.
        path: String,
    },

    /// An attached file was used after detaching.
    #[error("database has been detached")]
    Detached,

    /// An argument is malformed or out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a sync not found error.
    pub fn sync_not_found(sync_id: impl Into<String>) -> Self {
        Self::SyncNotFound {
            sync_id: sync_id.into(),
        }
    }

    /// Returns a closure wrapping a SQLite error with operation context.
    pub(crate) fn persistence<'k>(
        op: &'static str,
        table: &'static str,
        key: Option<&'k str>,
    ) -> impl FnOnce(rusqlite::Error) -> Self + 'k {
        move |source| Self::Persistence {
            op,
            table,
            key: key.map(str::to_string),
            source,
        }
    }

    /// Returns true for state errors.
    #[must_use]
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_error_names_table_and_key() {
        let wrap = CoreError::persistence("put", "v1_resources", Some("user:alice"));
        let err = wrap(rusqlite::Error::QueryReturnedNoRows);
        let msg = err.to_string();
        assert!(msg.contains("put"));
        assert!(msg.contains("v1_resources"));
        assert!(msg.contains("user:alice"));
    }

    #[test]
    fn state_errors_convert() {
        let err: CoreError = StateError::NotSyncing.into();
        assert!(err.is_state());
        assert_eq!(err.to_string(), "invalid sync state: sync is not active");
    }
}
