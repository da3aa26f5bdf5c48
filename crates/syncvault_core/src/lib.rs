//! # SyncVault Core
//!
//! Versioned record store over a single portable snapshot file.
//!
//! Every write belongs to a *sync run* (a generation). Readers see one
//! generation at a time: an explicitly requested one, the one being
//! written, a pinned view, or by default the latest finished full sync.
//! Old generations can be diffed, cloned into their own file, compacted
//! together, and pruned.
//!
//! This crate provides:
//! - [`SyncFile`], the handle that materializes a container into a working
//!   database and saves it back on close
//! - the sync run state machine ([`SyncState`]) and ledger
//! - typed record storage with row-id pagination ([`Record`], [`ListRequest`])
//! - diff, clone and compaction of generations
//! - session key/value and binary asset stores
//!
//! ## Example
//!
//! ```rust
//! use syncvault_core::{Config, ListRequest, Resource, ResourceId, SyncFile};
//! use syncvault_storage::MemoryStore;
//!
//! let file = SyncFile::open_store(MemoryStore::new("demo"), Config::default()).unwrap();
//! let (sync_id, is_new) = file.start_sync().unwrap();
//! assert!(is_new);
//!
//! file.put(&[Resource::new(ResourceId::new("user", "alice"), "Alice")]).unwrap();
//! file.end_sync().unwrap();
//!
//! let page = file.list::<Resource>(&ListRequest::new()).unwrap();
//! assert_eq!(page.items.len(), 1);
//! assert_eq!(file.latest_finished_sync_id(None).unwrap(), Some(sync_id));
//! assert!(file.close().unwrap().saved);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod assets;
mod clone;
mod compact;
mod config;
mod diff;
mod error;
mod file;
mod model;
mod record;
mod records;
mod retention;
pub mod schema;
mod session;
mod state;
mod stats;
mod sync_runs;
mod types;

pub use assets::Asset;
pub use compact::AttachedFile;
pub use config::{
    Config, DEFAULT_KEEP_SYNC_COUNT, DEFAULT_MAX_PAGE_SIZE, DEFAULT_SESSION_SIZE_BUDGET,
    ENV_KEEP_SYNC_COUNT, ENV_SKIP_CLEANUP,
};
pub use error::{CoreError, CoreResult, StateError};
pub use file::SyncFile;
pub use model::{
    Annotations, Entitlement, Grant, Purpose, Resource, ResourceId, ResourceTrait, ResourceType,
};
pub use record::{ListFilter, ListRequest, Record};
pub use schema::TableDescriptor;
pub use session::{SessionBatch, SessionPage, SessionScope, SessionStore};
pub use state::SyncState;
pub use stats::SyncStats;
pub use types::{new_sync_id, CloseOutcome, Clock, Page, SyncRun, SyncType, Timestamp};
