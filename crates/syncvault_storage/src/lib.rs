//! # SyncVault Storage
//!
//! Where container files live between uses.
//!
//! A [`ContainerStore`] moves whole container files between their resting
//! place and a local working path. Stores are **opaque byte movers**: they
//! do not decode containers or know about the database inside.
//!
//! ## Available Stores
//!
//! - [`LocalFileStore`] - a file on the local file system
//! - [`MemoryStore`] - an in-process object map, for tests
//!
//! ## Example
//!
//! ```rust
//! use syncvault_storage::{ContainerStore, MemoryStore};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let src = dir.path().join("snapshot.c1z");
//! std::fs::write(&src, b"C1ZF\0...").unwrap();
//!
//! let store = MemoryStore::new("snapshot.c1z");
//! store.save_from(&src).unwrap();
//! assert!(store.load_to(&dir.path().join("copy.c1z")).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::LocalFileStore;
pub use memory::{MemoryStore, Objects};
pub use store::ContainerStore;
