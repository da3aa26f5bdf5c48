//! Container store trait definition.

use crate::error::StorageResult;
use std::path::Path;

/// A place where a container file lives between uses.
///
/// Stores move whole container files in and out of a local working path.
/// They never look inside the bytes; decoding is done by the caller.
///
/// # Invariants
///
/// - `load_to` followed by `save_from` of the same file leaves the stored
///   bytes unchanged
/// - a failed `save_from` leaves the previously stored container intact
/// - Stores must be `Send + Sync` so handles can be shared across threads
///
/// # Implementors
///
/// - [`super::LocalFileStore`] - a container on the local file system
/// - [`super::MemoryStore`] - an in-process object store, for tests
pub trait ContainerStore: Send + Sync {
    /// Copies the stored container into `dest`.
    ///
    /// Returns `Ok(false)` when nothing has been stored yet, in which case
    /// `dest` is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails or is incomplete.
    fn load_to(&self, dest: &Path) -> StorageResult<bool>;

    /// Replaces the stored container with the contents of `src`.
    ///
    /// Returns the number of bytes stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails or is incomplete.
    fn save_from(&self, src: &Path) -> StorageResult<u64>;

    /// Describes where the container lives, for logs.
    fn location(&self) -> String;
}
