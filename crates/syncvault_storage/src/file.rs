//! Local file system container store.

use crate::error::{StorageError, StorageResult};
use crate::store::ContainerStore;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A container stored as a single file on the local file system.
///
/// # Durability
///
/// Saves are written to a temporary file in the same directory, checked
/// against the source size, synced with `sync_all`, and then renamed over
/// the target. A crash mid-save never leaves a truncated container behind.
///
/// # Example
///
/// ```no_run
/// use syncvault_storage::{ContainerStore, LocalFileStore};
/// use std::path::Path;
///
/// let store = LocalFileStore::new("snapshots/latest.c1z");
/// if store.load_to(Path::new("/tmp/work.c1z")).unwrap() {
///     println!("loaded from {}", store.location());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    path: PathBuf,
}

impl LocalFileStore {
    /// Creates a store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path of the stored container.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContainerStore for LocalFileStore {
    fn load_to(&self, dest: &Path) -> StorageResult<bool> {
        let expected = match fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                return Err(StorageError::InvalidLocation(format!(
                    "{} is not a file",
                    self.path.display()
                )))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        copy_synced(&self.path, dest, expected)?;
        tracing::debug!(src = %self.path.display(), dest = %dest.display(), bytes = expected, "loaded container");
        Ok(true)
    }

    fn save_from(&self, src: &Path) -> StorageResult<u64> {
        let expected = fs::metadata(src)?.len();
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let tmp = NamedTempFile::new_in(&parent)?;
        copy_synced(src, tmp.path(), expected)?;
        tmp.persist(&self.path).map_err(|err| StorageError::Io(err.error))?;

        tracing::debug!(dest = %self.path.display(), bytes = expected, "saved container");
        Ok(expected)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Copies `src` to `dest`, verifies the byte count and syncs `dest`.
fn copy_synced(src: &Path, dest: &Path, expected: u64) -> StorageResult<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create(dest)?);
    let actual = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;

    if actual != expected {
        return Err(StorageError::SizeMismatch { expected, actual });
    }

    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    Ok(())
}
