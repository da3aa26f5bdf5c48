//! File-to-file helpers used when opening and saving snapshot files.

use crate::decoder::decode_to;
use crate::encoder::encode;
use crate::error::{ContainerError, ContainerResult};
use crate::options::{DecoderOptions, EncoderOptions};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Materializes the payload of `container` at `output`.
///
/// A missing or zero-length container produces an empty `output` file.
/// The output is synced to disk before returning. Returns the number of
/// decoded bytes.
///
/// # Errors
///
/// Returns container format, limit, or I/O errors.
pub fn decode_file(
    container: &Path,
    output: &Path,
    options: &DecoderOptions,
) -> ContainerResult<u64> {
    let out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)?;

    let len = match fs::metadata(container) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
        Err(err) => return Err(ContainerError::Io(err)),
    };

    if len == 0 {
        tracing::debug!(path = %container.display(), "container empty or missing, starting fresh");
        out.sync_all()?;
        return Ok(0);
    }

    let input = BufReader::new(File::open(container)?);
    let mut writer = BufWriter::new(out);
    let written = decode_to(input, &mut writer, options)?;
    let out = writer.into_inner().map_err(|err| err.into_error())?;
    out.sync_all()?;

    tracing::debug!(
        path = %container.display(),
        bytes = written,
        "materialized container payload"
    );
    Ok(written)
}

/// Writes `payload` into a new container at `container`, replacing any
/// existing file, and syncs it.
///
/// # Errors
///
/// Returns I/O or compression errors.
pub fn encode_file(
    payload: &Path,
    container: &Path,
    options: &EncoderOptions,
) -> ContainerResult<u64> {
    let input = BufReader::new(File::open(payload)?);
    let out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(container)?;

    let mut writer = BufWriter::new(out);
    let consumed = encode(input, &mut writer, options)?;
    let out = writer.into_inner().map_err(|err| err.into_error())?;
    out.sync_all()?;

    tracing::debug!(path = %container.display(), bytes = consumed, "saved container");
    Ok(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_round_trip() {
        let dir = tempdir().unwrap();
        let payload = dir.path().join("db");
        let container = dir.path().join("snap.c1z");
        let restored = dir.path().join("restored");

        fs::write(&payload, b"some database bytes".repeat(50)).unwrap();
        encode_file(&payload, &container, &EncoderOptions::default()).unwrap();
        let n = decode_file(&container, &restored, &DecoderOptions::default()).unwrap();

        assert_eq!(n, 19 * 50);
        assert_eq!(fs::read(&payload).unwrap(), fs::read(&restored).unwrap());
    }

    #[test]
    fn missing_container_yields_empty_output() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("db");
        let n = decode_file(
            &dir.path().join("absent.c1z"),
            &out,
            &DecoderOptions::default(),
        )
        .unwrap();
        assert_eq!(n, 0);
        assert_eq!(fs::metadata(&out).unwrap().len(), 0);
    }

    #[test]
    fn garbage_container_is_rejected() {
        let dir = tempdir().unwrap();
        let container = dir.path().join("bad.c1z");
        fs::write(&container, b"definitely not a container").unwrap();
        let err = decode_file(&container, &dir.path().join("db"), &DecoderOptions::default())
            .unwrap_err();
        assert!(matches!(err, ContainerError::InvalidHeader));
    }
}
