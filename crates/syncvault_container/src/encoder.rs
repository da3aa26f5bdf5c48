//! Container encoding.

use crate::error::ContainerResult;
use crate::header::HEADER;
use crate::options::EncoderOptions;
use std::io::{self, Read, Write};

/// Writes the container header followed by the zstd-compressed contents of
/// `reader` into `writer`.
///
/// Returns the number of uncompressed bytes consumed. The writer is flushed
/// but not synced; callers writing to files sync themselves.
///
/// # Errors
///
/// Returns an error if reading, compressing, or writing fails.
pub fn encode<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    options: &EncoderOptions,
) -> ContainerResult<u64> {
    writer.write_all(&HEADER)?;

    let mut encoder = zstd::stream::write::Encoder::new(&mut writer, options.level)?;
    let consumed = io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    writer.flush()?;

    tracing::debug!(bytes = consumed, level = options.level, "encoded container");
    Ok(consumed)
}
