//! Bounded container decoding.

use crate::error::{ContainerError, ContainerResult};
use crate::header::read_header;
use crate::options::{CancellationToken, DecoderOptions};
use std::io::{self, Cursor, Read, Write};

/// zstd frame magic number (little endian on the wire).
const ZSTD_MAGIC: u32 = 0xFD2F_B528;

/// Longest possible zstd frame header: magic, descriptor, window byte,
/// 4-byte dictionary id and 8-byte content size.
const MAX_FRAME_HEADER: usize = 18;

/// A streaming decompressor sitting behind the container header.
///
/// The container only hands the compressed body to the decompressor once
/// the header and the frame window size have been accepted.
pub trait Decompressor {
    /// Wraps `input` in a decompressing reader.
    ///
    /// `window_log_max` is the largest window (as a power of two) the
    /// decompressor may allocate.
    ///
    /// # Errors
    ///
    /// Returns an error if the decompressor cannot be initialized.
    fn decompress<'a>(
        &self,
        input: Box<dyn Read + 'a>,
        window_log_max: u32,
    ) -> io::Result<Box<dyn Read + 'a>>;
}

/// The zstd streaming decompressor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdDecompressor;

impl Decompressor for ZstdDecompressor {
    fn decompress<'a>(
        &self,
        input: Box<dyn Read + 'a>,
        window_log_max: u32,
    ) -> io::Result<Box<dyn Read + 'a>> {
        let mut decoder = zstd::stream::read::Decoder::new(input)?;
        decoder.window_log_max(window_log_max)?;
        Ok(Box::new(decoder))
    }
}

/// A reader yielding the decoded payload of a container.
///
/// Every read checks the cancellation token and the decoded-size ceiling.
/// The reader never hands out bytes past the ceiling: the read that would
/// cross it fails with `MaxDecodedSizeExceeded` instead.
pub struct ContainerReader<'a> {
    inner: Box<dyn Read + 'a>,
    decoded: u64,
    max_decoded_size: u64,
    max_memory: u64,
    cancellation: Option<CancellationToken>,
}

impl ContainerReader<'_> {
    /// Returns the number of decoded bytes handed out so far.
    #[must_use]
    pub fn decoded_bytes(&self) -> u64 {
        self.decoded
    }
}

impl std::fmt::Debug for ContainerReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerReader")
            .field("decoded", &self.decoded)
            .field("max_decoded_size", &self.max_decoded_size)
            .finish_non_exhaustive()
    }
}

impl Read for ContainerReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(ContainerError::Cancelled.into_io());
        }
        if self.decoded > self.max_decoded_size {
            return Err(self.size_exceeded());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        // One byte past the ceiling is enough to detect an overflow.
        let allowed = (self.max_decoded_size - self.decoded).saturating_add(1);
        let len = buf.len().min(usize::try_from(allowed).unwrap_or(usize::MAX));

        let n = self.inner.read(&mut buf[..len]).map_err(|err| {
            if err.to_string().contains("too much memory") {
                ContainerError::WindowSizeExceeded {
                    window: None,
                    limit: self.max_memory,
                }
                .into_io()
            } else {
                err
            }
        })?;

        self.decoded += n as u64;
        if self.decoded > self.max_decoded_size {
            return Err(self.size_exceeded());
        }
        Ok(n)
    }
}

impl ContainerReader<'_> {
    fn size_exceeded(&self) -> io::Error {
        tracing::warn!(
            limit = self.max_decoded_size,
            "container decode exceeded max decoded size"
        );
        ContainerError::MaxDecodedSizeExceeded {
            limit: self.max_decoded_size,
        }
        .into_io()
    }
}

/// Validates the header of `reader` and returns a bounded decoding reader.
///
/// # Errors
///
/// - `InvalidHeader` if the stream is not a container
/// - `WindowSizeExceeded` if the first frame needs more memory than allowed
/// - `InvalidOption` if the options are out of range
/// - `Cancelled` if the token was already cancelled
pub fn decode<'a, R: Read + 'a>(
    reader: R,
    options: &DecoderOptions,
) -> ContainerResult<ContainerReader<'a>> {
    decode_with(reader, options, &ZstdDecompressor)
}

/// Like [`decode`], with an explicit decompressor.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_with<'a, R: Read + 'a, D: Decompressor + ?Sized>(
    mut reader: R,
    options: &DecoderOptions,
    decompressor: &D,
) -> ContainerResult<ContainerReader<'a>> {
    options.validate()?;
    if options.is_cancelled() {
        return Err(ContainerError::Cancelled);
    }

    read_header(&mut reader)?;

    let mut prefix = vec![0u8; MAX_FRAME_HEADER];
    let filled = fill(&mut reader, &mut prefix)?;
    prefix.truncate(filled);

    if let Some(window) = frame_window_size(&prefix) {
        if window > options.max_memory {
            tracing::warn!(
                window,
                limit = options.max_memory,
                "container frame window exceeds max memory"
            );
            return Err(ContainerError::WindowSizeExceeded {
                window: Some(window),
                limit: options.max_memory,
            });
        }
    }

    let body: Box<dyn Read + 'a> = Box::new(Cursor::new(prefix).chain(reader));
    let inner = decompressor.decompress(body, options.window_log_max())?;

    Ok(ContainerReader {
        inner,
        decoded: 0,
        max_decoded_size: options.max_decoded_size,
        max_memory: options.max_memory,
        cancellation: options.cancellation.clone(),
    })
}

/// Decodes a whole container from `reader` into `writer`.
///
/// Returns the number of decoded bytes written.
///
/// # Errors
///
/// See [`decode`]; additionally returns `MaxDecodedSizeExceeded` once the
/// payload passes the ceiling, and I/O errors from either side.
pub fn decode_to<R: Read, W: Write + ?Sized>(
    mut reader: R,
    writer: &mut W,
    options: &DecoderOptions,
) -> ContainerResult<u64> {
    let mut decoded = decode(&mut reader, options)?;
    let written = io::copy(&mut decoded, writer)?;
    tracing::debug!(bytes = written, "decoded container");
    Ok(written)
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Returns the window size declared by a zstd frame header, if `prefix`
/// starts with one.
fn frame_window_size(prefix: &[u8]) -> Option<u64> {
    let magic = u32::from_le_bytes(prefix.get(0..4)?.try_into().ok()?);
    if magic != ZSTD_MAGIC {
        return None;
    }
    let descriptor = *prefix.get(4)?;
    let single_segment = descriptor & 0x20 != 0;

    if !single_segment {
        let window = *prefix.get(5)?;
        let exponent = u32::from(window >> 3);
        let mantissa = u64::from(window & 0x07);
        let base = 1u64 << (10 + exponent);
        return Some(base + (base / 8) * mantissa);
    }

    // Single segment frames use the content size as the window.
    let dict_len = match descriptor & 0x03 {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 4,
    };
    let fcs_len = match descriptor >> 6 {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => 8,
    };
    let start = 5 + dict_len;
    let bytes = prefix.get(start..start + fcs_len)?;
    let mut size = bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)));
    if fcs_len == 2 {
        size += 256;
    }
    Some(size)
}
