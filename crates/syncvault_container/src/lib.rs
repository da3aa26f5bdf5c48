//! # SyncVault Container
//!
//! The on-disk envelope for SyncVault snapshot files.
//!
//! A container is a 5-byte magic header followed by a single zstd stream.
//! The decompressed payload is opaque to this crate (SyncVault stores a
//! complete SQLite database file in it).
//!
//! ```text
//! +-----------+---------------------------+
//! | "C1ZF\0"  | zstd stream ...           |
//! +-----------+---------------------------+
//! ```
//!
//! ## Decoding limits
//!
//! Decoding is bounded by two independent ceilings, see [`DecoderOptions`]:
//!
//! - the zstd window size (how much memory the decompressor may allocate),
//!   checked against the frame header before decompression starts
//! - the total number of decoded bytes, counted on every read
//!
//! The header is validated before any decompression work is done.
//!
//! ## Example
//!
//! ```rust
//! use syncvault_container::{decode_to, encode, DecoderOptions, EncoderOptions};
//!
//! let mut container = Vec::new();
//! encode(&b"payload"[..], &mut container, &EncoderOptions::default()).unwrap();
//!
//! let mut out = Vec::new();
//! decode_to(&container[..], &mut out, &DecoderOptions::default()).unwrap();
//! assert_eq!(out, b"payload");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod file;
mod header;
mod options;

pub use decoder::{decode, decode_to, decode_with, ContainerReader, Decompressor, ZstdDecompressor};
pub use encoder::encode;
pub use error::{ContainerError, ContainerResult};
pub use file::{decode_file, encode_file};
pub use header::{check_header, read_header, HEADER, HEADER_LEN};
pub use options::{
    CancellationToken, DecoderOptions, EncoderOptions, DEFAULT_MAX_DECODED_SIZE,
    DEFAULT_MAX_MEMORY, ENV_MAX_DECODED_SIZE_MB, ENV_MAX_MEMORY_MB,
};
