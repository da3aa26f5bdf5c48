//! Encoder and decoder options.

use crate::error::{ContainerError, ContainerResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default ceiling on total decoded bytes (2 GiB).
pub const DEFAULT_MAX_DECODED_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Default ceiling on decompressor window memory (32 MiB).
pub const DEFAULT_MAX_MEMORY: u64 = 32 * 1024 * 1024;

/// Environment variable overriding the decoded-size ceiling, in MiB.
pub const ENV_MAX_DECODED_SIZE_MB: &str = "SYNCVAULT_DECODER_MAX_DECODED_SIZE_MB";

/// Environment variable overriding the memory ceiling, in MiB.
pub const ENV_MAX_MEMORY_MB: &str = "SYNCVAULT_DECODER_MAX_MEMORY_MB";

const MIB: u64 = 1024 * 1024;
const MAX_LIMIT: u64 = 1 << 63;

/// Shared flag used to abort a decode in progress.
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Subsequent reads fail with `Cancelled`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Limits applied while decoding a container.
///
/// Both limits are in bytes. The defaults pick up the
/// `SYNCVAULT_DECODER_*` overrides, so builder calls made after
/// construction take precedence over the environment.
/// [`DecoderOptions::apply_env`] re-applies the environment on top of
/// values set in code.
#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Maximum number of decoded bytes.
    pub max_decoded_size: u64,
    /// Maximum window size the decompressor may use.
    pub max_memory: u64,
    /// Optional cancellation flag checked on every read.
    pub cancellation: Option<CancellationToken>,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            max_decoded_size: DEFAULT_MAX_DECODED_SIZE,
            max_memory: DEFAULT_MAX_MEMORY,
            cancellation: None,
        }
        .apply_env()
    }
}

impl DecoderOptions {
    /// Creates options with default limits and environment overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the decoded-size ceiling in bytes.
    #[must_use]
    pub const fn with_max_decoded_size(mut self, bytes: u64) -> Self {
        self.max_decoded_size = bytes;
        self
    }

    /// Sets the memory ceiling in bytes.
    #[must_use]
    pub const fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Overrides limits from the environment.
    ///
    /// Values are read in MiB. Missing or unparsable variables leave the
    /// current value untouched.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Some(mb) = env_mib(ENV_MAX_DECODED_SIZE_MB) {
            self.max_decoded_size = mb.saturating_mul(MIB);
        }
        if let Some(mb) = env_mib(ENV_MAX_MEMORY_MB) {
            self.max_memory = mb.saturating_mul(MIB);
        }
        self
    }

    /// Checks that both limits are in range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` if a limit is zero or larger than `1 << 63`.
    pub fn validate(&self) -> ContainerResult<()> {
        check_limit("max decoded size", self.max_decoded_size)?;
        check_limit("max memory", self.max_memory)?;
        Ok(())
    }

    /// Returns true if the attached token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Returns the zstd `window_log_max` matching the memory ceiling.
    ///
    /// Rounds up to the next power of two; the frame header check enforces
    /// the exact limit.
    #[must_use]
    pub(crate) fn window_log_max(&self) -> u32 {
        let log = 64 - self.max_memory.saturating_sub(1).leading_zeros();
        log.clamp(10, 31)
    }
}

/// Options used when writing a container.
#[derive(Debug, Clone, Copy)]
pub struct EncoderOptions {
    /// zstd compression level.
    pub level: i32,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl EncoderOptions {
    /// Sets the compression level.
    #[must_use]
    pub const fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }
}

fn check_limit(name: &str, value: u64) -> ContainerResult<()> {
    if value == 0 {
        return Err(ContainerError::invalid_option(format!(
            "{name} must be at least 1 byte"
        )));
    }
    if value > MAX_LIMIT {
        return Err(ContainerError::invalid_option(format!(
            "{name} must be at most {MAX_LIMIT} bytes"
        )));
    }
    Ok(())
}

fn env_mib(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(mb) if mb > 0 => Some(mb),
        _ => {
            tracing::warn!(variable = key, value = %raw, "ignoring invalid decoder limit override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = DecoderOptions::default();
        assert_eq!(opts.max_decoded_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(opts.max_memory, 32 * 1024 * 1024);
        assert!(opts.validate().is_ok());
        assert!(!opts.is_cancelled());
    }

    #[test]
    fn builder_pattern() {
        let opts = DecoderOptions::new()
            .with_max_decoded_size(10)
            .with_max_memory(4096);
        assert_eq!(opts.max_decoded_size, 10);
        assert_eq!(opts.max_memory, 4096);
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(matches!(
            DecoderOptions::new().with_max_memory(0).validate(),
            Err(ContainerError::InvalidOption(_))
        ));
        assert!(DecoderOptions::new()
            .with_max_decoded_size(0)
            .validate()
            .is_err());
        assert!(DecoderOptions::new()
            .with_max_decoded_size(u64::MAX)
            .validate()
            .is_err());
    }

    #[test]
    fn window_log_tracks_memory() {
        assert_eq!(DecoderOptions::new().window_log_max(), 25);
        assert_eq!(DecoderOptions::new().with_max_memory(1).window_log_max(), 10);
        assert_eq!(
            DecoderOptions::new().with_max_memory(1 << 40).window_log_max(),
            31
        );
    }

    #[test]
    fn window_log_rounds_up_between_powers() {
        let mib = 1024 * 1024;
        assert_eq!(DecoderOptions::new().with_max_memory(48 * mib).window_log_max(), 26);
        assert_eq!(DecoderOptions::new().with_max_memory(32 * mib + 1).window_log_max(), 26);
        assert_eq!(DecoderOptions::new().with_max_memory(64 * mib).window_log_max(), 26);
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let opts = DecoderOptions::new().with_cancellation(token.clone());
        assert!(!opts.is_cancelled());
        token.cancel();
        assert!(opts.is_cancelled());
    }
}
