//! File handle configuration.

use crate::error::{CoreError, CoreResult};
use std::path::PathBuf;
use std::time::Duration;
use syncvault_container::{DecoderOptions, EncoderOptions};

/// Environment variable overriding how many finished full syncs cleanup keeps.
pub const ENV_KEEP_SYNC_COUNT: &str = "SYNCVAULT_KEEP_SYNC_COUNT";

/// Environment variable disabling cleanup when set to a true value.
pub const ENV_SKIP_CLEANUP: &str = "SYNCVAULT_SKIP_CLEANUP";

/// Byte budget for one session store response.
pub const DEFAULT_SESSION_SIZE_BUDGET: usize = 4_163_584;

/// Largest page a list call returns.
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 10_000;

/// Finished full syncs kept by cleanup unless overridden.
pub const DEFAULT_KEEP_SYNC_COUNT: usize = 2;

/// Configuration for opening a sync file.
///
/// [`Config::default`] starts from the `SYNCVAULT_*` environment
/// overrides; builder calls made afterwards win over them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for the working database copy (system temp dir if `None`).
    pub tmp_dir: Option<PathBuf>,

    /// Open without saving; closing a mutated handle is an error.
    pub read_only: bool,

    /// Extra SQLite pragmas applied after the schema is created.
    pub pragmas: Vec<(String, String)>,

    /// Upper bound for list page sizes.
    pub max_page_size: u32,

    /// Number of finished full syncs kept by cleanup. Must be at least 1.
    pub keep_sync_count: usize,

    /// Whether cleanup is disabled.
    pub skip_cleanup: bool,

    /// Byte budget for session get-many and get-all responses.
    pub session_size_budget: usize,

    /// Queries slower than this are logged.
    pub slow_query_threshold: Duration,

    /// Minimum interval between two slow-query logs for the same query.
    pub slow_query_log_interval: Duration,

    /// Limits used when decoding the container.
    pub decoder: DecoderOptions,

    /// Options used when saving the container.
    pub encoder: EncoderOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tmp_dir: None,
            read_only: false,
            pragmas: Vec::new(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            keep_sync_count: env_keep_sync_count().unwrap_or(DEFAULT_KEEP_SYNC_COUNT),
            skip_cleanup: env_skip_cleanup(),
            session_size_budget: DEFAULT_SESSION_SIZE_BUDGET,
            slow_query_threshold: Duration::from_secs(5),
            slow_query_log_interval: Duration::from_secs(60),
            decoder: DecoderOptions::default(),
            encoder: EncoderOptions::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-applies `SYNCVAULT_*` environment overrides on top of this config.
    ///
    /// Environment values win over values set in code. Unparsable values
    /// are ignored.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Some(count) = env_keep_sync_count() {
            self.keep_sync_count = count;
        }
        if env_skip_cleanup() {
            self.skip_cleanup = true;
        }
        self.decoder = self.decoder.apply_env();
        self
    }

    /// Checks the settings before a handle is opened.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero `keep_sync_count` or
    /// `max_page_size`, or for out-of-range decoder limits.
    pub fn validate(&self) -> CoreResult<()> {
        if self.keep_sync_count == 0 {
            return Err(CoreError::invalid_argument(
                "keep_sync_count must be at least 1",
            ));
        }
        if self.max_page_size == 0 {
            return Err(CoreError::invalid_argument("max_page_size must be at least 1"));
        }
        self.decoder.validate()?;
        Ok(())
    }

    /// Sets the working directory for the database copy.
    #[must_use]
    pub fn tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(dir.into());
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Adds a SQLite pragma.
    #[must_use]
    pub fn pragma(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pragmas.push((name.into(), value.into()));
        self
    }

    /// Sets the maximum list page size.
    #[must_use]
    pub const fn max_page_size(mut self, size: u32) -> Self {
        self.max_page_size = size;
        self
    }

    /// Sets how many finished full syncs cleanup keeps.
    #[must_use]
    pub const fn keep_sync_count(mut self, count: usize) -> Self {
        self.keep_sync_count = count;
        self
    }

    /// Disables or enables cleanup.
    #[must_use]
    pub const fn skip_cleanup(mut self, value: bool) -> Self {
        self.skip_cleanup = value;
        self
    }

    /// Sets the session response byte budget.
    #[must_use]
    pub const fn session_size_budget(mut self, bytes: usize) -> Self {
        self.session_size_budget = bytes;
        self
    }

    /// Sets the slow query threshold.
    #[must_use]
    pub const fn slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Sets the container decoder limits.
    #[must_use]
    pub fn decoder(mut self, options: DecoderOptions) -> Self {
        self.decoder = options;
        self
    }

    /// Sets the container encoder options.
    #[must_use]
    pub const fn encoder(mut self, options: EncoderOptions) -> Self {
        self.encoder = options;
        self
    }
}

fn env_keep_sync_count() -> Option<usize> {
    std::env::var(ENV_KEEP_SYNC_COUNT)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|c| *c > 0)
}

fn env_skip_cleanup() -> bool {
    std::env::var(ENV_SKIP_CLEANUP)
        .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "t" | "true"))
        .unwrap_or(false)
}
