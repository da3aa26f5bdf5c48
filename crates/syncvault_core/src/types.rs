//! Core type definitions.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp from nanoseconds since the epoch.
    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Returns nanoseconds since the epoch.
    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(nanos)
    }

    /// Returns this timestamp moved back by `secs` seconds.
    #[must_use]
    pub const fn minus_secs(self, secs: i64) -> Self {
        Self(self.0.saturating_sub(secs.saturating_mul(1_000_000_000)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strictly increasing timestamp source.
///
/// Follows wall-clock time but never returns the same value twice, so
/// "newer than" comparisons between writes on one handle are well defined
/// even within one clock tick.
#[derive(Debug, Default)]
pub struct Clock {
    last: Mutex<i64>,
}

impl Clock {
    /// Creates a new clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next timestamp.
    pub fn now(&self) -> Timestamp {
        let mut last = self.last.lock();
        let next = Timestamp::now().0.max(last.saturating_add(1));
        *last = next;
        Timestamp(next)
    }
}

/// Kind of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncType {
    /// A complete snapshot of every record kind.
    #[default]
    Full,
    /// A subset of records; diffs are partial syncs.
    Partial,
    /// Resource types and resources only.
    ResourcesOnly,
}

impl SyncType {
    /// Returns the stored name of this sync type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::ResourcesOnly => "resources_only",
        }
    }

    /// Combines two sync types, keeping the most complete one.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        match (self, other) {
            (Self::Full, _) | (_, Self::Full) => Self::Full,
            (Self::ResourcesOnly, _) | (_, Self::ResourcesOnly) => Self::ResourcesOnly,
            _ => Self::Partial,
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "full" | "" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            "resources_only" => Ok(Self::ResourcesOnly),
            other => Err(CoreError::invalid_argument(format!(
                "invalid sync type: {other}"
            ))),
        }
    }
}

/// One ingestion generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun {
    /// Lexically sortable unique id.
    pub id: String,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run ended; `None` while in progress.
    pub ended_at: Option<Timestamp>,
    /// Resumable checkpoint token.
    pub sync_token: String,
    /// Kind of run.
    pub sync_type: SyncType,
    /// Parent generation of partial runs.
    pub parent_sync_id: Option<String>,
}

impl SyncRun {
    /// Returns true once the run has an end timestamp.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Mints a new sync id.
#[must_use]
pub fn new_sync_id() -> String {
    ulid::Ulid::new().to_string()
}

/// One page of results plus the token for the next page.
///
/// An empty `next_page_token` means there are no more rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Token for the next page, or empty.
    pub next_page_token: String,
}

impl<T> Page<T> {
    /// Returns true if another page follows.
    #[must_use]
    pub fn has_more(&self) -> bool {
        !self.next_page_token.is_empty()
    }
}

/// Outcome of closing a file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOutcome {
    /// Whether the container was re-encoded.
    pub saved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_strictly_increasing() {
        let clock = Clock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn sync_type_union() {
        use SyncType::*;
        assert_eq!(Partial.union(Full), Full);
        assert_eq!(ResourcesOnly.union(Partial), ResourcesOnly);
        assert_eq!(Partial.union(Partial), Partial);
        assert_eq!(Full.union(ResourcesOnly), Full);
    }

    #[test]
    fn sync_type_parse() {
        assert_eq!("partial".parse::<SyncType>().unwrap(), SyncType::Partial);
        assert_eq!("".parse::<SyncType>().unwrap(), SyncType::Full);
        assert!("weekly".parse::<SyncType>().is_err());
        assert_eq!(SyncType::ResourcesOnly.to_string(), "resources_only");
    }

    #[test]
    fn sync_ids_sort_by_creation() {
        let a = new_sync_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_sync_id();
        assert_eq!(a.len(), 26);
        assert!(a < b);
    }
}
