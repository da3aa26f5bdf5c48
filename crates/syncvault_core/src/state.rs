//! Sync state machine.
//!
//! ```text
//!            start_sync                 view_sync(id)
//!   Idle ───────────────▶ Syncing    Idle ─────────────▶ Viewing
//!    ▲                      │         ▲                    │  ▲
//!    └──────── end_sync ────┘         └──── clear_view ────┘  │ view_sync(other)
//!                                                             └──┘
//! ```
//!
//! Transitions are pure: they take the current state and return the next
//! one or a [`StateError`]. The handle stores the result.

use crate::error::StateError;

/// Which generation a handle is writing or pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No active write and no pinned view.
    #[default]
    Idle,
    /// The given sync is the write target.
    Syncing(String),
    /// The given sync is pinned for reads.
    Viewing(String),
}

impl SyncState {
    /// Returns the sync being written, if any.
    #[must_use]
    pub fn current_sync(&self) -> Option<&str> {
        match self {
            Self::Syncing(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the pinned view, if any.
    #[must_use]
    pub fn view(&self) -> Option<&str> {
        match self {
            Self::Viewing(id) => Some(id),
            _ => None,
        }
    }

    /// Returns true while a sync is being written.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing(_))
    }

    /// Enters `Syncing(id)`. Resuming the current sync is a no-op.
    ///
    /// Pinned views are dropped when a sync starts.
    ///
    /// # Errors
    ///
    /// Returns `ResumeMismatch` if a different sync is already active.
    pub fn start(&self, id: &str) -> Result<Self, StateError> {
        match self {
            Self::Syncing(current) if current != id => Err(StateError::ResumeMismatch {
                current: current.clone(),
                requested: id.to_string(),
            }),
            _ => Ok(Self::Syncing(id.to_string())),
        }
    }

    /// Leaves `Syncing`, returning the id that was active.
    ///
    /// # Errors
    ///
    /// Returns `NotSyncing` unless a sync is active.
    pub fn end(&self) -> Result<(Self, String), StateError> {
        match self {
            Self::Syncing(id) => Ok((Self::Idle, id.clone())),
            _ => Err(StateError::NotSyncing),
        }
    }

    /// Pins a view.
    ///
    /// # Errors
    ///
    /// Returns `SyncActive` while a sync is being written.
    pub fn view_sync(&self, id: &str) -> Result<Self, StateError> {
        match self {
            Self::Syncing(current) => Err(StateError::SyncActive(current.clone())),
            _ => Ok(Self::Viewing(id.to_string())),
        }
    }

    /// Drops a pinned view. Has no effect in other states.
    #[must_use]
    pub fn clear_view(&self) -> Self {
        match self {
            Self::Viewing(_) => Self::Idle,
            other => other.clone(),
        }
    }

    /// Returns the active sync id, or `NotSyncing`.
    ///
    /// # Errors
    ///
    /// Returns `NotSyncing` unless a sync is active.
    pub fn require_syncing(&self) -> Result<&str, StateError> {
        self.current_sync().ok_or(StateError::NotSyncing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_end() {
        let idle = SyncState::Idle;
        let syncing = idle.start("a").unwrap();
        assert_eq!(syncing.current_sync(), Some("a"));

        let (idle, ended) = syncing.end().unwrap();
        assert_eq!(idle, SyncState::Idle);
        assert_eq!(ended, "a");
    }

    #[test]
    fn resume_same_is_noop() {
        let syncing = SyncState::Idle.start("a").unwrap();
        assert_eq!(syncing.start("a").unwrap(), syncing);
        assert!(matches!(
            syncing.start("b"),
            Err(StateError::ResumeMismatch { .. })
        ));
    }

    #[test]
    fn end_requires_syncing() {
        assert_eq!(SyncState::Idle.end(), Err(StateError::NotSyncing));
        assert_eq!(
            SyncState::Viewing("v".into()).end(),
            Err(StateError::NotSyncing)
        );
    }

    #[test]
    fn view_excludes_syncing() {
        let viewing = SyncState::Idle.view_sync("v1").unwrap();
        assert_eq!(viewing.view(), Some("v1"));
        let repinned = viewing.view_sync("v2").unwrap();
        assert_eq!(repinned.view(), Some("v2"));
        assert_eq!(repinned.clear_view(), SyncState::Idle);

        let syncing = SyncState::Idle.start("s").unwrap();
        assert_eq!(
            syncing.view_sync("v1"),
            Err(StateError::SyncActive("s".into()))
        );
        assert_eq!(syncing.clear_view(), syncing);
    }

    #[test]
    fn starting_drops_view() {
        let viewing = SyncState::Viewing("old".into());
        assert_eq!(viewing.start("new").unwrap(), SyncState::Syncing("new".into()));
    }
}
