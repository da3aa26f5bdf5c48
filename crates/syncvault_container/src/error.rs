//! Error types for container operations.

use std::io;
use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur while encoding or decoding a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The stream does not start with the container magic header.
    #[error("invalid file: missing or unrecognized container header")]
    InvalidHeader,

    /// Decoding produced more bytes than the configured limit.
    #[error("max decoded size exceeded ({limit} bytes), increase max decoded size")]
    MaxDecodedSizeExceeded {
        /// The configured decoded-size ceiling in bytes.
        limit: u64,
    },

    /// The compressed stream needs a larger window than the memory limit allows.
    #[error("window size exceeds max memory ({limit} bytes), increase max memory")]
    WindowSizeExceeded {
        /// Window size required by the frame, when known.
        window: Option<u64>,
        /// The configured memory ceiling in bytes.
        limit: u64,
    },

    /// A decoder or encoder option is out of range.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Decoding was cancelled by the caller.
    #[error("decoding cancelled")]
    Cancelled,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl ContainerError {
    /// Creates an invalid option error.
    pub fn invalid_option(message: impl Into<String>) -> Self {
        Self::InvalidOption(message.into())
    }

    /// Returns true for the two resource-limit errors.
    #[must_use]
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Self::MaxDecodedSizeExceeded { .. } | Self::WindowSizeExceeded { .. }
        )
    }

    /// Wraps this error so it can travel through `std::io::Read`.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Self::Io(err) => err,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

impl From<io::Error> for ContainerError {
    fn from(err: io::Error) -> Self {
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<ContainerError>())
        {
            if let Some(inner) = err.into_inner() {
                if let Ok(container) = inner.downcast::<ContainerError>() {
                    return *container;
                }
            }
            return Self::Io(io::Error::new(io::ErrorKind::Other, "container error"));
        }
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_round_trip_preserves_variant() {
        let io_err = ContainerError::MaxDecodedSizeExceeded { limit: 7 }.into_io();
        match ContainerError::from(io_err) {
            ContainerError::MaxDecodedSizeExceeded { limit } => assert_eq!(limit, 7),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plain_io_error_stays_io() {
        let err = ContainerError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, ContainerError::Io(_)));
        assert!(!err.is_limit());
    }

    #[test]
    fn limit_errors_mention_remedy() {
        let size = ContainerError::MaxDecodedSizeExceeded { limit: 1 };
        let window = ContainerError::WindowSizeExceeded {
            window: Some(2),
            limit: 1,
        };
        assert!(size.to_string().contains("increase max decoded size"));
        assert!(window.to_string().contains("increase max memory"));
        assert!(size.is_limit() && window.is_limit());
    }
}
