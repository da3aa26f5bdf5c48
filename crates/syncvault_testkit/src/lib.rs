//! # SyncVault Testkit
//!
//! Test utilities for SyncVault.
//!
//! This crate provides:
//! - Test fixtures: temporary sync files and sample records
//! - Property-based test generators using proptest
//! - Scenario helpers exercising several crates together
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use syncvault_testkit::prelude::*;
//!
//! let vault = TestVault::memory();
//! let sync_id = vault.finished_sync(&sample_users(3));
//! assert_eq!(vault.latest_finished_sync_id(None).unwrap(), Some(sync_id));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use logging::*;
