//! # lexisync Testkit
//!
//! Test utilities for lexisync.
//!
//! This crate provides:
//! - Fixtures: timestamps, sample domain blocks and payloads, temp stores
//! - Property-based test generators using proptest
//! - An in-process cluster of devices sharing one snapshot server
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lexisync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn two_devices_converge() {
//!     let cluster = SyncCluster::new();
//!     let a = cluster.device("alice");
//!     let b = cluster.device("alice");
//!     a.edit(Domain::Vocabulary, vocabulary_block(&["A"]));
//!     a.sync().await;
//!     b.sync().await;
//! }
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
    pub use lexisync_protocol::{Domain, DomainBlock, SnapshotPayload};
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use logging::*;
