//! # lexisync Server
//!
//! Reference remote store for lexisync snapshots.
//!
//! This crate provides:
//! - Per-user snapshot records with atomic compare-and-swap saves
//! - `get_snapshot` / `save_snapshot` handlers and HTTP-style routing
//! - Change-notice fan-out keyed by user id
//! - Authentication (HMAC-SHA256 bearer tokens)
//!
//! # Authentication
//!
//! Authentication is optional but recommended for production:
//!
//! ```rust
//! use lexisync_server::{ServerConfig, SnapshotServer};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let server = SnapshotServer::new(ServerConfig::default().with_auth(secret));
//!
//! let token = server.issue_token("alice").unwrap();
//! assert!(server.get_snapshot(Some(&token)).is_ok());
//! assert!(server.get_snapshot(Some("alice")).is_err());
//! ```
//!
//! Without authentication the bearer credential is taken as the user id.
//!
//! # Versions
//!
//! A user's record starts at version 0 (absent). Every accepted save
//! increments the version by one; a save whose expected version differs from
//! the stored one is rejected with a conflict and writes nothing.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod notify;
mod server;
mod store;

pub use auth::{AuthConfig, TokenValidator};
pub use config::{ServerConfig, MAX_PAYLOAD_BYTES};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use notify::ChangeHub;
pub use server::{HttpReply, SnapshotServer, SNAPSHOT_PATH};
pub use store::SnapshotRecordStore;
