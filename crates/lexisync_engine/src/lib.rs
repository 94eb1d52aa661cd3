//! # lexisync Sync Engine
//!
//! Client-side snapshot synchronization for lexisync.
//!
//! This crate provides:
//! - Snapshot building and applying over an application-supplied [`LocalStore`]
//! - The [`SyncCoordinator`]: pull, merge, compare-and-swap push, one retry
//!   on conflict, apply
//! - The [`AutoSyncScheduler`]: debounce, minimum interval and realtime
//!   throttle over coordinator runs
//! - The [`LocalBackupStore`] rollback ring
//! - The [`RemoteStore`] contract, with mock and HTTP implementations
//!
//! ## Key Invariants
//!
//! - Pull always precedes push, and a push always carries the version
//!   observed by its own run's pull
//! - A domain is replaced wholesale or left untouched
//! - A domain without a usable `updatedAt` never outranks one that has it
//! - Local storage is written only after a confirmed push or on a no-push path
//! - Backup failures never fail a sync
//! - At most one coordinator run is in flight; others are declined, not queued

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod backup;
mod builder;
mod config;
mod coordinator;
mod error;
mod http;
mod local;
mod notify;
mod scheduler;
mod session;
mod transport;

pub use applier::{ApplyMode, SnapshotApplier};
pub use backup::{
    BackupBackend, BackupRecord, BackupSummary, DirBackupBackend, LocalBackupStore,
    MemoryBackupBackend,
};
pub use builder::SnapshotBuilder;
pub use config::{
    BackupConfig, SchedulerConfig, SyncConfig, DEBOUNCE, LOGIN_DEBOUNCE, MAX_BACKUPS,
    MIN_INTERVAL, REALTIME_THROTTLE,
};
pub use coordinator::{
    SyncAttempt, SyncCoordinator, SyncOutcome, SyncReport, SyncRunner, SyncState, SyncStats,
    SyncTrigger,
};
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpMethod, HttpRemoteStore, HttpRequest, HttpResponse, LoopbackClient,
    LoopbackServer, SNAPSHOT_PATH,
};
pub use local::{FileLocalStore, LocalState, LocalStore, MemoryLocalStore};
pub use notify::{NoopNotifier, SyncEvent, SyncNotifier};
pub use scheduler::AutoSyncScheduler;
pub use session::{SessionProvider, StaticSession};
pub use transport::{MockRemoteStore, RemoteStore, NOTICE_CAPACITY};
