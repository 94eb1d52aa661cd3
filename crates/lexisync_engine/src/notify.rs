//! Status callbacks.
//!
//! Failures are reported through a notifier rather than returned to whoever
//! happened to trigger an automatic run.

use crate::coordinator::SyncReport;
use crate::error::SyncError;

/// Something the user may want to hear about.
#[derive(Debug)]
pub enum SyncEvent<'a> {
    /// A run started.
    Started {
        /// Whether the run was requested by the user.
        manual: bool,
    },
    /// A run finished.
    Completed(&'a SyncReport),
    /// A run failed.
    ///
    /// Manual failures deserve a retry affordance; automatic ones are left to
    /// the next trigger.
    Failed {
        /// The error.
        error: &'a SyncError,
        /// Whether the run was requested by the user.
        manual: bool,
    },
    /// A fresh device adopted the remote data.
    RestoredFromRemote,
}

/// Receives sync status events.
pub trait SyncNotifier: Send + Sync {
    /// Handles an event.
    fn notify(&self, event: SyncEvent<'_>);
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl SyncNotifier for NoopNotifier {
    fn notify(&self, _event: SyncEvent<'_>) {}
}
