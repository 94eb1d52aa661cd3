//! Configuration for the sync engine.

use lexisync_protocol::{CompactionPolicy, SCHEMA_VERSION};
use std::time::Duration;

/// Default quiet period after the last local mutation.
pub const DEBOUNCE: Duration = Duration::from_secs(6);
/// Default floor between consecutive sync runs.
pub const MIN_INTERVAL: Duration = Duration::from_secs(20);
/// Default window collapsing bursts of remote change notices.
pub const REALTIME_THROTTLE: Duration = Duration::from_secs(5);
/// Default debounce after login or session restore.
pub const LOGIN_DEBOUNCE: Duration = Duration::from_millis(800);
/// Default size of the local backup ring.
pub const MAX_BACKUPS: usize = 5;

/// Configuration for a sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Schema version written into built snapshots.
    pub schema_version: u32,
    /// Re-pull/re-push cycles allowed after a push conflict.
    pub max_conflict_retries: u32,
    /// Whether a backup is taken after each successful sync.
    pub backup_after_sync: bool,
    /// Note attached to automatic backups.
    pub backup_note: String,
    /// Compaction applied to the articles domain before it is snapshotted.
    pub compaction: CompactionPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            max_conflict_retries: 1,
            backup_after_sync: true,
            backup_note: "auto: after sync".to_string(),
            compaction: CompactionPolicy::default(),
        }
    }

    /// Sets the number of conflict retries.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Enables or disables the post-sync backup.
    pub fn with_backup_after_sync(mut self, enabled: bool) -> Self {
        self.backup_after_sync = enabled;
        self
    }

    /// Sets the note attached to automatic backups.
    pub fn with_backup_note(mut self, note: impl Into<String>) -> Self {
        self.backup_note = note.into();
        self
    }

    /// Sets the articles compaction policy.
    pub fn with_compaction(mut self, compaction: CompactionPolicy) -> Self {
        self.compaction = compaction;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing policy for the automatic scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Quiet period after the last local mutation before firing.
    pub debounce: Duration,
    /// Hard floor between the end of one run and the start of the next.
    pub min_interval: Duration,
    /// Window collapsing bursts of remote change notices into one run.
    pub realtime_throttle: Duration,
    /// Short debounce used after login and session restore.
    pub login_debounce: Duration,
}

impl SchedulerConfig {
    /// Creates a scheduler configuration with default values.
    pub fn new() -> Self {
        Self {
            debounce: DEBOUNCE,
            min_interval: MIN_INTERVAL,
            realtime_throttle: REALTIME_THROTTLE,
            login_debounce: LOGIN_DEBOUNCE,
        }
    }

    /// Sets the mutation debounce.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the minimum interval between runs.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Sets the realtime throttle window.
    pub fn with_realtime_throttle(mut self, throttle: Duration) -> Self {
        self.realtime_throttle = throttle;
        self
    }

    /// Sets the login debounce.
    pub fn with_login_debounce(mut self, debounce: Duration) -> Self {
        self.login_debounce = debounce;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the local backup ring.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Maximum number of retained backups.
    pub max_backups: usize,
}

impl BackupConfig {
    /// Creates a backup configuration with default values.
    pub fn new() -> Self {
        Self {
            max_backups: MAX_BACKUPS,
        }
    }

    /// Sets the ring size.
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self::new()
    }
}
