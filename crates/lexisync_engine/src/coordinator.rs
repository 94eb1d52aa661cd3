//! Sync coordinator: pull, merge, conditional push, apply.
//!
//! ## Algorithm
//!
//! 1. Pull the remote record and build the local snapshot.
//! 2. Merge per domain with last-write-wins.
//! 3. If the merge differs from the remote payload, push it under
//!    compare-and-swap with the version observed by the pull, then apply the
//!    merge locally. On conflict, re-pull, re-merge and push again; the number
//!    of such retries is bounded by [`SyncConfig::max_conflict_retries`].
//! 4. Otherwise apply the merge locally if it differs from the local payload.
//!
//! Local state is only written after a confirmed push or on a no-push path,
//! so a failed run leaves local storage exactly as it was built.

use crate::applier::SnapshotApplier;
use crate::backup::LocalBackupStore;
use crate::builder::SnapshotBuilder;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalStore;
use crate::notify::{NoopNotifier, SyncEvent, SyncNotifier};
use crate::session::SessionProvider;
use crate::transport::RemoteStore;
use async_trait::async_trait;
use lexisync_protocol::{lww_merge, merge_decisions, Domain, PushOutcome, SnapshotPayload};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why a sync run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The user asked for it.
    Manual,
    /// A local edit in a domain.
    LocalMutation(Domain),
    /// A remote change notice.
    RemoteChange,
    /// A fresh login.
    Login,
    /// A session restored at startup.
    SessionRestore,
    /// A run deferred by the minimum interval.
    CatchUp,
}

impl SyncTrigger {
    /// Returns true for user-initiated runs.
    pub fn is_manual(&self) -> bool {
        matches!(self, SyncTrigger::Manual)
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Manual => f.write_str("manual"),
            SyncTrigger::LocalMutation(domain) => write!(f, "local:{}", domain),
            SyncTrigger::RemoteChange => f.write_str("remote"),
            SyncTrigger::Login => f.write_str("login"),
            SyncTrigger::SessionRestore => f.write_str("session-restore"),
            SyncTrigger::CatchUp => f.write_str("catch-up"),
        }
    }
}

/// The current phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Never ran.
    Idle,
    /// Fetching the remote record.
    Pulling,
    /// Pushing the merged payload.
    Pushing,
    /// Writing the merge into local storage.
    Applying,
    /// Last run succeeded.
    Synced,
    /// Last run failed.
    Error,
}

/// What a completed run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The merge was pushed and the remote version advanced.
    Pushed,
    /// Newer remote domains were applied locally; nothing was pushed.
    AppliedRemote,
    /// A device with no local data adopted the remote data.
    RestoredFromRemote,
    /// Nothing changed on either side.
    UpToDate,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// What happened.
    pub outcome: SyncOutcome,
    /// Remote version after the run, 0 when no record exists.
    pub remote_version: u64,
    /// Domains replaced locally.
    pub applied: Vec<Domain>,
    /// Conflict retries used.
    pub conflict_retries: u32,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Result of asking for a run.
#[derive(Debug, Clone)]
pub enum SyncAttempt {
    /// The run finished.
    Completed(SyncReport),
    /// Another run was in flight; this one was declined.
    AlreadyRunning,
}

impl SyncAttempt {
    /// The report, when the run happened.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncAttempt::Completed(report) => Some(report),
            SyncAttempt::AlreadyRunning => None,
        }
    }

    /// Returns true when the run was declined.
    pub fn is_already_running(&self) -> bool {
        matches!(self, SyncAttempt::AlreadyRunning)
    }
}

/// Cumulative statistics.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that completed.
    pub runs_completed: u64,
    /// Runs that failed.
    pub runs_failed: u64,
    /// Runs declined because another was in flight.
    pub runs_declined: u64,
    /// Accepted pushes.
    pub pushes: u64,
    /// Push conflicts, including the final one of a failed run.
    pub conflicts: u64,
    /// Runs that restored a fresh device from the remote.
    pub restores: u64,
    /// When the last run completed.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Something that can perform a sync run.
///
/// The scheduler drives this rather than a concrete coordinator.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    /// Runs a sync unless one is already in flight.
    async fn sync_now(&self, trigger: SyncTrigger) -> SyncResult<SyncAttempt>;

    /// Returns true when a user is signed in.
    fn has_session(&self) -> bool;
}

/// Releases the in-flight flag on drop.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates sync runs against one remote store.
pub struct SyncCoordinator<R: RemoteStore, L: LocalStore> {
    config: SyncConfig,
    remote: Arc<R>,
    builder: SnapshotBuilder<L>,
    applier: SnapshotApplier<L>,
    backups: Option<Arc<LocalBackupStore<L>>>,
    session: Arc<dyn SessionProvider>,
    notifier: Arc<dyn SyncNotifier>,
    in_flight: AtomicBool,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<R: RemoteStore, L: LocalStore> SyncCoordinator<R, L> {
    /// Creates a coordinator.
    pub fn new(
        config: SyncConfig,
        remote: Arc<R>,
        local: Arc<L>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        let builder = SnapshotBuilder::new(Arc::clone(&local))
            .with_schema_version(config.schema_version)
            .with_compaction(config.compaction.clone());
        Self {
            config,
            remote,
            builder,
            applier: SnapshotApplier::new(local),
            backups: None,
            session,
            notifier: Arc::new(NoopNotifier),
            in_flight: AtomicBool::new(false),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Takes a backup into `backups` after each successful run.
    pub fn with_backups(mut self, backups: Arc<LocalBackupStore<L>>) -> Self {
        self.backups = Some(backups);
        self
    }

    /// Routes status events to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn SyncNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a run is in flight.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard(&self.in_flight))
    }

    /// Runs one sync.
    ///
    /// Fails with [`SyncError::NotAuthenticated`] before any I/O when no user
    /// is signed in. Returns [`SyncAttempt::AlreadyRunning`] without doing
    /// anything when another run is in flight.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> SyncResult<SyncAttempt> {
        if self.session.current_user().is_none() {
            debug!(%trigger, "no session, sync skipped");
            return Err(SyncError::NotAuthenticated);
        }

        let Some(_guard) = self.try_begin() else {
            debug!(%trigger, "sync already running, declined");
            self.stats.write().runs_declined += 1;
            return Ok(SyncAttempt::AlreadyRunning);
        };

        let manual = trigger.is_manual();
        info!(%trigger, "sync started");
        self.notifier.notify(SyncEvent::Started { manual });

        match self.run().await {
            Ok(report) => {
                self.finish(&report);
                Ok(SyncAttempt::Completed(report))
            }
            Err(e) => {
                self.fail(&e, manual);
                Err(e)
            }
        }
    }

    async fn run(&self) -> SyncResult<SyncReport> {
        let start = Instant::now();

        self.set_state(SyncState::Pulling);
        let mut remote = self.remote.pull().await?;
        let local = self.builder.build()?;
        debug!(
            remote_version = remote.as_ref().map_or(0, |r| r.version),
            local_domains = local.payload.len(),
            "pulled remote record"
        );

        let mut retries = 0u32;
        loop {
            let base_version = remote.as_ref().map_or(0, |r| r.version);
            let empty = SnapshotPayload::new();
            let remote_payload = remote.as_ref().map_or(&empty, |r| &r.payload);

            for (domain, side) in merge_decisions(&local.payload, remote_payload) {
                debug!(%domain, ?side, "merge decision");
            }
            let merged = lww_merge(&local.payload, remote_payload);

            if merged != *remote_payload {
                self.set_state(SyncState::Pushing);
                match self.remote.push(base_version, &merged).await? {
                    PushOutcome::Accepted { version, .. } => {
                        info!(version, "push accepted");
                        self.set_state(SyncState::Applying);
                        let applied = self.applier.apply(&merged)?;
                        return Ok(SyncReport {
                            outcome: SyncOutcome::Pushed,
                            remote_version: version,
                            applied,
                            conflict_retries: retries,
                            duration: start.elapsed(),
                        });
                    }
                    PushOutcome::Conflict => {
                        self.stats.write().conflicts += 1;
                        if retries >= self.config.max_conflict_retries {
                            warn!(base_version, retries, "push conflict persisted");
                            return Err(SyncError::Conflict {
                                expected_version: base_version,
                            });
                        }
                        retries += 1;
                        info!(base_version, retries, "push conflict, re-pulling");
                        self.set_state(SyncState::Pulling);
                        remote = self.remote.pull().await?;
                        continue;
                    }
                }
            }

            let (outcome, applied) = if merged != local.payload {
                self.set_state(SyncState::Applying);
                let applied = self.applier.apply(&merged)?;
                let outcome = if local.is_pristine() && !merged.is_empty() {
                    SyncOutcome::RestoredFromRemote
                } else if applied.is_empty() {
                    SyncOutcome::UpToDate
                } else {
                    SyncOutcome::AppliedRemote
                };
                (outcome, applied)
            } else {
                (SyncOutcome::UpToDate, Vec::new())
            };

            return Ok(SyncReport {
                outcome,
                remote_version: base_version,
                applied,
                conflict_retries: retries,
                duration: start.elapsed(),
            });
        }
    }

    fn finish(&self, report: &SyncReport) {
        self.set_state(SyncState::Synced);
        {
            let mut stats = self.stats.write();
            stats.runs_completed += 1;
            if report.outcome == SyncOutcome::Pushed {
                stats.pushes += 1;
            }
            if report.outcome == SyncOutcome::RestoredFromRemote {
                stats.restores += 1;
            }
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }
        info!(
            outcome = ?report.outcome,
            remote_version = report.remote_version,
            applied = report.applied.len(),
            "sync completed"
        );

        if self.config.backup_after_sync {
            if let Some(backups) = &self.backups {
                // Best effort: never fails the run.
                if let Err(e) = backups.create_backup(&self.config.backup_note) {
                    warn!(error = %e, "post-sync backup failed");
                }
            }
        }

        self.notifier.notify(SyncEvent::Completed(report));
        if report.outcome == SyncOutcome::RestoredFromRemote {
            self.notifier.notify(SyncEvent::RestoredFromRemote);
        }
    }

    fn fail(&self, error: &SyncError, manual: bool) {
        self.set_state(SyncState::Error);
        {
            let mut stats = self.stats.write();
            stats.runs_failed += 1;
            stats.last_error = Some(error.to_string());
        }
        if manual {
            info!(error = %error, "manual sync failed");
        } else {
            warn!(error = %error, retryable = error.is_retryable(), "automatic sync failed");
        }
        self.notifier.notify(SyncEvent::Failed { error, manual });
    }
}

#[async_trait]
impl<R: RemoteStore, L: LocalStore> SyncRunner for SyncCoordinator<R, L> {
    async fn sync_now(&self, trigger: SyncTrigger) -> SyncResult<SyncAttempt> {
        SyncCoordinator::sync_now(self, trigger).await
    }

    fn has_session(&self) -> bool {
        self.session.current_user().is_some()
    }
}
