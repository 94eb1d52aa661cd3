//! Automatic sync scheduling.
//!
//! Decides when to run a sync from local mutations, remote change notices,
//! login and manual requests. There is at most one pending timer:
//!
//! - a trigger within `min_interval` of the last run arms a catch-up timer for
//!   the remaining interval, unless a timer is already pending;
//! - any other trigger replaces the pending timer with a fresh debounce.
//!
//! A timer that fires inside the minimum interval re-arms itself as a
//! catch-up, so runs are never closer than `min_interval`. Runs declined
//! because another run is in flight are re-armed with the normal debounce.

use crate::config::SchedulerConfig;
use crate::coordinator::{SyncAttempt, SyncRunner, SyncTrigger};
use crate::error::{SyncError, SyncResult};
use lexisync_protocol::{ChangeNotice, Domain};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

struct PendingRun {
    generation: u64,
    due: Instant,
    trigger: SyncTrigger,
    handle: JoinHandle<()>,
}

/// Scheduling state owned by one scheduler.
#[derive(Default)]
struct SchedulerState {
    pending: Option<PendingRun>,
    generation: u64,
    last_sync_at: Option<Instant>,
    last_realtime_at: Option<Instant>,
    last_remote_version: Option<u64>,
    runs_fired: u64,
    listeners: Vec<JoinHandle<()>>,
}

impl SchedulerState {
    /// Time left before another run is allowed, if any.
    fn interval_remaining(&self, now: Instant, min_interval: Duration) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_sync_at?);
        (elapsed < min_interval).then(|| min_interval - elapsed)
    }
}

struct Inner {
    config: SchedulerConfig,
    runner: Arc<dyn SyncRunner>,
    state: Mutex<SchedulerState>,
    shut_down: AtomicBool,
}

/// Event-driven scheduler over a [`SyncRunner`].
///
/// Cloning yields another handle to the same scheduler. Must be used from
/// within a Tokio runtime.
#[derive(Clone)]
pub struct AutoSyncScheduler {
    inner: Arc<Inner>,
}

impl AutoSyncScheduler {
    /// Creates a scheduler driving `runner`.
    pub fn new(config: SchedulerConfig, runner: Arc<dyn SyncRunner>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                state: Mutex::new(SchedulerState::default()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Records a local edit in `domain`.
    pub fn notify_local_change(&self, domain: Domain) {
        self.inner
            .schedule(self.inner.config.debounce, SyncTrigger::LocalMutation(domain));
    }

    /// Records a remote change notice.
    ///
    /// Notices inside the throttle window of the last accepted one are
    /// collapsed into the run that one scheduled.
    pub fn notify_remote_change(&self) {
        self.inner.remote_change(None);
    }

    /// Schedules a quick run after login.
    pub fn notify_login(&self) {
        self.inner
            .schedule(self.inner.config.login_debounce, SyncTrigger::Login);
    }

    /// Schedules a quick run after a session is restored.
    pub fn notify_session_restored(&self) {
        self.inner
            .schedule(self.inner.config.login_debounce, SyncTrigger::SessionRestore);
    }

    /// Runs a sync immediately, bypassing the timers.
    ///
    /// Errors are returned so the caller can offer a retry.
    pub async fn sync_manual(&self) -> SyncResult<SyncAttempt> {
        let result = self.inner.runner.sync_now(SyncTrigger::Manual).await;
        self.inner.record_run(&result);
        result
    }

    /// Feeds change notices from `receiver` into the realtime throttle.
    pub fn attach_remote(&self, mut receiver: broadcast::Receiver<ChangeNotice>) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                let version = match receiver.recv().await {
                    Ok(notice) => notice.version,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "change notices lagged");
                        None
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.remote_change(version);
            }
        });
        self.inner.state.lock().listeners.push(handle);
    }

    /// Returns true while a timer is armed.
    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    /// When the pending timer fires, if one is armed.
    pub fn pending_due(&self) -> Option<Instant> {
        self.inner.state.lock().pending.as_ref().map(|p| p.due)
    }

    /// When the last run finished.
    pub fn last_sync_at(&self) -> Option<Instant> {
        self.inner.state.lock().last_sync_at
    }

    /// Number of timers that started a run.
    pub fn runs_fired(&self) -> u64 {
        self.inner.state.lock().runs_fired
    }

    /// Cancels the pending timer and stops listening for notices.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let mut state = self.inner.state.lock();
        if let Some(pending) = state.pending.take() {
            pending.handle.abort();
        }
        for listener in state.listeners.drain(..) {
            listener.abort();
        }
    }
}

impl Inner {
    fn schedule(self: &Arc<Self>, delay: Duration, trigger: SyncTrigger) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        if !self.runner.has_session() {
            debug!(%trigger, "no session, trigger ignored");
            return;
        }

        let mut state = self.state.lock();
        if let Some(remaining) = state.interval_remaining(Instant::now(), self.config.min_interval) {
            if state.pending.is_none() {
                debug!(%trigger, delay = ?remaining, "inside minimum interval, catch-up armed");
                self.arm(&mut state, remaining, SyncTrigger::CatchUp);
                return;
            }
        }
        debug!(%trigger, ?delay, "sync scheduled");
        self.arm(&mut state, delay, trigger);
    }

    fn remote_change(self: &Arc<Self>, version: Option<u64>) {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            if let (Some(seen), Some(version)) = (state.last_remote_version, version) {
                if version <= seen {
                    debug!(version, "change notice already seen");
                    return;
                }
            }
            if let Some(last) = state.last_realtime_at {
                if now.saturating_duration_since(last) < self.config.realtime_throttle {
                    debug!("change notice throttled");
                    return;
                }
            }
            state.last_realtime_at = Some(now);
        }
        self.schedule(self.config.realtime_throttle, SyncTrigger::RemoteChange);
    }

    fn arm(self: &Arc<Self>, state: &mut SchedulerState, delay: Duration, trigger: SyncTrigger) {
        if let Some(previous) = state.pending.take() {
            previous.handle.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        let due = Instant::now() + delay;

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            inner.fire(generation).await;
        });
        state.pending = Some(PendingRun {
            generation,
            due,
            trigger,
            handle,
        });
    }

    async fn fire(self: Arc<Self>, generation: u64) {
        let trigger = {
            let mut state = self.state.lock();
            let pending = match state.pending.take() {
                Some(p) if p.generation == generation => p,
                other => {
                    state.pending = other;
                    return;
                }
            };
            if let Some(remaining) =
                state.interval_remaining(Instant::now(), self.config.min_interval)
            {
                debug!(delay = ?remaining, "timer inside minimum interval, deferred");
                self.arm(&mut state, remaining, SyncTrigger::CatchUp);
                return;
            }
            state.runs_fired += 1;
            pending.trigger
        };

        let result = self.runner.sync_now(trigger).await;
        self.record_run(&result);
        match result {
            Ok(SyncAttempt::AlreadyRunning) => {
                debug!(%trigger, "run in flight, re-arming");
                self.schedule(self.config.debounce, trigger);
            }
            Ok(SyncAttempt::Completed(_)) => {}
            Err(SyncError::NotAuthenticated) => debug!("signed out before run"),
            Err(e) => warn!(%trigger, error = %e, "automatic sync failed"),
        }
    }

    fn record_run(&self, result: &SyncResult<SyncAttempt>) {
        let mut state = self.state.lock();
        match result {
            Ok(SyncAttempt::Completed(report)) => {
                state.last_sync_at = Some(Instant::now());
                state.last_remote_version = Some(report.remote_version);
            }
            Ok(SyncAttempt::AlreadyRunning) | Err(SyncError::NotAuthenticated) => {}
            Err(_) => state.last_sync_at = Some(Instant::now()),
        }
    }
}
