//! Sync scheduler - periodic update checks against the remote store
//!
//! The [`SyncScheduler`] owns a timer loop that asks the
//! [`ChangeSynchronizer`] to refresh. The period depends on whether push
//! notifications are active:
//!
//! ```text
//! push off ──→ fast interval (60s default)
//! push on  ──→ slow interval (300s default, safety net only)
//! ```
//!
//! Toggling push notifications reschedules the running loop in place.
//! Ticks that find the tree unloaded or already refreshing are skipped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use drivefs_core::config::SyncConfig;

use crate::synchronizer::ChangeSynchronizer;

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// ============================================================================
// SyncScheduler
// ============================================================================

/// Drives [`ChangeSynchronizer::try_start_refresh`] on a timer
pub struct SyncScheduler {
    synchronizer: Arc<ChangeSynchronizer>,
    fast_interval: Duration,
    slow_interval: Duration,
    push_enabled: watch::Sender<bool>,
    running: Mutex<Option<RunningLoop>>,
}

impl SyncScheduler {
    pub fn new(synchronizer: Arc<ChangeSynchronizer>, config: &SyncConfig) -> Self {
        let (push_enabled, _) = watch::channel(config.push_notifications);

        info!(
            fast_secs = config.fast_poll_interval_secs,
            slow_secs = config.slow_poll_interval_secs,
            push = config.push_notifications,
            "Creating sync scheduler"
        );

        Self {
            synchronizer,
            fast_interval: config.fast_poll_interval(),
            slow_interval: config.slow_poll_interval(),
            push_enabled,
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The period the loop uses right now
    pub fn polling_interval(&self) -> Duration {
        select_interval(*self.push_enabled.borrow(), self.fast_interval, self.slow_interval)
    }

    pub fn push_notification_enabled(&self) -> bool {
        *self.push_enabled.borrow()
    }

    /// Switch between the fast and the slow polling period
    pub fn set_push_notification_enabled(&self, enabled: bool) {
        let changed = self.push_enabled.send_if_modified(|current| {
            if *current == enabled {
                false
            } else {
                *current = enabled;
                true
            }
        });
        if changed {
            info!(enabled, interval = ?self.polling_interval(), "Push notifications toggled");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Start the polling loop; a no-op if it is already running
    pub fn start(&self) {
        let mut running = self.running();
        if running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            debug!("Polling loop already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.synchronizer),
            self.fast_interval,
            self.slow_interval,
            self.push_enabled.subscribe(),
            cancel.clone(),
        ));
        *running = Some(RunningLoop { cancel, handle });
    }

    /// Stop the polling loop and wait for it to exit
    pub async fn stop(&self) {
        let running = self.running().take();
        if let Some(RunningLoop { cancel, handle }) = running {
            cancel.cancel();
            if let Err(err) = handle.await {
                debug!(error = %err, "Polling loop ended abnormally");
            }
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running().take() {
            running.cancel.cancel();
        }
    }
}

fn select_interval(push_enabled: bool, fast: Duration, slow: Duration) -> Duration {
    if push_enabled {
        slow
    } else {
        fast
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

// ============================================================================
// Loop
// ============================================================================

async fn run_loop(
    synchronizer: Arc<ChangeSynchronizer>,
    fast: Duration,
    slow: Duration,
    mut push_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let mut period = select_interval(*push_rx.borrow_and_update(), fast, slow);
    let mut timer = ticker(period);
    info!(interval = ?period, "Polling loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            changed = push_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = select_interval(*push_rx.borrow_and_update(), fast, slow);
                if next != period {
                    period = next;
                    timer = ticker(period);
                    debug!(interval = ?period, "Polling interval rescheduled");
                }
            }

            _ = timer.tick() => {
                if synchronizer.try_start_refresh() {
                    debug!("Periodic update check started");
                } else {
                    trace!(phase = ?synchronizer.phase(), "Skipping periodic update check");
                }
            }
        }
    }

    info!("Polling loop stopped");
}
