//! Periodic idle sweep that hibernates silent sessions.
//!
//! One background task per manager wakes every `sweep_interval` and asks the
//! [`SessionManager`] to hibernate sessions whose last output is older than
//! `threshold`. Hibernation only tells consumers they may release rendering
//! resources; the process and its replay buffer are untouched.
//!
//! The sweep interval doubles as the "mid-burst" guard: a session that
//! produced output within the last tick is never hibernated on that tick.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::session_manager::SessionManager;

/// Builder for the idle sweep task.
///
/// Call [`spawn`](Self::spawn) to start it.
pub struct IdleMonitor {
    manager: SessionManager,
    threshold: Duration,
    sweep_interval: Duration,
    cancel: CancellationToken,
}

impl IdleMonitor {
    /// Construct a monitor (does not start the sweep yet).
    #[must_use]
    pub fn new(
        manager: SessionManager,
        threshold: Duration,
        sweep_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            threshold,
            sweep_interval,
            cancel,
        }
    }

    /// Spawn the sweep task and return a handle that stops it on drop.
    #[must_use]
    pub fn spawn(self) -> IdleMonitorHandle {
        let cancel = self.cancel.clone();
        let join_handle = tokio::spawn(
            Self::run(self.manager, self.threshold, self.sweep_interval, self.cancel)
                .instrument(info_span!("idle_monitor")),
        );

        IdleMonitorHandle {
            join_handle: Some(join_handle),
            cancel,
        }
    }

    async fn run(
        manager: SessionManager,
        threshold: Duration,
        sweep_interval: Duration,
        cancel: CancellationToken,
    ) {
        info!(
            threshold_secs = threshold.as_secs(),
            sweep_interval_secs = sweep_interval.as_secs(),
            "idle monitor started"
        );

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + sweep_interval,
            sweep_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("idle monitor cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let hibernated = manager.hibernate_idle(threshold, sweep_interval).await;
            if !hibernated.is_empty() {
                debug!(count = hibernated.len(), "idle sweep hibernated sessions");
            }
        }
    }
}

/// Handle returned from [`IdleMonitor::spawn`].
pub struct IdleMonitorHandle {
    join_handle: Option<JoinHandle<()>>,
    /// Cancelled when the handle is dropped.
    cancel: CancellationToken,
}

impl Drop for IdleMonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl IdleMonitorHandle {
    /// Stop the sweep and wait for the task to exit.
    pub async fn await_completion(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
