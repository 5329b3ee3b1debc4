//! The dispatch loop's wakeup signal: a coalescing notifier any producer
//! (new Pending job, worker state change, job completion) can fire, plus
//! the 250 ms watchdog tick named in spec.md §4.1/§5.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// 250 ms watchdog: the dispatch loop runs at least this often even with
/// no explicit wakeup, so queue readiness (spec.md §8) holds within two
/// wakeups even if an event is dropped.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct DispatchWakeup {
    notify: Arc<Notify>,
}

impl DispatchWakeup {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    /// Called by producers: new-Pending-job, worker-state-change,
    /// job-completion.
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Waits for either an explicit wakeup or the watchdog timer.
    pub async fn wait(&self) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(WATCHDOG_INTERVAL) => {}
        }
    }
}

impl Default for DispatchWakeup {
    fn default() -> Self {
        Self::new()
    }
}
