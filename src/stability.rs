//! Graph-wide stability tracking.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counts controllers that are mid-transition.
///
/// A controller is *unstable* while it has outstanding tasks or sits in a
/// transient substate. Controllers report each flip between stable and
/// unstable; the monitor lets callers block until the count drops to zero,
/// which means every controller it covers has come to rest.
///
/// Every container owns one monitor. Builders may attach additional
/// monitors to track a subset of services.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::StabilityMonitor;
/// use std::time::Duration;
///
/// let monitor = StabilityMonitor::new();
/// monitor.increment_unstable();
/// assert!(!monitor.await_stability_timeout(Duration::from_millis(10)));
/// monitor.decrement_unstable();
/// assert!(monitor.await_stability_timeout(Duration::from_millis(10)));
/// ```
pub struct StabilityMonitor {
    unstable: Mutex<usize>,
    stable: Condvar,
}

impl StabilityMonitor {
    pub fn new() -> Self {
        Self {
            unstable: Mutex::new(0),
            stable: Condvar::new(),
        }
    }

    /// Called when a covered controller leaves its stable rest state.
    pub fn increment_unstable(&self) {
        *self.unstable.lock() += 1;
    }

    /// Called when a covered controller returns to a stable rest state.
    pub fn decrement_unstable(&self) {
        let mut count = self.unstable.lock();
        match count.checked_sub(1) {
            Some(next) => *count = next,
            None => tracing::error!("stability monitor decremented below zero"),
        }
        if *count == 0 {
            self.stable.notify_all();
        }
    }

    /// Current number of unstable controllers.
    pub fn unstable_count(&self) -> usize {
        *self.unstable.lock()
    }

    pub fn is_stable(&self) -> bool {
        self.unstable_count() == 0
    }

    /// Blocks until every covered controller is at rest.
    pub fn await_stability(&self) {
        let mut count = self.unstable.lock();
        while *count > 0 {
            self.stable.wait(&mut count);
        }
    }

    /// Blocks until stable or the timeout elapses. Returns true when stable.
    pub fn await_stability_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.unstable.lock();
        while *count > 0 {
            if self.stable.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

impl Default for StabilityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StabilityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StabilityMonitor")
            .field("unstable", &self.unstable_count())
            .finish()
    }
}
