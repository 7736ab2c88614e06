//! Wall-clock source for operation timestamps.
//!
//! Every operation an entity produces is stamped with the producer's wall clock in
//! milliseconds. Those stamps drive the staleness test and the replay order, so the
//! engine reads time through the [`Clock`] trait instead of calling the system clock
//! directly. Tests swap in a [`FixedClock`] to make ordering deterministic.
//!
//! # Example
//!
//! ```
//! use flock::{Clock, SystemClock};
//!
//! let clock = SystemClock;
//! let stamp = clock.now_millis();
//! assert!(stamp > 0);
//! ```

use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(any(test, feature = "testing"))]
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Provides operation timestamps.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Current time formatted as RFC3339, for display.
    fn now_rfc3339(&self) -> String;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn now_rfc3339(&self) -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

/// Controllable clock for tests.
///
/// Each call to `now_millis()` returns the current value and then moves the clock
/// forward by one millisecond, so two operations stamped back to back never share a
/// timestamp. [`FixedClock::hold`] freezes it, [`FixedClock::set`] rewinds it, which
/// is how tests fabricate operations that arrive out of order.
///
/// ```
/// use flock::{Clock, FixedClock};
///
/// let clock = FixedClock::new(1000);
/// assert_eq!(clock.now_millis(), 1000);
/// assert_eq!(clock.now_millis(), 1001);
///
/// clock.set(500);
/// assert_eq!(clock.now_millis(), 500);
/// ```
#[cfg(any(test, feature = "testing"))]
pub struct FixedClock {
    state: Mutex<FixedClockState>,
}

#[cfg(any(test, feature = "testing"))]
struct FixedClockState {
    millis: u64,
    held: bool,
}

/// Guard returned by [`FixedClock::hold`]; the clock resumes ticking when it drops.
#[cfg(any(test, feature = "testing"))]
pub struct ClockHold<'a>(&'a FixedClock);

#[cfg(any(test, feature = "testing"))]
impl Drop for ClockHold<'_> {
    fn drop(&mut self) {
        self.0.lock().held = false;
    }
}

#[cfg(any(test, feature = "testing"))]
impl FixedClock {
    /// Create a clock starting at `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            state: Mutex::new(FixedClockState {
                millis,
                held: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FixedClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the clock from ticking until the guard is dropped.
    pub fn hold(&self) -> ClockHold<'_> {
        self.lock().held = true;
        ClockHold(self)
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: u64) {
        self.lock().millis += ms;
    }

    /// Jump to an absolute time, backwards included.
    pub fn set(&self, ms: u64) {
        self.lock().millis = ms;
    }

    /// Read the clock without ticking it.
    pub fn get(&self) -> u64 {
        self.lock().millis
    }
}

#[cfg(any(test, feature = "testing"))]
impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        let mut state = self.lock();
        let now = state.millis;
        if !state.held {
            state.millis += 1;
        }
        now
    }

    fn now_rfc3339(&self) -> String {
        use chrono::{TimeZone, Utc};
        let millis = self.now_millis();
        Utc.timestamp_millis_opt(millis as i64)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".to_string())
    }
}

#[cfg(any(test, feature = "testing"))]
impl Default for FixedClock {
    fn default() -> Self {
        // 2024-01-01 00:00:00 UTC
        Self::new(1704067200000)
    }
}

#[cfg(any(test, feature = "testing"))]
impl Debug for FixedClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FixedClock")
            .field("millis", &state.millis)
            .field("held", &state.held)
            .finish()
    }
}
