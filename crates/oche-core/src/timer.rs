//! Cancelable deadlines.
//!
//! Every scheduled re-entry in the core (debounce, auto-expiry, periodic
//! reconciliation, transient pulses, reconnect backoff) is a [`Deadline`]
//! owned by the machine that armed it. Deadlines never fire on their own: the
//! owner checks them when the driver delivers a tick, and reports its earliest
//! armed deadline so the driver knows when to wake up.
//!
//! Dropping or cancelling a deadline is enough to guarantee it never fires
//! against stale state.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// A point on a monotonic clock.
///
/// Implemented for `std::time::Instant`, `tokio::time::Instant` and any test
/// clock that supports the same arithmetic.
pub trait TimePoint:
    Copy + Ord + Debug + Add<Duration, Output = Self> + Sub<Output = Duration>
{
}

impl<T> TimePoint for T where
    T: Copy + Ord + Debug + Add<Duration, Output = T> + Sub<Output = Duration>
{
}

/// A single cancelable deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline<I> {
    at: Option<I>,
}

impl<I> Default for Deadline<I> {
    fn default() -> Self {
        Self { at: None }
    }
}

impl<I: TimePoint> Deadline<I> {
    /// A deadline that is not armed.
    pub const fn idle() -> Self {
        Self { at: None }
    }

    /// Arm (or re-arm) to fire at `at`.
    pub fn arm(&mut self, at: I) {
        self.at = Some(at);
    }

    /// Arm to fire `delay` after `now`.
    pub fn arm_after(&mut self, now: I, delay: Duration) {
        self.at = Some(now + delay);
    }

    /// Disarm without firing.
    pub fn cancel(&mut self) {
        self.at = None;
    }

    /// Whether the deadline is armed.
    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// The instant this deadline fires at, if armed.
    pub fn at(&self) -> Option<I> {
        self.at
    }

    /// Whether the deadline is armed and `now` has reached it.
    pub fn is_due(&self, now: I) -> bool {
        self.at.is_some_and(|at| now >= at)
    }

    /// Fire the deadline if it is due.
    ///
    /// Returns `true` exactly once per arming; the deadline is disarmed when it
    /// fires.
    pub fn fire(&mut self, now: I) -> bool {
        if self.is_due(now) {
            self.at = None;
            true
        } else {
            false
        }
    }
}

/// Earliest of a set of optional instants.
pub fn earliest<I: TimePoint>(candidates: impl IntoIterator<Item = Option<I>>) -> Option<I> {
    candidates.into_iter().flatten().min()
}

#[cfg(test)]
pub(crate) mod test_clock {
    use std::{
        ops::{Add, Sub},
        time::Duration,
    };

    /// Synthetic clock measured as an offset from zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
    pub struct TestInstant(pub Duration);

    impl TestInstant {
        pub fn ms(millis: u64) -> Self {
            Self(Duration::from_millis(millis))
        }
    }

    impl Add<Duration> for TestInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self {
            Self(self.0 + rhs)
        }
    }

    impl Sub for TestInstant {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            self.0.saturating_sub(rhs.0)
        }
    }
}
