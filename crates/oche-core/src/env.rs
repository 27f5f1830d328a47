//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples room logic from system resources (clock,
//! wall time, randomness). This enables:
//!
//! - Deterministic Simulation: the harness drives a paused Tokio clock and a
//!   seeded RNG, so every timer-driven transition reproduces exactly.
//!
//! - Production Runtime: the client uses real system time and OS entropy
//!   without any change to the state machines.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::Duration;

use crate::timer::TimePoint;

/// Abstract environment providing time, randomness, and async sleeping.
///
/// State machines in this crate never call the environment directly; they
/// receive `now` as an argument. The coordinating application layer reads the
/// environment and hands the values down.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type used for every deadline.
    type Instant: TimePoint + Send + Sync + 'static;

    /// Returns the current monotonic time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Wall-clock milliseconds since the Unix epoch.
    ///
    /// Only used to stamp chat messages for display; never used for ordering.
    fn unix_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this. State machines expose deadlines instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Determinism during simulations: Given the same RNG seed, this produces
    ///   the same sequence of bytes
    /// - Unpredictability in production: Uses OS entropy
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
