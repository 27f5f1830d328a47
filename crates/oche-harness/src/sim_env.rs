//! Simulated environment on tokio's clock and a seeded RNG.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use oche_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;

/// Wall-clock milliseconds the simulation pretends to start at.
const EPOCH_MS: u64 = 1_735_689_600_000;

/// Deterministic environment for simulation.
///
/// Time is tokio's clock, so under `start_paused` it only moves when the test
/// advances it (or every task is idle and auto-advance kicks in). Randomness
/// comes from a `ChaCha8` stream seeded at construction; clones share the
/// stream.
#[derive(Debug, Clone)]
pub struct SimEnv {
    origin: Instant,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { origin: Instant::now(), rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }

    /// Time since the environment was created.
    pub fn elapsed(&self) -> Duration {
        Instant::now() - self.origin
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        EPOCH_MS.saturating_add(u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);

        assert_eq!(a.random_u64(), b.random_u64());
        assert_eq!(a.random_u64(), b.random_u64());
    }

    #[test]
    fn clones_share_the_stream() {
        let a = SimEnv::with_seed(7);
        let b = a.clone();
        let fresh = SimEnv::with_seed(7);

        let first = a.random_u64();
        assert_eq!(first, fresh.random_u64());
        assert_ne!(b.random_u64(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn time_moves_only_when_advanced() {
        let env = SimEnv::new();
        let start = env.now();
        let wall = env.unix_millis();

        tokio::time::advance(Duration::from_millis(1500)).await;

        assert_eq!(env.now() - start, Duration::from_millis(1500));
        assert_eq!(env.unix_millis() - wall, 1500);
    }
}
