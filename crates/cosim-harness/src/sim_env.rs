//! Simulated environment with a virtual clock and seeded randomness.
//!
//! Time only moves when the simulation advances it, and every random byte
//! comes from a ChaCha stream seeded by the test. Two runs with the same seed
//! and the same schedule are identical.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use cosim_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seed used by [`SimEnv::new`].
pub const DEFAULT_SEED: u64 = 0x5EED;

struct Clock {
    now: Duration,
    rng: ChaCha8Rng,
}

/// Deterministic environment shared by every participant of a simulation.
///
/// Clones share the clock and the random stream.
#[derive(Clone)]
pub struct SimEnv {
    clock: Arc<Mutex<Clock>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("now", &self.now()).finish_non_exhaustive()
    }
}

impl SimEnv {
    /// Environment seeded with [`DEFAULT_SEED`].
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment whose random stream starts from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            clock: Arc::new(Mutex::new(Clock {
                now: Duration::ZERO,
                rng: ChaCha8Rng::seed_from_u64(seed),
            })),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.lock().now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for SimEnv {
    type Instant = Duration;

    fn now(&self) -> Duration {
        self.lock().now
    }

    fn wall_clock(&self) -> Duration {
        self.now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}
