//! Environment abstraction for deterministic testing.
//!
//! Decouples the state machines from system resources (time, randomness).
//! The harness supplies a virtual clock and a seeded RNG; production uses the
//! system clock and OS entropy.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async primitives.
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `wall_clock()` is the same clock `now()` advances with, expressed as a
///   duration since the Unix epoch
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type of the monotonic clock.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Wall-clock time since the Unix epoch, used to stamp participant
    /// status reports.
    fn wall_clock(&self) -> Duration;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this; the state machines never do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Given the same seed, a simulated environment produces the same
    /// sequence.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
