//! Production environment: system clocks, OS randomness, tokio sleep.
//!
//! Hub and participant processes run on `SystemEnv`. Nothing about it is
//! reproducible; deterministic runs use the harness environment instead.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use cosim_core::Environment;

/// Production environment using the system clocks and OS randomness.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> Duration {
        // A clock set before 1970 reports zero rather than failing status
        // stamping.
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1);
    }

    #[test]
    fn wall_clock_is_after_the_epoch() {
        let env = SystemEnv::new();
        assert!(env.wall_clock() > Duration::from_secs(1_600_000_000));
    }

    #[test]
    fn random_bytes_differ() {
        let env = SystemEnv::new();

        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);

        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn sleep_waits() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_millis(50)).await;

        assert!(env.now() - start >= Duration::from_millis(50));
    }
}
