//! Production environment using the tokio clock and OS randomness.
//!
//! `SystemEnv` reads `tokio::time::Instant`, so a paused tokio clock in tests
//! also pauses the session's timers.

use chrono::{DateTime, Utc};
use sparkchat_core::env::Environment;
use tracing::warn;

/// Production environment.
///
/// Randomness only seeds temporary message ids, so an OS RNG failure is
/// logged and the wall clock used instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(error) = getrandom::fill(buffer) {
            warn!(%error, "OS RNG unavailable, falling back to clock entropy");
            let nanos = self.wall_clock().timestamp_nanos_opt().unwrap_or_default().to_le_bytes();
            for (byte, seed) in buffer.iter_mut().zip(nanos.iter().cycle()) {
                *byte = *seed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn time_follows_the_tokio_clock() {
        let env = SystemEnv::new();

        let t1 = env.now();
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(env.now() - t1, Duration::from_secs(3));
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
}
