//! Environment abstraction for deterministic testing.
//!
//! Decouples chat logic from system resources (time, randomness). Tests drive
//! a manually advanced clock; production uses the system clock. There is no
//! async sleep here: drivers own their timers and only ask the environment what
//! time it is.

use std::{
    ops::{Add, Sub},
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Monotonic instant usable by the state machines.
///
/// Blanket-implemented for any type with the required arithmetic, so
/// `std::time::Instant` and `tokio::time::Instant` both qualify.
pub trait MonotonicInstant:
    Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

impl<T> MonotonicInstant for T where
    T: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = T>
{
}

/// Abstract environment providing time and randomness.
///
/// # Invariants
///
/// Implementations MUST guarantee that `now()` never goes backwards. The wall
/// clock may jump (NTP adjustments), which is why timers use `now()` and only
/// message timestamps use `wall_clock()`.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used for timers.
    type Instant: MonotonicInstant;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time, used to stamp locally created messages.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Deterministic environment for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use std::{
        sync::{Arc, Mutex, PoisonError},
        time::{Duration, Instant},
    };

    use chrono::{DateTime, TimeDelta, Utc};

    use super::Environment;

    /// Wall-clock origin of every [`MockEnv`]: 2023-11-14T22:13:20Z.
    pub const MOCK_EPOCH_SECS: i64 = 1_700_000_000;

    /// Environment with a clock that only moves when told to.
    ///
    /// Clones share the same clock, so a test can hand one clone to the code
    /// under test and advance time through another.
    #[derive(Clone, Debug)]
    pub struct MockEnv {
        origin: Instant,
        offset: Arc<Mutex<Duration>>,
        rng_state: Arc<Mutex<u64>>,
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockEnv {
        /// Create a mock environment at time zero.
        #[allow(clippy::disallowed_methods)]
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
                rng_state: Arc::new(Mutex::new(0x5eed)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
            *offset += by;
        }

        /// Time elapsed since creation.
        pub fn elapsed(&self) -> Duration {
            *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn wall_clock(&self) -> DateTime<Utc> {
            let origin = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(MOCK_EPOCH_SECS);
            let elapsed = TimeDelta::from_std(self.elapsed()).unwrap_or(TimeDelta::MAX);
            origin + elapsed
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            // xorshift64, deterministic across runs
            let mut state = self.rng_state.lock().unwrap_or_else(PoisonError::into_inner);
            for byte in buffer.iter_mut() {
                *state ^= *state << 13;
                *state ^= *state >> 7;
                *state ^= *state << 17;
                *byte = (*state & 0xff) as u8;
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn clones_share_the_clock() {
            let env = MockEnv::new();
            let other = env.clone();

            let t0 = env.now();
            other.advance(Duration::from_secs(3));

            assert_eq!(env.now() - t0, Duration::from_secs(3));
            assert_eq!(env.wall_clock().timestamp(), MOCK_EPOCH_SECS + 3);
        }

        #[test]
        fn random_sequence_is_deterministic() {
            let a = MockEnv::new();
            let b = MockEnv::new();
            assert_eq!(a.random_u64(), b.random_u64());
            assert_ne!(a.random_u64(), a.random_u64());
        }
    }
}
