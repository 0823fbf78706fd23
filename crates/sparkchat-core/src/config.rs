//! Tunable timing constants.
//!
//! The duplicate window and typing expiry are empirical values with no
//! protocol meaning, so they live here instead of being baked into the state
//! machines. Durations are (de)serialized as integer milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Two messages from the same sender with the same text are the same message
/// if their timestamps differ by at most this much.
pub const DEFAULT_DEDUP_TOLERANCE: Duration = Duration::from_secs(1);

/// Minimum spacing between outbound typing events.
pub const DEFAULT_TYPING_THROTTLE: Duration = Duration::from_secs(1);

/// Peer typing indicator clears this long after the last signal.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Reconnect attempts after an unsolicited drop.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);

/// Upper bound on the reconnect delay.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(5);

/// Delay between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed {
        /// Delay in milliseconds.
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// Delay doubles per attempt, capped at `max`.
    Exponential {
        /// Delay before the first attempt.
        #[serde(with = "duration_ms")]
        base: Duration,
        /// Upper bound.
        #[serde(with = "duration_ms")]
        max: Duration,
    },
}

impl Backoff {
    /// Delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(max)
            },
        }
    }
}

/// Bounded reconnect policy for the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after a drop before giving up. Zero disables reconnecting.
    pub max_attempts: u32,
    /// Delay strategy.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy that never reconnects.
    pub const fn never() -> Self {
        Self { max_attempts: 0, backoff: Backoff::Fixed { delay: Duration::ZERO } }
    }

    /// Delay before `attempt`, or `None` once the policy is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (attempt >= 1 && attempt <= self.max_attempts).then(|| self.backoff.delay_for(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            backoff: Backoff::Exponential {
                base: DEFAULT_RECONNECT_BASE,
                max: DEFAULT_RECONNECT_MAX,
            },
        }
    }
}

/// Configuration for one chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Duplicate-detection window.
    #[serde(with = "duration_ms")]
    pub dedup_tolerance: Duration,
    /// Minimum spacing between outbound typing events.
    #[serde(with = "duration_ms")]
    pub typing_throttle: Duration,
    /// Peer typing indicator lifetime.
    #[serde(with = "duration_ms")]
    pub typing_expiry: Duration,
    /// Live channel reconnect policy.
    pub retry: RetryPolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            dedup_tolerance: DEFAULT_DEDUP_TOLERANCE,
            typing_throttle: DEFAULT_TYPING_THROTTLE,
            typing_expiry: DEFAULT_TYPING_EXPIRY,
            retry: RetryPolicy::default(),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_allows_five_attempts() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for(6), None);
    }

    #[test]
    fn never_policy_is_exhausted_immediately() {
        assert_eq!(RetryPolicy::never().delay_for(1), None);
    }

    #[test]
    fn exponential_backoff_does_not_overflow() {
        let backoff = Backoff::Exponential { base: Duration::from_secs(1), max: Duration::MAX };
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(1 << 16));
    }

    #[test]
    fn config_reads_millisecond_fields_and_fills_defaults() {
        let config: ChatConfig = serde_json::from_str(
            r#"{"typing_expiry": 5000, "retry": {"max_attempts": 2, "backoff": {"kind": "fixed", "delay": 250}}}"#,
        )
        .unwrap();

        assert_eq!(config.typing_expiry, Duration::from_secs(5));
        assert_eq!(config.dedup_tolerance, DEFAULT_DEDUP_TOLERANCE);
        assert_eq!(config.retry.delay_for(2), Some(Duration::from_millis(250)));
        assert_eq!(config.retry.delay_for(3), None);
    }
}
