use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single failed delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u8,
    /// Error message from the failed attempt.
    pub error: String,
    /// When this attempt occurred.
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u8, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// How a handler failure should be treated by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// I/O or connectivity trouble; worth redelivering.
    Transient,
    /// Redelivery would fail the same way.
    Permanent,
}

/// What to do with a message whose handler failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeliveryDecision {
    /// Put the message back on its queue with `retry_count = attempt` after `delay`.
    Requeue { attempt: u8, delay: Duration },
    /// Give up and route the message to the dead-letter queue.
    DeadLetter,
}

/// Redelivery policy. The retry count travels in the message headers so
/// every consumer instance reaches the same decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u8,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Decide the fate of a message that has already been redelivered
    /// `retry_count` times and just failed with `kind`.
    pub fn decide(&self, retry_count: u8, kind: FailureKind) -> RedeliveryDecision {
        match kind {
            FailureKind::Permanent => RedeliveryDecision::DeadLetter,
            FailureKind::Transient if retry_count >= self.max_retries => {
                RedeliveryDecision::DeadLetter
            }
            FailureKind::Transient => {
                let attempt = retry_count + 1;
                RedeliveryDecision::Requeue {
                    attempt,
                    delay: calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms),
                }
            }
        }
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow((attempt - 1) as u32);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    let total_delay = delay_ms.saturating_add(jitter).min(max_ms);
    Duration::from_millis(total_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_backoff_basic() {
        let d1 = calculate_backoff(1, 1000, 60000);
        assert!(d1.as_millis() >= 1000 && d1.as_millis() <= 1250);

        let d2 = calculate_backoff(2, 1000, 60000);
        assert!(d2.as_millis() >= 2000 && d2.as_millis() <= 2500);

        let d3 = calculate_backoff(3, 1000, 60000);
        assert!(d3.as_millis() >= 4000 && d3.as_millis() <= 5000);
    }

    #[test]
    fn test_calculate_backoff_respects_max() {
        let d = calculate_backoff(10, 10000, 60000);
        assert!(d.as_millis() <= 60000);
    }

    #[test]
    fn test_calculate_backoff_zero_attempt() {
        assert_eq!(calculate_backoff(0, 1000, 60000), Duration::ZERO);
    }

    #[test]
    fn test_transient_failures_requeue_until_exhausted() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };

        match policy.decide(0, FailureKind::Transient) {
            RedeliveryDecision::Requeue { attempt, .. } => assert_eq!(attempt, 1),
            other => panic!("expected Requeue, got {other:?}"),
        }
        match policy.decide(1, FailureKind::Transient) {
            RedeliveryDecision::Requeue { attempt, delay } => {
                assert_eq!(attempt, 2);
                assert!(delay.as_millis() <= 100);
            }
            other => panic!("expected Requeue, got {other:?}"),
        }
        assert_eq!(
            policy.decide(2, FailureKind::Transient),
            RedeliveryDecision::DeadLetter
        );
    }

    #[test]
    fn test_permanent_failure_dead_letters_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, FailureKind::Permanent),
            RedeliveryDecision::DeadLetter
        );
    }
}
