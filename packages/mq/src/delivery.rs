use std::time::Duration;

use common::dlq::{DlqEnvelope, DlqErrorCode};
use common::mq::MessageEnvelope;
use common::retry::{RedeliveryDecision, RetryAttempt, RetryPolicy};
use tracing::{error, warn};

use crate::error::HandlerError;

/// What to do with an envelope after its handler ran.
#[derive(Debug)]
pub enum Settlement {
    Ack,
    Requeue {
        envelope: MessageEnvelope,
        delay: Duration,
    },
    DeadLetter(DlqEnvelope),
}

/// Redelivery rules shared by every bus implementation.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    pub retry: RetryPolicy,
    /// Messages older than this are dead-lettered unprocessed.
    pub message_ttl: Option<Duration>,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            message_ttl: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

impl DeliveryPolicy {
    pub fn is_expired(&self, envelope: &MessageEnvelope, now_millis: i64) -> bool {
        match self.message_ttl {
            Some(ttl) => envelope.metadata.age_millis(now_millis) > ttl.as_millis() as i64,
            None => false,
        }
    }

    pub fn expired(&self, envelope: &MessageEnvelope, queue: &str) -> Settlement {
        warn!(
            message_id = %envelope.message_id,
            queue,
            "Message expired before delivery"
        );
        Settlement::DeadLetter(DlqEnvelope::from_envelope(
            envelope,
            queue,
            DlqErrorCode::Expired,
            "message ttl exceeded",
            vec![],
        ))
    }

    pub fn settle(
        &self,
        mut envelope: MessageEnvelope,
        queue: &str,
        result: Result<(), HandlerError>,
    ) -> Settlement {
        let err = match result {
            Ok(()) => return Settlement::Ack,
            Err(e) => e,
        };

        let retry_count = envelope.metadata.retry_count;
        match self.retry.decide(retry_count, err.kind()) {
            RedeliveryDecision::Requeue { attempt, delay } => {
                warn!(
                    message_id = %envelope.message_id,
                    queue,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Requeueing message"
                );
                envelope.metadata.retry_count = attempt;
                Settlement::Requeue { envelope, delay }
            }
            RedeliveryDecision::DeadLetter => {
                let code = match err {
                    HandlerError::Permanent(_) => DlqErrorCode::PermanentFailure,
                    HandlerError::Transient(_) => DlqErrorCode::MaxRetriesExceeded,
                };
                error!(
                    message_id = %envelope.message_id,
                    queue,
                    retry_count,
                    error_code = %code,
                    error = %err,
                    "Sending message to dead-letter queue"
                );
                let history = vec![RetryAttempt::new(retry_count, err.to_string())];
                Settlement::DeadLetter(DlqEnvelope::from_envelope(
                    &envelope,
                    queue,
                    code,
                    err.to_string(),
                    history,
                ))
            }
        }
    }
}
