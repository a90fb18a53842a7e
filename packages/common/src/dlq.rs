use serde::{Deserialize, Serialize};

use crate::mq::{Message, MessageEnvelope};
use crate::retry::RetryAttempt;

/// Error codes for dead-lettered messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqErrorCode {
    /// All redelivery attempts exhausted.
    MaxRetriesExceeded,
    /// Failed to deserialize message payload.
    DeserializationError,
    /// Handler reported a failure that redelivery cannot fix.
    PermanentFailure,
    /// Message outlived the queue's time-to-live before it was handled.
    Expired,
}

impl DlqErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::DeserializationError => "DESERIALIZATION_ERROR",
            Self::PermanentFailure => "PERMANENT_FAILURE",
            Self::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for DlqErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Envelope for transporting failed messages to a dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEnvelope {
    /// Original message ID.
    pub message_id: String,
    /// Original message type.
    pub message_type: String,
    /// Queue the message was consumed from.
    pub source_queue: String,
    pub routing_key: String,
    /// Full serialized message payload.
    pub payload: serde_json::Value,
    /// Machine-readable error code.
    pub error_code: DlqErrorCode,
    /// Human-readable error message.
    pub error_message: String,
    /// History of attempts before reaching the DLQ.
    pub retry_history: Vec<RetryAttempt>,
}

impl DlqEnvelope {
    pub fn from_envelope(
        envelope: &MessageEnvelope,
        source_queue: impl Into<String>,
        error_code: DlqErrorCode,
        error_message: impl Into<String>,
        retry_history: Vec<RetryAttempt>,
    ) -> Self {
        Self {
            message_id: envelope.message_id.clone(),
            message_type: envelope.message_type.clone(),
            source_queue: source_queue.into(),
            routing_key: envelope.routing_key.clone(),
            payload: envelope.payload.clone(),
            error_code,
            error_message: error_message.into(),
            retry_history,
        }
    }
}

impl Message for DlqEnvelope {
    fn message_type() -> &'static str {
        "dead_letter"
    }

    fn routing_key(&self) -> String {
        self.routing_key.clone()
    }

    fn message_id(&self) -> String {
        self.message_id.clone()
    }
}

/// Name of the dead-letter queue paired with `queue`.
pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}.dead-letter")
}

/// Name of the dead-letter exchange paired with `exchange`.
pub fn dead_letter_exchange_name(exchange: &str) -> String {
    format!("{exchange}.dlx")
}
