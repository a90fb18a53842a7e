use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections::HashMap, fmt::Debug};
use thiserror::Error;
use tracing::{debug, error};

/// Core trait for everything published on the event bus.
pub trait Message: Serialize + DeserializeOwned + Debug + Send + Sync + Clone {
    fn message_type() -> &'static str
    where
        Self: Sized;

    /// Routing key used on a topic exchange. Defaults to the message type.
    fn routing_key(&self) -> String
    where
        Self: Sized,
    {
        Self::message_type().to_string()
    }

    /// Stable id for idempotent consumers. A fresh id when the payload has none.
    fn message_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Transport headers carried alongside a payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Publish time, unix millis.
    pub timestamp: i64,
    /// Redeliveries so far.
    pub retry_count: u8,
    pub source: Option<String>,
    pub correlation_id: Option<String>,
    pub custom_headers: HashMap<String, String>,
}

impl MessageMetadata {
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    /// Age of the message in milliseconds relative to `now_millis`.
    pub fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.timestamp)
    }
}

/// Message envelope for transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_type: String,
    pub message_id: String,
    pub metadata: MessageMetadata,
    pub payload: serde_json::Value,
    /// Routing key on the topic exchange.
    pub routing_key: String,
}

impl MessageEnvelope {
    /// Create envelope from typed message
    pub fn from_message<M: Message>(message: &M) -> Result<Self, MessageError> {
        let message_type = M::message_type().to_string();
        let message_id = message.message_id();
        let routing_key = message.routing_key();

        debug!(
            message_type = %message_type,
            message_id = %message_id,
            routing_key = %routing_key,
            "Creating message envelope"
        );

        Ok(Self {
            message_type,
            message_id,
            metadata: MessageMetadata::now(),
            payload: serde_json::to_value(message)?,
            routing_key,
        })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    /// Deserialize into typed message
    pub fn into_message<M: Message>(self) -> Result<M, MessageError> {
        self.to_message()
    }

    /// Deserialize without consuming the envelope, so it can still be dead-lettered.
    pub fn to_message<M: Message>(&self) -> Result<M, MessageError> {
        if self.message_type != M::message_type() {
            error!(
                expected = M::message_type(),
                actual = %self.message_type,
                message_id = %self.message_id,
                "Message type mismatch"
            );
            return Err(MessageError::TypeMismatch {
                expected: M::message_type().to_string(),
                actual: self.message_type.clone(),
            });
        }

        serde_json::from_value(self.payload.clone()).map_err(|e| {
            error!(error = %e, message_id = %self.message_id, "Deserialization failed");
            MessageError::Serialization(e)
        })
    }
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Ping {
        id: String,
    }

    impl Message for Ping {
        fn message_type() -> &'static str {
            "ping"
        }

        fn message_id(&self) -> String {
            self.id.clone()
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Pong;

    impl Message for Pong {
        fn message_type() -> &'static str {
            "pong"
        }
    }

    #[test]
    fn test_envelope_carries_type_id_and_routing_key() {
        let envelope = MessageEnvelope::from_message(&Ping { id: "p-1".into() }).unwrap();
        assert_eq!(envelope.message_type, "ping");
        assert_eq!(envelope.message_id, "p-1");
        assert_eq!(envelope.routing_key, "ping");
        assert_eq!(envelope.metadata.retry_count, 0);
        assert!(envelope.metadata.timestamp > 0);

        let back: Ping = envelope.into_message().unwrap();
        assert_eq!(back, Ping { id: "p-1".into() });
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let envelope = MessageEnvelope::from_message(&Ping { id: "p".into() }).unwrap();
        let result = envelope.to_message::<Pong>();
        assert!(matches!(result, Err(MessageError::TypeMismatch { .. })));
    }

    #[test]
    fn test_default_message_id_is_unique() {
        assert_ne!(Pong.message_id(), Pong.message_id());
    }
}
