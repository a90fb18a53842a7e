use common::mq::MessageError;
use common::retry::FailureKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("Business error: {0}")]
    Business(#[from] MessageError),

    #[error("{0}")]
    Internal(String),
}

impl From<broccoli_queue::error::BroccoliError> for MqError {
    fn from(e: broccoli_queue::error::BroccoliError) -> Self {
        MqError::Internal(e.to_string())
    }
}

/// Failure reported by a message handler.
///
/// Transient failures are redelivered with backoff until the retry budget
/// runs out; permanent failures go straight to the dead-letter queue.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn permanent(err: impl std::fmt::Display) -> Self {
        Self::Permanent(err.to_string())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient(_) => FailureKind::Transient,
            Self::Permanent(_) => FailureKind::Permanent,
        }
    }
}

/// A payload that cannot be decoded will never decode on redelivery.
impl From<MessageError> for HandlerError {
    fn from(e: MessageError) -> Self {
        Self::Permanent(e.to_string())
    }
}
