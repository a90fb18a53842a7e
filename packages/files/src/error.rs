use common::FileStatus;
use common::storage::StorageError;
use mq::{HandlerError, MqError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("user {user_id} is not allowed to access file {file_id}")]
    Unauthorized { user_id: String, file_id: Uuid },

    #[error("file {0} is quarantined")]
    Quarantined(Uuid),

    #[error("file {file_id} is not available (status {status})")]
    NotAvailable { file_id: Uuid, status: FileStatus },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("virus scan failed: {0}")]
    Scan(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error(transparent)]
    Bus(#[from] MqError),

    #[error("processing failed: {0}")]
    Processing(String),
}

impl FileError {
    pub fn file_not_found(id: Uuid) -> Self {
        Self::NotFound {
            kind: "file",
            id: id.to_string(),
        }
    }

    pub fn blob_not_found(key: &str) -> Self {
        Self::NotFound {
            kind: "blob",
            id: key.to_string(),
        }
    }

    /// Whether the same call could succeed if retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Repository(_) | Self::Bus(_) => true,
            _ => false,
        }
    }
}

impl From<FileError> for HandlerError {
    fn from(e: FileError) -> Self {
        if e.is_transient() {
            HandlerError::Transient(e.to_string())
        } else {
            HandlerError::Permanent(e.to_string())
        }
    }
}
