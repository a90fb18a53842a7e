use common::storage::StorageError;
use files::FileError;
use mq::MqError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("MQ error: {0}")]
    Mq(#[from] MqError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("File processing error: {0}")]
    Files(#[from] FileError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
