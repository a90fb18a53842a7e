pub mod config;
pub mod dlq;
pub mod event;
pub mod file;
pub mod mq;
pub mod retry;
pub mod storage;

pub use file::{
    FileMetadata, FileOperation, FileProcessingItem, FileStatus, OwningEntity, ProcessingPriority,
    ScanRecord, ScanStatus, StorageTier,
};
