pub mod consumers;
pub mod engine;
pub mod error;
pub mod events;
pub mod handlers;
pub mod queue;
pub mod repository;
pub mod scanner;
pub mod service;
pub mod validation;

pub use consumers::{ModEventConsumer, UserEventConsumer};
pub use engine::{EngineConfig, EngineStats, ProcessingEngine};
pub use error::FileError;
pub use events::FileEvents;
pub use handlers::{OperationHandlers, ProcessingSettings};
pub use queue::ProcessingQueue;
pub use repository::{
    FileMetadataRepository, InMemoryFileMetadataRepository, InMemoryScanResultRepository,
    ScanResultRepository,
};
pub use scanner::{ClamAvScanner, ScanOutcome, VirusScanner};
pub use service::{DownloadedFile, FileService, UploadRequest};
pub use validation::{FileValidator, UploadDescriptor, ValidationResult};
