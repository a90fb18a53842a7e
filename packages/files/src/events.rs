use std::sync::Arc;

use chrono::Utc;
use common::event::{
    FileDeleted, FileProcessingError, FileScanned, FileUploaded, FileVisibilityChanged,
};
use common::mq::Message;
use common::{FileMetadata, FileOperation, ScanRecord};
use mq::{EventBus, EventBusExt};
use tracing::error;
use uuid::Uuid;

/// Publishes file lifecycle events on the files exchange.
///
/// Publishing is best effort: a failure is logged and never undoes the
/// state change the event describes.
#[derive(Clone)]
pub struct FileEvents {
    bus: Arc<dyn EventBus>,
    exchange: String,
}

impl FileEvents {
    pub fn new(bus: Arc<dyn EventBus>, exchange: impl Into<String>) -> Self {
        Self {
            bus,
            exchange: exchange.into(),
        }
    }

    async fn publish<M: Message + 'static>(&self, event: &M, file_id: Uuid) {
        if let Err(e) = self.bus.publish(&self.exchange, event).await {
            error!(
                file_id = %file_id,
                event = M::message_type(),
                error = %e,
                "Failed to publish file event"
            );
        }
    }

    pub async fn uploaded(&self, meta: &FileMetadata) {
        self.publish(&FileUploaded::from_metadata(meta), meta.id).await;
    }

    pub async fn scanned(&self, record: &ScanRecord) {
        self.publish(&FileScanned::from_record(record), record.file_metadata_id)
            .await;
    }

    pub async fn visibility_changed(&self, file_id: Uuid, is_public: bool) {
        let event = FileVisibilityChanged {
            file_id,
            is_public,
            timestamp: Utc::now(),
        };
        self.publish(&event, file_id).await;
    }

    pub async fn processing_error(&self, file_id: Uuid, operation: FileOperation, message: &str) {
        let event = FileProcessingError {
            file_id,
            error_message: message.to_string(),
            operation,
            timestamp: Utc::now(),
        };
        self.publish(&event, file_id).await;
    }

    pub async fn deleted(&self, file_id: Uuid) {
        let event = FileDeleted {
            file_id,
            timestamp: Utc::now(),
        };
        self.publish(&event, file_id).await;
    }
}
