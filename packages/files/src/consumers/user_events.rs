use std::sync::Arc;

use chrono::Utc;
use common::event::{
    ExportedFile, UserDataExportRequested, UserDataExportResponse, UserDeleted, UserUpdated,
};
use common::file::metadata_keys;
use common::{FileOperation, FileProcessingItem};
use mq::{EventBus, EventBusExt};
use tracing::{error, info};

use crate::error::FileError;
use crate::queue::ProcessingQueue;
use crate::repository::{FileMetadataRepository, MetadataChange, ignore_missing};

/// Name this service reports in data export responses.
pub const EXPORT_SERVICE_NAME: &str = "file-service";

pub struct UserEventConsumer {
    files: Arc<dyn FileMetadataRepository>,
    queue: Arc<ProcessingQueue>,
    bus: Arc<dyn EventBus>,
    users_exchange: String,
}

impl UserEventConsumer {
    pub fn new(
        files: Arc<dyn FileMetadataRepository>,
        queue: Arc<ProcessingQueue>,
        bus: Arc<dyn EventBus>,
        users_exchange: impl Into<String>,
    ) -> Self {
        Self {
            files,
            queue,
            bus,
            users_exchange: users_exchange.into(),
        }
    }

    /// Hard delete queues every file for deletion; soft delete anonymizes.
    pub async fn on_deleted(&self, event: UserDeleted) -> Result<(), FileError> {
        if event.hard_delete {
            let files = self.files.get_by_user(&event.user_id).await?;
            if files.is_empty() {
                info!(user_id = %event.user_id, "No files owned by deleted user");
                return Ok(());
            }
            for file in &files {
                self.queue
                    .enqueue(FileProcessingItem::new(file.id, FileOperation::Delete));
            }
            info!(user_id = %event.user_id, count = files.len(), "Queued user files for deletion");
            return Ok(());
        }

        let changed = self.files.anonymize_user_files(&event.user_id).await?;
        info!(user_id = %event.user_id, changed, "Anonymized user files");
        Ok(())
    }

    pub async fn on_updated(&self, event: UserUpdated) -> Result<(), FileError> {
        let files = self.files.get_by_user(&event.user_id).await?;
        let mut changed = 0;
        for file in files {
            let username = event.username.clone();
            let change: MetadataChange = Box::new(move |m| {
                if m.custom_metadata.get(metadata_keys::UPLOADER_NAME) == Some(&username) {
                    return false;
                }
                m.custom_metadata
                    .insert(metadata_keys::UPLOADER_NAME.to_string(), username);
                m.touch();
                true
            });
            let updated = ignore_missing(self.files.modify(file.id, change).await)?;
            if updated.is_some() {
                changed += 1;
            }
        }
        if changed > 0 {
            info!(user_id = %event.user_id, changed, "Updated uploader name on files");
        }
        Ok(())
    }

    /// Always answers: a lookup failure is reported inside the response.
    pub async fn on_export_requested(
        &self,
        event: UserDataExportRequested,
    ) -> Result<(), FileError> {
        let (files, error) = match self.files.get_by_user(&event.user_id).await {
            Ok(files) => (files.iter().map(ExportedFile::from).collect(), None),
            Err(e) => {
                error!(
                    user_id = %event.user_id,
                    request_id = %event.request_id,
                    error = %e,
                    "Failed to gather files for data export"
                );
                (Vec::new(), Some(e.to_string()))
            }
        };

        let response = UserDataExportResponse {
            request_id: event.request_id,
            user_id: event.user_id,
            service: EXPORT_SERVICE_NAME.to_string(),
            files,
            error,
            timestamp: Utc::now(),
        };
        self.bus.publish(&self.users_exchange, &response).await?;
        info!(
            user_id = %response.user_id,
            request_id = %response.request_id,
            files = response.files.len(),
            "Data export response published"
        );
        Ok(())
    }
}
