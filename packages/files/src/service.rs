use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::config::FilesConfig;
use common::storage::{BlobStore, BoxReader, SasPermissions};
use common::{
    FileMetadata, FileOperation, FileProcessingItem, FileStatus, OwningEntity, StorageTier,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::FileError;
use crate::events::FileEvents;
use crate::handlers::OperationHandlers;
use crate::queue::ProcessingQueue;
use crate::repository::FileMetadataRepository;
use crate::validation::{FileValidator, UploadDescriptor};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub user_id: String,
    pub owner: Option<OwningEntity>,
    pub is_public: bool,
    /// Skip the owning-entity requirement, e.g. for avatars.
    pub waive_entity_requirement: bool,
    pub custom_metadata: HashMap<String, String>,
}

impl UploadRequest {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data,
            user_id: user_id.into(),
            owner: None,
            is_public: false,
            waive_entity_requirement: false,
            custom_metadata: HashMap::new(),
        }
    }

    pub fn owned_by(mut self, owner: OwningEntity) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }
}

pub struct DownloadedFile {
    pub metadata: FileMetadata,
    pub content: BoxReader,
}

/// User-facing file operations. Heavy work is handed to the processing queue.
pub struct FileService {
    files: Arc<dyn FileMetadataRepository>,
    storage: Arc<dyn BlobStore>,
    queue: Arc<ProcessingQueue>,
    handlers: Arc<OperationHandlers>,
    events: FileEvents,
    validator: FileValidator,
    config: FilesConfig,
}

impl FileService {
    pub fn new(
        files: Arc<dyn FileMetadataRepository>,
        storage: Arc<dyn BlobStore>,
        queue: Arc<ProcessingQueue>,
        handlers: Arc<OperationHandlers>,
        events: FileEvents,
        config: FilesConfig,
    ) -> Self {
        Self {
            files,
            storage,
            queue,
            handlers,
            events,
            validator: FileValidator::new(&config),
            config,
        }
    }

    pub async fn get(&self, file_id: Uuid) -> Result<FileMetadata, FileError> {
        self.files
            .get_by_id(file_id)
            .await?
            .ok_or_else(|| FileError::file_not_found(file_id))
    }

    /// Validate, store and register a new file, then queue its scan.
    ///
    /// Nothing is written when validation fails.
    pub async fn upload(&self, request: UploadRequest) -> Result<FileMetadata, FileError> {
        let descriptor = UploadDescriptor {
            file_name: request.file_name.clone(),
            content_type: request.content_type.clone(),
            size: request.data.len() as u64,
            owner: request.owner.clone(),
        };
        let validation =
            self.validator
                .validate(&descriptor, &request.data, request.waive_entity_requirement);
        if !validation.is_valid {
            warn!(
                user_id = %request.user_id,
                file_name = %request.file_name,
                errors = ?validation.errors,
                "Upload rejected"
            );
        }
        validation.into_result()?;

        let tier = StorageTier::for_visibility(request.is_public);
        let key = self
            .storage
            .upload_bytes(&request.data, &request.file_name, &request.content_type, tier)
            .await?;

        let mut meta = FileMetadata::new_pending(
            request.file_name,
            request.content_type,
            descriptor.size,
            request.user_id,
            request.owner,
            request.is_public,
            key,
        );
        meta.custom_metadata = request.custom_metadata;

        if let Err(e) = self.files.create(&meta).await {
            if let Err(cleanup) = self.storage.delete(&meta.storage_location, tier).await {
                warn!(key = %meta.storage_location, error = %cleanup, "Failed to remove orphaned blob");
            }
            return Err(e);
        }

        info!(
            file_id = %meta.id,
            user_id = %meta.user_id,
            owner = ?meta.owner,
            size = meta.file_size_bytes,
            "File uploaded"
        );
        self.events.uploaded(&meta).await;

        self.queue.enqueue(
            FileProcessingItem::new(meta.id, FileOperation::ScanForViruses).with_user(&meta.user_id),
        );
        if self.config.auto_generate_thumbnails && meta.is_image() {
            self.queue.enqueue(
                FileProcessingItem::new(meta.id, FileOperation::GenerateThumbnail)
                    .with_user(&meta.user_id),
            );
        }
        Ok(meta)
    }

    fn check_read_access(meta: &FileMetadata, user_id: Option<&str>) -> Result<(), FileError> {
        if !meta.is_public && user_id != Some(meta.user_id.as_str()) {
            return Err(FileError::Unauthorized {
                user_id: user_id.unwrap_or("anonymous").to_string(),
                file_id: meta.id,
            });
        }
        match meta.status {
            FileStatus::Available => Ok(()),
            FileStatus::Quarantined => Err(FileError::Quarantined(meta.id)),
            status => Err(FileError::NotAvailable {
                file_id: meta.id,
                status,
            }),
        }
    }

    fn check_owner(meta: &FileMetadata, user_id: &str) -> Result<(), FileError> {
        if meta.user_id != user_id {
            return Err(FileError::Unauthorized {
                user_id: user_id.to_string(),
                file_id: meta.id,
            });
        }
        Ok(())
    }

    pub async fn download(
        &self,
        file_id: Uuid,
        user_id: Option<&str>,
    ) -> Result<DownloadedFile, FileError> {
        let mut meta = self.get(file_id).await?;
        Self::check_read_access(&meta, user_id)?;

        let content = self
            .storage
            .download(&meta.storage_location, meta.storage_container)
            .await?
            .ok_or_else(|| FileError::blob_not_found(&meta.storage_location))?;

        if self.config.track_downloads {
            let accessed = Utc::now();
            let tracked = self
                .files
                .modify(
                    file_id,
                    Box::new(move |m| {
                        m.download_count += 1;
                        m.last_accessed = Some(accessed);
                        true
                    }),
                )
                .await;
            match tracked {
                Ok(Some(updated)) => meta = updated,
                Ok(None) => {}
                Err(e) => warn!(file_id = %meta.id, error = %e, "Failed to record download"),
            }
        }
        Ok(DownloadedFile {
            metadata: meta,
            content,
        })
    }

    /// Direct read URL for a file the caller may download.
    pub async fn sas_url(
        &self,
        file_id: Uuid,
        user_id: Option<&str>,
        ttl: Duration,
    ) -> Result<String, FileError> {
        let meta = self.get(file_id).await?;
        Self::check_read_access(&meta, user_id)?;
        Ok(self.storage.generate_sas_url(
            &meta.storage_location,
            meta.storage_container,
            ttl,
            SasPermissions::READ,
        )?)
    }

    /// Queue a move between the public and private tiers.
    pub async fn set_visibility(
        &self,
        file_id: Uuid,
        user_id: &str,
        is_public: bool,
    ) -> Result<(), FileError> {
        let meta = self.get(file_id).await?;
        Self::check_owner(&meta, user_id)?;
        if is_public && meta.status == FileStatus::Quarantined {
            return Err(FileError::Quarantined(meta.id));
        }
        let operation = if is_public {
            FileOperation::MoveToPublicStorage
        } else {
            FileOperation::MoveToPrivateStorage
        };
        self.queue
            .enqueue(FileProcessingItem::new(meta.id, operation).with_user(user_id));
        Ok(())
    }

    /// Owner-initiated delete. The record stays if the blob cannot be removed.
    pub async fn delete_file(&self, file_id: Uuid, user_id: &str) -> Result<(), FileError> {
        let meta = self.get(file_id).await?;
        Self::check_owner(&meta, user_id)?;
        self.handlers.remove_file(&meta, false).await
    }

    /// Queue another scan for a Quarantined or Error file.
    ///
    /// Returns false when the file is in any other state.
    pub async fn rescan(&self, file_id: Uuid) -> Result<bool, FileError> {
        let meta = self.get(file_id).await?;
        if !matches!(meta.status, FileStatus::Quarantined | FileStatus::Error) {
            return Ok(false);
        }
        info!(file_id = %meta.id, status = %meta.status, "Rescan requested");
        self.queue.enqueue(FileProcessingItem::new(
            meta.id,
            FileOperation::ScanForViruses,
        ));
        Ok(true)
    }
}
