use std::sync::Arc;

use chrono::Utc;
use common::event::{ModDeleted, ModPublished, ModUpdated};
use common::file::metadata_keys;
use common::{
    FileMetadata, FileOperation, FileProcessingItem, FileStatus, OwningEntity, StorageTier,
};
use tracing::{info, warn};

use crate::error::FileError;
use crate::queue::ProcessingQueue;
use crate::repository::{FileMetadataRepository, MetadataChange, ignore_missing};

/// Keeps files consistent with the mods that own them.
pub struct ModEventConsumer {
    files: Arc<dyn FileMetadataRepository>,
    queue: Arc<ProcessingQueue>,
}

impl ModEventConsumer {
    pub fn new(files: Arc<dyn FileMetadataRepository>, queue: Arc<ProcessingQueue>) -> Self {
        Self { files, queue }
    }

    async fn mod_files(&self, mod_id: &str) -> Result<Vec<FileMetadata>, FileError> {
        let files = self
            .files
            .get_by_entity(&OwningEntity::Mod(mod_id.to_string()))
            .await?;
        if files.is_empty() {
            info!(mod_id, "No files associated with mod");
        }
        Ok(files)
    }

    /// Hard delete queues file deletion; soft delete only tags files orphaned.
    pub async fn on_deleted(&self, event: ModDeleted) -> Result<(), FileError> {
        let files = self.mod_files(&event.mod_id).await?;
        if files.is_empty() {
            return Ok(());
        }

        if event.hard_delete {
            for file in &files {
                self.queue
                    .enqueue(FileProcessingItem::new(file.id, FileOperation::Delete));
            }
            info!(mod_id = %event.mod_id, count = files.len(), "Queued mod files for deletion");
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut tagged = 0;
        for file in files {
            let now = now.clone();
            let change: MetadataChange = Box::new(move |m| {
                if m.is_orphaned() {
                    return false;
                }
                m.custom_metadata
                    .insert(metadata_keys::ORPHANED.to_string(), "true".to_string());
                m.custom_metadata
                    .insert(metadata_keys::ORPHANED_AT.to_string(), now);
                m.custom_metadata.insert(
                    metadata_keys::ORPHANED_REASON.to_string(),
                    "mod-deleted".to_string(),
                );
                m.touch();
                true
            });
            if ignore_missing(self.files.modify(file.id, change).await)?.is_some() {
                tagged += 1;
            }
        }
        info!(mod_id = %event.mod_id, tagged, "Tagged mod files as orphaned");
        Ok(())
    }

    /// Refresh denormalized title/version; a mod turned private pulls its
    /// files back to private storage.
    pub async fn on_updated(&self, event: ModUpdated) -> Result<(), FileError> {
        let files = self.mod_files(&event.mod_id).await?;
        for file in files {
            let title = event.title.clone();
            let version = event.version.clone();
            let is_private = event.is_private;
            let change: MetadataChange = Box::new(move |m| {
                let mut changed = false;
                if let Some(title) = &title {
                    changed |= set_if_different(m, metadata_keys::MOD_TITLE, title);
                }
                if let Some(version) = &version {
                    changed |= set_if_different(m, metadata_keys::MOD_VERSION, version);
                }
                if is_private && m.is_public {
                    m.is_public = false;
                    changed = true;
                }
                if changed {
                    m.touch();
                }
                changed
            });
            ignore_missing(self.files.modify(file.id, change).await)?;

            // The move handler skips files already in private storage.
            if event.is_private && (file.is_public || file.storage_container == StorageTier::Public)
            {
                self.queue.enqueue(FileProcessingItem::new(
                    file.id,
                    FileOperation::MoveToPrivateStorage,
                ));
            }
        }
        Ok(())
    }

    pub async fn on_published(&self, event: ModPublished) -> Result<(), FileError> {
        let files = self.mod_files(&event.mod_id).await?;
        let mut queued = 0;
        for file in files {
            if file.status == FileStatus::Quarantined {
                warn!(file_id = %file.id, mod_id = %event.mod_id, "Not publishing quarantined file");
                continue;
            }
            let change: MetadataChange = Box::new(|m| {
                if m.is_public || m.status == FileStatus::Quarantined {
                    return false;
                }
                m.is_public = true;
                m.touch();
                true
            });
            ignore_missing(self.files.modify(file.id, change).await)?;
            self.queue.enqueue(FileProcessingItem::new(
                file.id,
                FileOperation::MoveToPublicStorage,
            ));
            queued += 1;
        }
        if queued > 0 {
            info!(mod_id = %event.mod_id, queued, published_at = %event.published_at, "Publishing mod files");
        }
        Ok(())
    }
}

fn set_if_different(file: &mut FileMetadata, key: &str, value: &str) -> bool {
    if file.custom_metadata.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    file.custom_metadata.insert(key.to_string(), value.to_string());
    true
}
