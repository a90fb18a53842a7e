use std::sync::Arc;

use common::config::{FilesConfig, ScanFailurePolicy, VirusScanConfig};
use common::file::metadata_keys;
use common::storage::BlobStore;
use common::{
    FileMetadata, FileOperation, FileProcessingItem, FileStatus, ScanRecord, ScanStatus,
    StorageTier,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::FileError;
use crate::events::FileEvents;
use crate::repository::{FileMetadataRepository, ScanResultRepository};
use crate::scanner::VirusScanner;

#[derive(Debug, Clone, Copy)]
pub struct ProcessingSettings {
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub scan_failure_policy: ScanFailurePolicy,
}

impl ProcessingSettings {
    pub fn from_config(files: &FilesConfig, scan: &VirusScanConfig) -> Self {
        Self {
            thumbnail_width: files.thumbnail_width,
            thumbnail_height: files.thumbnail_height,
            scan_failure_policy: scan.failure_policy,
        }
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self::from_config(&FilesConfig::default(), &VirusScanConfig::default())
    }
}

/// Executes one queued operation against storage, scanner and repositories.
pub struct OperationHandlers {
    files: Arc<dyn FileMetadataRepository>,
    scans: Arc<dyn ScanResultRepository>,
    storage: Arc<dyn BlobStore>,
    scanner: Arc<dyn VirusScanner>,
    events: FileEvents,
    settings: ProcessingSettings,
}

impl OperationHandlers {
    pub fn new(
        files: Arc<dyn FileMetadataRepository>,
        scans: Arc<dyn ScanResultRepository>,
        storage: Arc<dyn BlobStore>,
        scanner: Arc<dyn VirusScanner>,
        events: FileEvents,
        settings: ProcessingSettings,
    ) -> Self {
        Self {
            files,
            scans,
            storage,
            scanner,
            events,
            settings,
        }
    }

    pub async fn handle(&self, item: &FileProcessingItem) -> Result<(), FileError> {
        let id = item.file_metadata_id;
        match item.operation {
            FileOperation::ScanForViruses => self.scan(id).await,
            FileOperation::GenerateThumbnail => self.generate_thumbnail(id).await,
            FileOperation::MoveToPublicStorage => self.move_to(id, true).await,
            FileOperation::MoveToPrivateStorage => self.move_to(id, false).await,
            FileOperation::Delete => self.delete(id).await,
        }
    }

    async fn load(&self, id: Uuid) -> Result<FileMetadata, FileError> {
        self.files
            .get_by_id(id)
            .await?
            .ok_or_else(|| FileError::file_not_found(id))
    }

    async fn scan(&self, id: Uuid) -> Result<(), FileError> {
        let meta = self.load(id).await?;
        let content = self
            .storage
            .download(&meta.storage_location, meta.storage_container)
            .await?
            .ok_or_else(|| FileError::blob_not_found(&meta.storage_location))?;

        let outcome = self
            .scanner
            .scan(content, Some(meta.file_size_bytes), &meta.file_name)
            .await;
        let record = ScanRecord::new(
            meta.id,
            self.scanner.name(),
            outcome.status,
            outcome.message.clone(),
            outcome.threat_name.clone(),
        );
        self.scans.create(&record).await?;

        let (status, message, warning) = match outcome.status {
            ScanStatus::Clean => (FileStatus::Available, None, None),
            ScanStatus::Infected => {
                warn!(
                    file_id = %meta.id,
                    user_id = %meta.user_id,
                    threat = ?outcome.threat_name,
                    "File quarantined"
                );
                (FileStatus::Quarantined, outcome.message.clone(), None)
            }
            ScanStatus::Error | ScanStatus::Pending => {
                let reason = outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| "scan did not complete".to_string());
                match self.settings.scan_failure_policy {
                    ScanFailurePolicy::FailOpen => {
                        warn!(file_id = %meta.id, reason = %reason, "Scan failed, allowing file");
                        let message = format!("Virus scan incomplete: {reason}");
                        (FileStatus::Available, Some(message), Some(reason))
                    }
                    ScanFailurePolicy::FailClosed => {
                        warn!(file_id = %meta.id, reason = %reason, "Scan failed, blocking file");
                        let message = format!("Virus scan failed: {reason}");
                        (FileStatus::Error, Some(message), None)
                    }
                }
            }
        };

        self.files
            .modify(
                id,
                Box::new(move |m| {
                    match warning {
                        Some(reason) => {
                            m.custom_metadata
                                .insert(metadata_keys::SCAN_WARNING.to_string(), reason);
                        }
                        None => {
                            m.custom_metadata.remove(metadata_keys::SCAN_WARNING);
                        }
                    }
                    m.set_status(status, message)
                }),
            )
            .await?;
        info!(file_id = %id, status = %status, "Scan complete");
        self.events.scanned(&record).await;
        Ok(())
    }

    /// Render (or reuse) the thumbnail. The key is derived from the blob key
    /// and size, so repeating the operation does not add another blob.
    async fn generate_thumbnail(&self, id: Uuid) -> Result<(), FileError> {
        let meta = self.load(id).await?;
        if !meta.is_image() {
            warn!(
                file_id = %meta.id,
                content_type = %meta.content_type,
                "Thumbnail requested for non-image file, skipping"
            );
            return Ok(());
        }
        if meta.status == FileStatus::Quarantined {
            warn!(file_id = %meta.id, "Not rendering thumbnail of quarantined file");
            return Ok(());
        }

        let thumb = self
            .storage
            .generate_thumbnail(
                &meta.storage_location,
                meta.storage_container,
                self.settings.thumbnail_width,
                self.settings.thumbnail_height,
            )
            .await?
            .ok_or_else(|| FileError::blob_not_found(&meta.storage_location))?;

        let location = thumb.clone();
        let changed = self
            .files
            .modify(
                id,
                Box::new(move |m| {
                    if m.has_thumbnail && m.thumbnail_location.as_deref() == Some(location.as_str()) {
                        return false;
                    }
                    m.has_thumbnail = true;
                    m.thumbnail_location = Some(location);
                    m.touch();
                    true
                }),
            )
            .await?;
        debug!(file_id = %id, thumbnail = %thumb, changed = changed.is_some(), "Thumbnail ready");
        Ok(())
    }

    async fn move_to(&self, id: Uuid, public: bool) -> Result<(), FileError> {
        let meta = self.load(id).await?;
        let target = StorageTier::for_visibility(public);

        if meta.storage_container == target && meta.is_public == public {
            debug!(file_id = %meta.id, container = %target, "File already in target container");
            return Ok(());
        }
        if public && meta.status == FileStatus::Quarantined {
            warn!(file_id = %meta.id, "Refusing to publish quarantined file");
            return Ok(());
        }

        let source = meta.storage_container;
        let mut location = None;
        let mut thumbnail = None;
        if source != target {
            let new_key = self
                .storage
                .move_blob(&meta.storage_location, source, target)
                .await?
                .ok_or_else(|| FileError::blob_not_found(&meta.storage_location))?;
            location = Some(new_key);

            if let Some(thumb) = &meta.thumbnail_location {
                let from = StorageTier::thumbnail_for_visibility(source == StorageTier::Public);
                let to = StorageTier::thumbnail_for_visibility(public);
                match self.storage.move_blob(thumb, from, to).await {
                    Ok(Some(key)) => thumbnail = Some(key),
                    Ok(None) => warn!(file_id = %meta.id, thumbnail = %thumb, "Thumbnail missing during move"),
                    Err(e) => warn!(file_id = %meta.id, error = %e, "Failed to move thumbnail"),
                }
            }
        }

        self.files
            .modify(
                id,
                Box::new(move |m| {
                    if let Some(key) = location {
                        m.storage_location = key;
                        m.storage_container = target;
                    }
                    if let Some(key) = thumbnail {
                        m.thumbnail_location = Some(key);
                    }
                    m.is_public = public;
                    m.touch();
                    true
                }),
            )
            .await?;
        info!(file_id = %id, is_public = public, "File visibility changed");
        self.events.visibility_changed(id, public).await;
        Ok(())
    }

    /// Background delete: ownership is not checked and storage failures do
    /// not keep the record alive.
    async fn delete(&self, id: Uuid) -> Result<(), FileError> {
        match self.files.get_by_id(id).await? {
            Some(meta) => self.remove_file(&meta, true).await,
            None => {
                debug!(file_id = %id, "File already deleted");
                Ok(())
            }
        }
    }

    /// Delete blob, thumbnail, scan history and metadata.
    ///
    /// Unless `force` is set, the metadata survives a failed blob delete.
    pub async fn remove_file(&self, meta: &FileMetadata, force: bool) -> Result<(), FileError> {
        if let Err(e) = self
            .storage
            .delete(&meta.storage_location, meta.storage_container)
            .await
        {
            if !force {
                return Err(e.into());
            }
            warn!(file_id = %meta.id, error = %e, "Blob delete failed, removing record anyway");
        }

        if let Some(thumb) = &meta.thumbnail_location {
            let tier =
                StorageTier::thumbnail_for_visibility(meta.storage_container == StorageTier::Public);
            if let Err(e) = self.storage.delete(thumb, tier).await {
                warn!(file_id = %meta.id, error = %e, "Failed to delete thumbnail");
            }
        }

        if let Err(e) = self.scans.delete_by_file_id(meta.id).await {
            if !force {
                return Err(e);
            }
            warn!(file_id = %meta.id, error = %e, "Failed to delete scan history");
        }

        self.files.delete(meta.id).await?;
        info!(file_id = %meta.id, forced = force, "File deleted");
        self.events.deleted(meta.id).await;
        Ok(())
    }

    /// Mark the file as failed and announce it. Quarantine is never downgraded.
    pub async fn record_failure(&self, item: &FileProcessingItem, message: &str) {
        let id = item.file_metadata_id;
        let status_message = message.to_string();
        let change = Box::new(move |m: &mut FileMetadata| {
            m.status != FileStatus::Quarantined && m.set_status(FileStatus::Error, Some(status_message))
        });
        match self.files.modify(id, change).await {
            Ok(_) => {}
            Err(FileError::NotFound { .. }) => debug!(file_id = %id, "Failed file no longer exists"),
            Err(e) => warn!(file_id = %id, error = %e, "Failed to record processing error"),
        }
        self.events.processing_error(id, item.operation, message).await;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use common::OwningEntity;
    use common::storage::{BoxReader, ContainerNames, FilesystemBlobStore, SasSigner};
    use mq::InMemoryEventBus;

    use super::*;
    use crate::repository::{InMemoryFileMetadataRepository, InMemoryScanResultRepository};
    use crate::scanner::{MockVirusScanner, ScanOutcome};

    struct Fixture {
        handlers: OperationHandlers,
        files: Arc<InMemoryFileMetadataRepository>,
        scans: Arc<InMemoryScanResultRepository>,
        storage: Arc<FilesystemBlobStore>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(scanner: MockVirusScanner, policy: ScanFailurePolicy) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            FilesystemBlobStore::new(
                dir.path().to_path_buf(),
                ContainerNames::default(),
                1024 * 1024,
                SasSigner::new("http://localhost/blobs", "k"),
            )
            .await
            .unwrap(),
        );
        let files = Arc::new(InMemoryFileMetadataRepository::new());
        let scans = Arc::new(InMemoryScanResultRepository::new());
        let events = FileEvents::new(Arc::new(InMemoryEventBus::default()), "files");
        let settings = ProcessingSettings {
            scan_failure_policy: policy,
            ..ProcessingSettings::default()
        };
        let handlers = OperationHandlers::new(
            files.clone(),
            scans.clone(),
            storage.clone(),
            Arc::new(scanner),
            events,
            settings,
        );
        Fixture {
            handlers,
            files,
            scans,
            storage,
            _dir: dir,
        }
    }

    fn scanner_returning(outcome: ScanOutcome) -> MockVirusScanner {
        let mut scanner = MockVirusScanner::new();
        scanner
            .expect_scan()
            .returning(move |_: BoxReader, _, _| outcome.clone());
        scanner.expect_name().return_const("mock");
        scanner
    }

    async fn stored_file(f: &Fixture, public: bool) -> FileMetadata {
        let tier = StorageTier::for_visibility(public);
        let key = f
            .storage
            .upload(
                Box::new(Cursor::new(b"PK\x03\x04data".to_vec())),
                "mod.zip",
                "application/zip",
                tier,
            )
            .await
            .unwrap();
        let meta = FileMetadata::new_pending(
            "mod.zip",
            "application/zip",
            8,
            "u1",
            Some(OwningEntity::Mod("m1".into())),
            public,
            key,
        );
        f.files.create(&meta).await.unwrap();
        meta
    }

    #[tokio::test]
    async fn test_clean_scan_makes_file_available() {
        let f = fixture(scanner_returning(ScanOutcome::clean()), ScanFailurePolicy::FailOpen).await;
        let meta = stored_file(&f, false).await;

        f.handlers.scan(meta.id).await.unwrap();

        let stored = f.files.get_by_id(meta.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Available);
        let records = f.scans.get_by_file_id(meta.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scanner, "mock");
    }

    #[tokio::test]
    async fn test_infected_scan_quarantines_with_threat_name() {
        let f = fixture(
            scanner_returning(ScanOutcome::infected("Eicar-Test-Signature")),
            ScanFailurePolicy::FailOpen,
        )
        .await;
        let meta = stored_file(&f, false).await;

        f.handlers.scan(meta.id).await.unwrap();

        let stored = f.files.get_by_id(meta.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Quarantined);
        assert!(stored.status_message.unwrap().contains("Eicar-Test-Signature"));
    }

    #[tokio::test]
    async fn test_scan_error_fail_open_adds_warning() {
        let f = fixture(
            scanner_returning(ScanOutcome::error("connection refused")),
            ScanFailurePolicy::FailOpen,
        )
        .await;
        let meta = stored_file(&f, false).await;

        f.handlers.scan(meta.id).await.unwrap();

        let stored = f.files.get_by_id(meta.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Available);
        assert_eq!(
            stored.custom_metadata.get(metadata_keys::SCAN_WARNING).map(String::as_str),
            Some("connection refused")
        );
    }

    #[tokio::test]
    async fn test_scan_error_fail_closed_marks_error() {
        let f = fixture(
            scanner_returning(ScanOutcome::error("timed out")),
            ScanFailurePolicy::FailClosed,
        )
        .await;
        let meta = stored_file(&f, false).await;

        f.handlers.scan(meta.id).await.unwrap();

        let stored = f.files.get_by_id(meta.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Error);
    }

    #[tokio::test]
    async fn test_move_public_twice_is_noop_second_time() {
        let f = fixture(MockVirusScanner::new(), ScanFailurePolicy::FailOpen).await;
        let meta = stored_file(&f, false).await;

        f.handlers.move_to(meta.id, true).await.unwrap();
        let after_first = f.files.get_by_id(meta.id).await.unwrap().unwrap();
        assert_eq!(after_first.storage_container, StorageTier::Public);
        assert!(after_first.is_public);
        assert!(f.storage.exists(&after_first.storage_location, StorageTier::Public).await.unwrap());

        // A held lease would make any storage move fail.
        let _lease = f
            .storage
            .leases()
            .try_acquire("public-files", &after_first.storage_location)
            .unwrap();
        f.handlers.move_to(meta.id, true).await.unwrap();
        let after_second = f.files.get_by_id(meta.id).await.unwrap().unwrap();
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_non_image_thumbnail_is_noop() {
        let f = fixture(MockVirusScanner::new(), ScanFailurePolicy::FailOpen).await;
        let meta = stored_file(&f, false).await;

        f.handlers.generate_thumbnail(meta.id).await.unwrap();
        let stored = f.files.get_by_id(meta.id).await.unwrap().unwrap();
        assert!(!stored.has_thumbnail);
    }

    #[tokio::test]
    async fn test_forced_delete_removes_everything() {
        let f = fixture(scanner_returning(ScanOutcome::clean()), ScanFailurePolicy::FailOpen).await;
        let meta = stored_file(&f, false).await;
        f.handlers.scan(meta.id).await.unwrap();

        f.handlers.delete(meta.id).await.unwrap();
        assert!(f.files.get_by_id(meta.id).await.unwrap().is_none());
        assert!(f.scans.get_by_file_id(meta.id).await.unwrap().is_empty());
        assert!(!f.storage.exists(&meta.storage_location, StorageTier::Private).await.unwrap());

        // Second delete of the same id is a no-op.
        f.handlers.delete(meta.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_failure_keeps_quarantine() {
        let f = fixture(MockVirusScanner::new(), ScanFailurePolicy::FailOpen).await;
        let mut meta = stored_file(&f, false).await;
        meta.set_status(FileStatus::Quarantined, Some("Threat detected: X".into()));
        f.files.update(&meta).await.unwrap();

        let item = FileProcessingItem::new(meta.id, FileOperation::GenerateThumbnail);
        f.handlers.record_failure(&item, "boom").await;
        let stored = f.files.get_by_id(meta.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Quarantined);
    }
}
