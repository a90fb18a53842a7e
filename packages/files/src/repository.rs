use async_trait::async_trait;
use chrono::Utc;
use common::file::metadata_keys;
use common::{FileMetadata, OwningEntity, ScanRecord};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::FileError;

/// Placeholder owner for files of users who asked to be forgotten.
pub const ANONYMOUS_USER_ID: &str = "anonymous";

/// Edit applied to one stored record. Returns whether anything changed.
pub type MetadataChange = Box<dyn FnOnce(&mut FileMetadata) -> bool + Send>;

/// Persistence for [`FileMetadata`].
///
/// `update` replaces the whole record; concurrent writers use `modify` so
/// each one only touches the fields it owns.
#[async_trait]
pub trait FileMetadataRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<FileMetadata>, FileError>;

    async fn create(&self, metadata: &FileMetadata) -> Result<(), FileError>;

    /// Fails with `NotFound` if the record no longer exists.
    async fn update(&self, metadata: &FileMetadata) -> Result<(), FileError>;

    /// Apply `change` to the current record atomically. The closure is
    /// responsible for bumping `last_modified`.
    ///
    /// Returns the new record when `change` reported a modification, `None`
    /// when it left the record alone, and `NotFound` if the record is gone.
    async fn modify(&self, id: Uuid, change: MetadataChange)
    -> Result<Option<FileMetadata>, FileError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, FileError>;

    async fn get_by_entity(&self, owner: &OwningEntity) -> Result<Vec<FileMetadata>, FileError>;

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<FileMetadata>, FileError>;

    /// Detach every file from `user_id` in place. Returns how many changed.
    async fn anonymize_user_files(&self, user_id: &str) -> Result<usize, FileError>;
}

/// Treat a record deleted under our feet as "nothing to change".
pub(crate) fn ignore_missing(
    result: Result<Option<FileMetadata>, FileError>,
) -> Result<Option<FileMetadata>, FileError> {
    match result {
        Err(FileError::NotFound { .. }) => Ok(None),
        other => other,
    }
}

#[async_trait]
pub trait ScanResultRepository: Send + Sync {
    async fn create(&self, record: &ScanRecord) -> Result<(), FileError>;

    async fn get_by_file_id(&self, file_id: Uuid) -> Result<Vec<ScanRecord>, FileError>;

    /// Returns how many records were removed.
    async fn delete_by_file_id(&self, file_id: Uuid) -> Result<usize, FileError>;
}

#[derive(Debug, Default)]
pub struct InMemoryFileMetadataRepository {
    files: DashMap<Uuid, FileMetadata>,
}

impl InMemoryFileMetadataRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn collect(&self, mut pred: impl FnMut(&FileMetadata) -> bool) -> Vec<FileMetadata> {
        let mut found: Vec<FileMetadata> = self
            .files
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|f| (f.upload_date, f.id));
        found
    }
}

#[async_trait]
impl FileMetadataRepository for InMemoryFileMetadataRepository {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<FileMetadata>, FileError> {
        Ok(self.files.get(&id).map(|f| f.value().clone()))
    }

    async fn create(&self, metadata: &FileMetadata) -> Result<(), FileError> {
        self.files.insert(metadata.id, metadata.clone());
        Ok(())
    }

    async fn update(&self, metadata: &FileMetadata) -> Result<(), FileError> {
        match self.files.get_mut(&metadata.id) {
            Some(mut existing) => {
                *existing = metadata.clone();
                Ok(())
            }
            None => Err(FileError::file_not_found(metadata.id)),
        }
    }

    async fn modify(
        &self,
        id: Uuid,
        change: MetadataChange,
    ) -> Result<Option<FileMetadata>, FileError> {
        let mut entry = self
            .files
            .get_mut(&id)
            .ok_or_else(|| FileError::file_not_found(id))?;
        if !change(entry.value_mut()) {
            return Ok(None);
        }
        Ok(Some(entry.value().clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, FileError> {
        Ok(self.files.remove(&id).is_some())
    }

    async fn get_by_entity(&self, owner: &OwningEntity) -> Result<Vec<FileMetadata>, FileError> {
        Ok(self.collect(|f| f.owner.as_ref() == Some(owner)))
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<FileMetadata>, FileError> {
        Ok(self.collect(|f| f.user_id == user_id))
    }

    async fn anonymize_user_files(&self, user_id: &str) -> Result<usize, FileError> {
        let now = Utc::now();
        let mut changed = 0;
        for mut entry in self.files.iter_mut() {
            let file = entry.value_mut();
            if file.user_id != user_id {
                continue;
            }
            file.user_id = ANONYMOUS_USER_ID.to_string();
            if matches!(&file.owner, Some(OwningEntity::User(id)) if id == user_id) {
                file.owner = None;
            }
            file.custom_metadata.remove(metadata_keys::UPLOADER_NAME);
            file.custom_metadata
                .insert(metadata_keys::ANONYMIZED_AT.to_string(), now.to_rfc3339());
            file.last_modified = now;
            changed += 1;
        }
        Ok(changed)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScanResultRepository {
    records: DashMap<Uuid, ScanRecord>,
}

impl InMemoryScanResultRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanResultRepository for InMemoryScanResultRepository {
    async fn create(&self, record: &ScanRecord) -> Result<(), FileError> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_by_file_id(&self, file_id: Uuid) -> Result<Vec<ScanRecord>, FileError> {
        let mut found: Vec<ScanRecord> = self
            .records
            .iter()
            .filter(|r| r.file_metadata_id == file_id)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by_key(|r| r.scan_date);
        Ok(found)
    }

    async fn delete_by_file_id(&self, file_id: Uuid) -> Result<usize, FileError> {
        let before = self.records.len();
        self.records.retain(|_, r| r.file_metadata_id != file_id);
        Ok(before - self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{FileStatus, ScanStatus};

    fn file(user: &str, owner: Option<OwningEntity>) -> FileMetadata {
        FileMetadata::new_pending("a.zip", "application/zip", 3, user, owner, false, "k/a.zip")
    }

    #[tokio::test]
    async fn test_lookup_by_entity_is_typed() {
        let repo = InMemoryFileMetadataRepository::new();
        repo.create(&file("u1", Some(OwningEntity::Mod("42".into())))).await.unwrap();
        repo.create(&file("u1", Some(OwningEntity::User("42".into())))).await.unwrap();

        let mod_files = repo.get_by_entity(&OwningEntity::Mod("42".into())).await.unwrap();
        assert_eq!(mod_files.len(), 1);
        assert_eq!(repo.get_by_user("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let repo = InMemoryFileMetadataRepository::new();
        let result = repo.update(&file("u1", None)).await;
        assert!(matches!(result, Err(FileError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_modify_only_touches_changed_fields() {
        let repo = InMemoryFileMetadataRepository::new();
        let meta = file("u1", None);
        repo.create(&meta).await.unwrap();

        // A stale copy taken before the status change.
        let stale = repo.get_by_id(meta.id).await.unwrap().unwrap();
        repo.modify(meta.id, Box::new(|m| m.set_status(FileStatus::Available, None)))
            .await
            .unwrap();
        let updated = repo
            .modify(
                meta.id,
                Box::new(|m| {
                    m.has_thumbnail = true;
                    true
                }),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale.status, FileStatus::Pending);
        assert_eq!(updated.status, FileStatus::Available);
        assert!(updated.has_thumbnail);

        let untouched = repo.modify(meta.id, Box::new(|_| false)).await.unwrap();
        assert!(untouched.is_none());

        let missing = repo.modify(Uuid::new_v4(), Box::new(|_| true)).await;
        assert!(matches!(missing, Err(FileError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_anonymize_detaches_user() {
        let repo = InMemoryFileMetadataRepository::new();
        let mut avatar = file("u1", Some(OwningEntity::User("u1".into())));
        avatar
            .custom_metadata
            .insert(metadata_keys::UPLOADER_NAME.into(), "alice".into());
        repo.create(&avatar).await.unwrap();
        repo.create(&file("u2", None)).await.unwrap();

        assert_eq!(repo.anonymize_user_files("u1").await.unwrap(), 1);
        assert!(repo.get_by_user("u1").await.unwrap().is_empty());

        let stored = repo.get_by_id(avatar.id).await.unwrap().unwrap();
        assert_eq!(stored.user_id, ANONYMOUS_USER_ID);
        assert!(stored.owner.is_none());
        assert!(!stored.custom_metadata.contains_key(metadata_keys::UPLOADER_NAME));
        assert!(stored.custom_metadata.contains_key(metadata_keys::ANONYMIZED_AT));
    }

    #[tokio::test]
    async fn test_scan_records_deleted_with_file() {
        let repo = InMemoryScanResultRepository::new();
        let file_id = Uuid::new_v4();
        repo.create(&ScanRecord::new(file_id, "ClamAV", ScanStatus::Clean, None, None))
            .await
            .unwrap();
        repo.create(&ScanRecord::new(file_id, "ClamAV", ScanStatus::Error, None, None))
            .await
            .unwrap();
        repo.create(&ScanRecord::new(Uuid::new_v4(), "ClamAV", ScanStatus::Clean, None, None))
            .await
            .unwrap();

        assert_eq!(repo.get_by_file_id(file_id).await.unwrap().len(), 2);
        assert_eq!(repo.delete_by_file_id(file_id).await.unwrap(), 2);
        assert!(repo.get_by_file_id(file_id).await.unwrap().is_empty());
    }
}
