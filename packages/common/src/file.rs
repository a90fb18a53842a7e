use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status of a stored file.
///
/// A file starts out `Pending` and leaves that state exactly once, when its
/// virus scan completes. Moves between storage tiers never change the status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FileStatus {
    /// Uploaded, waiting for the scan to finish.
    #[default]
    Pending,
    /// Scanned (or scan bypassed) and downloadable.
    Available,
    /// A threat was detected; access is blocked.
    Quarantined,
    /// Processing failed; needs an external retry.
    Error,
}

impl FileStatus {
    /// All possible status values.
    pub const ALL: &'static [FileStatus] =
        &[Self::Pending, Self::Available, Self::Quarantined, Self::Error];

    /// Returns true once the file has left `Pending`.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns true if the file content may be served.
    pub fn is_downloadable(&self) -> bool {
        matches!(self, Self::Available)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Nothing ever returns to `Pending`.
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        next != Self::Pending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Available => "Available",
            Self::Quarantined => "Quarantined",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    invalid: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {} '{}'", self.kind, self.invalid)
    }
}

impl std::error::Error for ParseEnumError {}

impl FromStr for FileStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Available" => Ok(Self::Available),
            "Quarantined" => Ok(Self::Quarantined),
            "Error" => Ok(Self::Error),
            _ => Err(ParseEnumError {
                kind: "file status",
                invalid: s.to_string(),
            }),
        }
    }
}

/// Logical storage bucket a blob lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    Private,
    Public,
    Thumbnail,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
            Self::Thumbnail => "thumbnail",
        }
    }

    /// Tier holding the primary blob for a file with the given visibility.
    pub fn for_visibility(is_public: bool) -> Self {
        if is_public { Self::Public } else { Self::Private }
    }

    /// Tier holding the thumbnail for a file with the given visibility.
    pub fn thumbnail_for_visibility(is_public: bool) -> Self {
        if is_public { Self::Public } else { Self::Thumbnail }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resource a file is attached to.
///
/// Tagged so that a mod id can never be confused with a user id that happens
/// to have the same value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entityType", content = "entityId", rename_all = "camelCase")]
pub enum OwningEntity {
    Mod(String),
    User(String),
    Wiki(String),
    Forum(String),
    Review(String),
}

impl OwningEntity {
    pub fn id(&self) -> &str {
        match self {
            Self::Mod(id)
            | Self::User(id)
            | Self::Wiki(id)
            | Self::Forum(id)
            | Self::Review(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mod(_) => "mod",
            Self::User(_) => "user",
            Self::Wiki(_) => "wiki",
            Self::Forum(_) => "forum",
            Self::Review(_) => "review",
        }
    }
}

impl fmt::Display for OwningEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Well-known keys in [`FileMetadata::custom_metadata`].
pub mod metadata_keys {
    pub const ORPHANED: &str = "orphaned";
    pub const ORPHANED_AT: &str = "orphanedAt";
    pub const ORPHANED_REASON: &str = "orphanedReason";
    pub const MOD_TITLE: &str = "modTitle";
    pub const MOD_VERSION: &str = "modVersion";
    pub const UPLOADER_NAME: &str = "uploaderName";
    pub const ANONYMIZED_AT: &str = "anonymizedAt";
    pub const SCAN_WARNING: &str = "scanWarning";
}

/// Stored file record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub file_size_bytes: u64,
    pub upload_date: DateTime<Utc>,
    pub user_id: String,
    pub owner: Option<OwningEntity>,
    pub is_public: bool,
    pub status: FileStatus,
    pub status_message: Option<String>,
    pub storage_container: StorageTier,
    /// Blob key inside `storage_container`.
    pub storage_location: String,
    pub has_thumbnail: bool,
    pub thumbnail_location: Option<String>,
    pub download_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    pub custom_metadata: HashMap<String, String>,
}

impl FileMetadata {
    /// Create a `Pending` record for a blob that has just been written.
    pub fn new_pending(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        file_size_bytes: u64,
        user_id: impl Into<String>,
        owner: Option<OwningEntity>,
        is_public: bool,
        storage_location: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            file_size_bytes,
            upload_date: now,
            user_id: user_id.into(),
            owner,
            is_public,
            status: FileStatus::Pending,
            status_message: None,
            storage_container: StorageTier::for_visibility(is_public),
            storage_location: storage_location.into(),
            has_thumbnail: false,
            thumbnail_location: None,
            download_count: 0,
            last_accessed: None,
            last_modified: now,
            custom_metadata: HashMap::new(),
        }
    }

    pub fn is_image(&self) -> bool {
        is_image_content_type(&self.content_type)
    }

    pub fn is_orphaned(&self) -> bool {
        self.custom_metadata
            .get(metadata_keys::ORPHANED)
            .is_some_and(|v| v == "true")
    }

    /// Apply a status change, refusing transitions back to `Pending`.
    ///
    /// Returns false (leaving the record untouched) for an illegal transition.
    pub fn set_status(&mut self, status: FileStatus, message: Option<String>) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }
        self.status = status;
        self.status_message = message;
        self.touch();
        true
    }

    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

/// Outcome of a single scan attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ScanStatus {
    Pending,
    Clean,
    Infected,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Clean => "Clean",
            Self::Infected => "Infected",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one scan attempt against a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: Uuid,
    pub file_metadata_id: Uuid,
    pub scanner: String,
    pub scan_date: DateTime<Utc>,
    pub status: ScanStatus,
    pub status_message: Option<String>,
    pub threat_name: Option<String>,
}

impl ScanRecord {
    pub fn new(
        file_metadata_id: Uuid,
        scanner: impl Into<String>,
        status: ScanStatus,
        status_message: Option<String>,
        threat_name: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_metadata_id,
            scanner: scanner.into(),
            scan_date: Utc::now(),
            status,
            status_message,
            threat_name,
        }
    }

    pub fn is_infected(&self) -> bool {
        self.status == ScanStatus::Infected
    }
}

/// Background operation on a stored file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FileOperation {
    ScanForViruses,
    GenerateThumbnail,
    MoveToPublicStorage,
    MoveToPrivateStorage,
    Delete,
}

impl FileOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanForViruses => "ScanForViruses",
            Self::GenerateThumbnail => "GenerateThumbnail",
            Self::MoveToPublicStorage => "MoveToPublicStorage",
            Self::MoveToPrivateStorage => "MoveToPrivateStorage",
            Self::Delete => "Delete",
        }
    }

    /// Priority used when the caller does not pick one.
    pub fn default_priority(&self) -> ProcessingPriority {
        match self {
            Self::Delete | Self::ScanForViruses => ProcessingPriority::High,
            Self::MoveToPublicStorage | Self::MoveToPrivateStorage => ProcessingPriority::Normal,
            Self::GenerateThumbnail => ProcessingPriority::Low,
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue priority. The processing queue drains `High` before `Normal` before `Low`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ProcessingPriority {
    High,
    Normal,
    Low,
}

impl ProcessingPriority {
    /// Highest first.
    pub const ORDERED: [ProcessingPriority; 3] = [Self::High, Self::Normal, Self::Low];

    pub fn index(&self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// A queued unit of work for the processing engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessingItem {
    pub file_metadata_id: Uuid,
    pub operation: FileOperation,
    pub priority: ProcessingPriority,
    pub enqueued_at: DateTime<Utc>,
    pub user_id: Option<String>,
    pub processing_options: HashMap<String, String>,
}

impl FileProcessingItem {
    pub fn new(file_metadata_id: Uuid, operation: FileOperation) -> Self {
        Self {
            file_metadata_id,
            operation,
            priority: operation.default_priority(),
            enqueued_at: Utc::now(),
            user_id: None,
            processing_options: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: ProcessingPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.processing_options.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_never_returns_to_pending() {
        for status in FileStatus::ALL {
            assert!(!status.can_transition_to(FileStatus::Pending));
        }
        assert!(FileStatus::Pending.can_transition_to(FileStatus::Quarantined));
    }

    #[test]
    fn test_set_status_rejects_pending() {
        let mut meta = FileMetadata::new_pending("a.zip", "application/zip", 3, "u1", None, false, "k");
        assert!(meta.set_status(FileStatus::Available, None));
        assert!(!meta.set_status(FileStatus::Pending, None));
        assert_eq!(meta.status, FileStatus::Available);
    }

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(FileStatus::default(), FileStatus::Pending);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("Quarantined".parse::<FileStatus>().unwrap(), FileStatus::Quarantined);
        assert!("Deleted".parse::<FileStatus>().is_err());
    }

    #[test]
    fn test_owning_entity_serializes_tagged() {
        let owner = OwningEntity::Mod("m-1".into());
        let json = serde_json::to_value(&owner).unwrap();
        assert_eq!(json["entityType"], "mod");
        assert_eq!(json["entityId"], "m-1");
        assert_ne!(owner, OwningEntity::User("m-1".into()));
    }

    #[test]
    fn test_new_pending_places_blob_by_visibility() {
        let public = FileMetadata::new_pending("a.png", "image/png", 1, "u", None, true, "k");
        assert_eq!(public.storage_container, StorageTier::Public);
        assert!(public.is_image());

        let private = FileMetadata::new_pending("a.zip", "application/zip", 1, "u", None, false, "k");
        assert_eq!(private.storage_container, StorageTier::Private);
        assert!(!private.is_image());
    }

    #[test]
    fn test_default_priorities() {
        assert_eq!(FileOperation::Delete.default_priority(), ProcessingPriority::High);
        assert_eq!(FileOperation::GenerateThumbnail.default_priority(), ProcessingPriority::Low);
        assert!(ProcessingPriority::High < ProcessingPriority::Low);
    }
}
