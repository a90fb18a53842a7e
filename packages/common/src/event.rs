//! Event shapes exchanged with the rest of the platform.
//!
//! Published events go to the `files` exchange; Mod and User lifecycle events
//! arrive on the `mods` and `users` exchanges. All payloads are camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::file::{FileMetadata, FileOperation, ScanRecord, ScanStatus};
use crate::mq::Message;

pub mod routing {
    pub const FILE_UPLOADED: &str = "file.uploaded";
    pub const FILE_SCANNED: &str = "file.scanned";
    pub const FILE_VISIBILITY_CHANGED: &str = "file.visibility-changed";
    pub const FILE_PROCESSING_ERROR: &str = "file.processing-error";
    pub const FILE_DELETED: &str = "file.deleted";

    pub const MOD_DELETED: &str = "mod.deleted";
    pub const MOD_UPDATED: &str = "mod.updated";
    pub const MOD_PUBLISHED: &str = "mod.published";

    pub const USER_DELETED: &str = "user.deleted";
    pub const USER_UPDATED: &str = "user.updated";
    pub const USER_DATA_EXPORT_REQUESTED: &str = "user.data-export.requested";
    pub const USER_DATA_EXPORT_FILES: &str = "user.data-export.files";
}

macro_rules! impl_message {
    ($ty:ty, $key:expr) => {
        impl Message for $ty {
            fn message_type() -> &'static str {
                $key
            }
        }
    };
    ($ty:ty, $key:expr, |$this:ident| $id:expr) => {
        impl Message for $ty {
            fn message_type() -> &'static str {
                $key
            }

            fn message_id(&self) -> String {
                let $this = self;
                $id
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploaded {
    pub file_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub user_id: String,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub is_public: bool,
    pub file_size_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl FileUploaded {
    pub fn from_metadata(meta: &FileMetadata) -> Self {
        Self {
            file_id: meta.id,
            file_name: meta.file_name.clone(),
            content_type: meta.content_type.clone(),
            user_id: meta.user_id.clone(),
            entity_id: meta.owner.as_ref().map(|o| o.id().to_string()),
            entity_type: meta.owner.as_ref().map(|o| o.kind().to_string()),
            is_public: meta.is_public,
            file_size_bytes: meta.file_size_bytes,
            timestamp: Utc::now(),
        }
    }
}

impl_message!(FileUploaded, routing::FILE_UPLOADED, |e| e.file_id.to_string());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileScanned {
    pub file_id: Uuid,
    pub scan_id: Uuid,
    pub scan_status: ScanStatus,
    pub is_infected: bool,
    pub threat_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FileScanned {
    pub fn from_record(record: &ScanRecord) -> Self {
        Self {
            file_id: record.file_metadata_id,
            scan_id: record.id,
            scan_status: record.status,
            is_infected: record.is_infected(),
            threat_name: record.threat_name.clone(),
            timestamp: Utc::now(),
        }
    }
}

impl_message!(FileScanned, routing::FILE_SCANNED, |e| e.scan_id.to_string());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVisibilityChanged {
    pub file_id: Uuid,
    pub is_public: bool,
    pub timestamp: DateTime<Utc>,
}

impl_message!(FileVisibilityChanged, routing::FILE_VISIBILITY_CHANGED);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessingError {
    pub file_id: Uuid,
    pub error_message: String,
    pub operation: FileOperation,
    pub timestamp: DateTime<Utc>,
}

impl_message!(FileProcessingError, routing::FILE_PROCESSING_ERROR);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleted {
    pub file_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl_message!(FileDeleted, routing::FILE_DELETED, |e| e.file_id.to_string());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModDeleted {
    pub mod_id: String,
    #[serde(default)]
    pub hard_delete: bool,
}

impl_message!(ModDeleted, routing::MOD_DELETED);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModUpdated {
    pub mod_id: String,
    pub title: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

impl_message!(ModUpdated, routing::MOD_UPDATED);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModPublished {
    pub mod_id: String,
    pub published_at: DateTime<Utc>,
}

impl_message!(ModPublished, routing::MOD_PUBLISHED);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_id: String,
    #[serde(default)]
    pub hard_delete: bool,
}

impl_message!(UserDeleted, routing::USER_DELETED);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdated {
    pub user_id: String,
    pub username: String,
}

impl_message!(UserUpdated, routing::USER_UPDATED);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataExportRequested {
    pub user_id: String,
    pub request_id: String,
}

impl_message!(UserDataExportRequested, routing::USER_DATA_EXPORT_REQUESTED, |e| e.request_id.clone());

/// One file in a user's data export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFile {
    pub file_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub file_size_bytes: u64,
    pub upload_date: DateTime<Utc>,
    pub is_public: bool,
    pub status: String,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub download_count: u64,
}

impl From<&FileMetadata> for ExportedFile {
    fn from(meta: &FileMetadata) -> Self {
        Self {
            file_id: meta.id,
            file_name: meta.file_name.clone(),
            content_type: meta.content_type.clone(),
            file_size_bytes: meta.file_size_bytes,
            upload_date: meta.upload_date,
            is_public: meta.is_public,
            status: meta.status.to_string(),
            entity_id: meta.owner.as_ref().map(|o| o.id().to_string()),
            entity_type: meta.owner.as_ref().map(|o| o.kind().to_string()),
            download_count: meta.download_count,
        }
    }
}

/// Response to [`UserDataExportRequested`], correlated by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataExportResponse {
    pub request_id: String,
    pub user_id: String,
    pub service: String,
    pub files: Vec<ExportedFile>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl_message!(UserDataExportResponse, routing::USER_DATA_EXPORT_FILES, |e| e.request_id.clone());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::OwningEntity;
    use crate::mq::MessageEnvelope;

    #[test]
    fn test_published_events_are_camel_case() {
        let event = FileProcessingError {
            file_id: Uuid::nil(),
            error_message: "boom".into(),
            operation: FileOperation::GenerateThumbnail,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("fileId").is_some());
        assert!(json.get("errorMessage").is_some());
        assert_eq!(json["operation"], "GenerateThumbnail");
    }

    #[test]
    fn test_consumed_event_defaults_hard_delete() {
        let event: ModDeleted = serde_json::from_str(r#"{"modId":"m1"}"#).unwrap();
        assert_eq!(event.mod_id, "m1");
        assert!(!event.hard_delete);
    }

    #[test]
    fn test_file_uploaded_flattens_owner() {
        let mut meta =
            FileMetadata::new_pending("a.zip", "application/zip", 10, "u1", None, false, "k");
        meta.owner = Some(OwningEntity::Mod("m9".into()));
        let event = FileUploaded::from_metadata(&meta);
        assert_eq!(event.entity_id.as_deref(), Some("m9"));
        assert_eq!(event.entity_type.as_deref(), Some("mod"));
    }

    #[test]
    fn test_routing_keys() {
        let envelope = MessageEnvelope::from_message(&UserDataExportRequested {
            user_id: "u".into(),
            request_id: "r-1".into(),
        })
        .unwrap();
        assert_eq!(envelope.routing_key, routing::USER_DATA_EXPORT_REQUESTED);
        assert_eq!(envelope.message_id, "r-1");
    }
}
