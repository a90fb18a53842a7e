//! Upload validation.
//!
//! Metadata rules and content signature checks run independently and every
//! violation is collected, so a caller can report all problems at once.

mod content;
mod metadata;

pub use content::{ContentValidator, detect_content_type};
pub use metadata::MetadataValidator;

use common::OwningEntity;
use common::config::FilesConfig;

use crate::error::FileError;

/// What the client claims about an upload.
#[derive(Debug, Clone)]
pub struct UploadDescriptor {
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub owner: Option<OwningEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }
}

impl ValidationResult {
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.is_valid &= other.is_valid;
        self.errors.extend(other.errors);
    }

    pub fn into_result(self) -> Result<(), FileError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(FileError::Validation(self.errors))
        }
    }
}

/// Both checks together.
#[derive(Debug, Clone)]
pub struct FileValidator {
    metadata: MetadataValidator,
    content: ContentValidator,
}

impl FileValidator {
    pub fn new(config: &FilesConfig) -> Self {
        Self {
            metadata: MetadataValidator::new(config),
            content: ContentValidator::new(config),
        }
    }

    pub fn validate_metadata(
        &self,
        upload: &UploadDescriptor,
        waive_entity_requirement: bool,
    ) -> ValidationResult {
        self.metadata.validate(upload, waive_entity_requirement)
    }

    pub fn validate_content(&self, data: &[u8], declared_content_type: &str) -> ValidationResult {
        self.content.validate(data, declared_content_type)
    }

    pub fn validate(
        &self,
        upload: &UploadDescriptor,
        data: &[u8],
        waive_entity_requirement: bool,
    ) -> ValidationResult {
        let mut result = self.validate_metadata(upload, waive_entity_requirement);
        result.merge(self.validate_content(data, &upload.content_type));
        result
    }
}
