use std::path::Path;

use common::config::FilesConfig;

use super::{UploadDescriptor, ValidationResult};

const INVALID_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "dll", "com", "bat", "cmd", "msi", "scr", "pif", "vbs", "ps1", "sh", "jar", "app",
];

/// Checks the declared name, type, size and owner of an upload.
#[derive(Debug, Clone)]
pub struct MetadataValidator {
    allowed_categories: Vec<String>,
    max_file_size: u64,
    max_filename_length: usize,
    require_entity: bool,
    allow_executables: bool,
}

impl MetadataValidator {
    pub fn new(config: &FilesConfig) -> Self {
        Self {
            allowed_categories: config
                .allowed_file_categories
                .iter()
                .map(|c| c.trim().to_ascii_lowercase())
                .collect(),
            max_file_size: config.max_file_size_bytes,
            max_filename_length: config.max_filename_length,
            require_entity: config.require_entity_association,
            allow_executables: config.allow_executables,
        }
    }

    pub fn validate(
        &self,
        upload: &UploadDescriptor,
        waive_entity_requirement: bool,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();
        let content_type = essence(&upload.content_type);

        if content_type.is_empty() {
            result.add_error("Content type is required");
        } else if !self.is_allowed_type(&content_type) {
            result.add_error(format!("Content type '{content_type}' is not allowed"));
        }

        if upload.size == 0 {
            result.add_error("File is empty");
        } else if upload.size > self.max_file_size {
            result.add_error(format!(
                "File size {} bytes exceeds the maximum of {} bytes",
                upload.size, self.max_file_size
            ));
        }

        let name = upload.file_name.trim();
        if name.is_empty() {
            result.add_error("File name is required");
        } else {
            if name.contains(INVALID_FILENAME_CHARS) {
                result.add_error(format!(
                    "File name contains invalid characters (\\ / : * ? \" < > |): {name}"
                ));
            }
            if name.chars().count() > self.max_filename_length {
                result.add_error(format!(
                    "File name exceeds {} characters",
                    self.max_filename_length
                ));
            }
            if let Some(ext) = extension(name) {
                if !self.allow_executables && EXECUTABLE_EXTENSIONS.contains(&ext.as_str()) {
                    result.add_error(format!("Executable files (.{ext}) are not allowed"));
                }
                if !content_type.is_empty() && !extension_fits_type(&ext, &content_type) {
                    result.add_error(format!(
                        "File extension '.{ext}' does not match content type '{content_type}'"
                    ));
                }
            }
        }

        if self.require_entity && !waive_entity_requirement && upload.owner.is_none() {
            result.add_error("File must be associated with an entity");
        }

        result
    }

    fn is_allowed_type(&self, content_type: &str) -> bool {
        self.allowed_categories.iter().any(|allowed| {
            match allowed.strip_suffix("/*") {
                Some(prefix) => content_type
                    .split_once('/')
                    .is_some_and(|(top, _)| top == prefix),
                None => allowed == content_type || allowed == "*/*",
            }
        })
    }
}

/// `Image/PNG; charset=x` becomes `image/png`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// The extension's known types must share the declared top-level type.
/// Unknown extensions and `application/octet-stream` always fit.
fn extension_fits_type(ext: &str, content_type: &str) -> bool {
    if content_type == "application/octet-stream" {
        return true;
    }
    let guesses = mime_guess::from_ext(ext);
    if guesses.is_empty() {
        return true;
    }
    let declared_top = content_type.split('/').next().unwrap_or_default();
    guesses.iter().any(|m| m.type_().as_str() == declared_top)
}
