use thiserror::Error;

/// Errors that can occur during blob storage operations.
///
/// A missing blob is not an error for most operations: they report it as
/// `None` or `false` instead.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested blob was not found.
    #[error("blob not found: {0}")]
    NotFound(String),
    /// An I/O error occurred.
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The blob key is malformed or escapes its container.
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    /// Another operation holds the lease on the source blob.
    #[error("lease unavailable for {container}/{key}")]
    LeaseUnavailable { container: String, key: String },
    /// The blob exceeds the configured size limit.
    #[error("blob exceeds size limit ({actual} > {limit} bytes)")]
    SizeLimitExceeded { actual: u64, limit: u64 },
    /// Image decoding or encoding failed.
    #[error("image processing failed: {0}")]
    Image(String),
    /// SAS URL could not be produced or verified.
    #[error("signature error: {0}")]
    Signature(String),
}

impl StorageError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::LeaseUnavailable { .. })
    }
}

impl From<image::ImageError> for StorageError {
    fn from(err: image::ImageError) -> Self {
        Self::Image(err.to_string())
    }
}
