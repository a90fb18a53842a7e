use std::fmt;
use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;
use crate::file::StorageTier;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Access rights granted by a SAS URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SasPermissions {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl SasPermissions {
    pub const READ: SasPermissions = SasPermissions {
        read: true,
        write: false,
        delete: false,
    };

    pub fn as_str(&self) -> String {
        let mut s = String::with_capacity(3);
        if self.read {
            s.push('r');
        }
        if self.write {
            s.push('w');
        }
        if self.delete {
            s.push('d');
        }
        s
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut perms = Self::default();
        for c in s.chars() {
            match c {
                'r' => perms.read = true,
                'w' => perms.write = true,
                'd' => perms.delete = true,
                _ => return None,
            }
        }
        Some(perms)
    }
}

impl fmt::Display for SasPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Blob storage over the private/public/thumbnail container tiers.
///
/// Missing blobs are reported as `None`/`false`, never as an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store data under a freshly generated key and return the key.
    async fn upload(
        &self,
        reader: BoxReader,
        file_name: &str,
        content_type: &str,
        tier: StorageTier,
    ) -> Result<String, StorageError>;

    /// Store bytes under a freshly generated key.
    async fn upload_bytes(
        &self,
        data: &[u8],
        file_name: &str,
        content_type: &str,
        tier: StorageTier,
    ) -> Result<String, StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.upload(reader, file_name, content_type, tier).await
    }

    /// Open a blob for streaming.
    async fn download(&self, key: &str, tier: StorageTier)
    -> Result<Option<BoxReader>, StorageError>;

    /// Read a whole blob into memory.
    async fn download_bytes(
        &self,
        key: &str,
        tier: StorageTier,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(mut reader) = self.download(key, tier).await? else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(Some(buf))
    }

    async fn exists(&self, key: &str, tier: StorageTier) -> Result<bool, StorageError>;

    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, key: &str, tier: StorageTier) -> Result<bool, StorageError>;

    /// Copy a blob into another tier, keeping its key.
    async fn copy(
        &self,
        key: &str,
        from: StorageTier,
        to: StorageTier,
    ) -> Result<Option<String>, StorageError>;

    /// Copy then delete the source while holding a lease on it.
    ///
    /// Fails with [`StorageError::LeaseUnavailable`], leaving the source
    /// untouched, when another operation holds the lease.
    async fn move_blob(
        &self,
        key: &str,
        from: StorageTier,
        to: StorageTier,
    ) -> Result<Option<String>, StorageError>;

    /// Time-limited, permission-scoped direct URL for a blob.
    fn generate_sas_url(
        &self,
        key: &str,
        tier: StorageTier,
        ttl: Duration,
        permissions: SasPermissions,
    ) -> Result<String, StorageError>;

    /// Render (or reuse) a thumbnail for an image blob and return its key.
    async fn generate_thumbnail(
        &self,
        key: &str,
        tier: StorageTier,
        max_width: u32,
        max_height: u32,
    ) -> Result<Option<String>, StorageError>;

    /// Scale an image to fit inside the given box, re-encoding as PNG.
    async fn resize_image(
        &self,
        data: Vec<u8>,
        max_width: u32,
        max_height: u32,
    ) -> Result<Vec<u8>, StorageError> {
        tokio::task::spawn_blocking(move || {
            super::thumbnail::resize_to_png(&data, max_width, max_height)
        })
        .await
        .map_err(|e| StorageError::Image(format!("resize task failed: {e}")))?
    }
}
