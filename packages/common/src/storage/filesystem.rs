use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::StorageError;
use super::lease::LeaseRegistry;
use super::sas::SasSigner;
use super::thumbnail::{render_thumbnail, thumbnail_key};
use super::traits::{BlobStore, BoxReader, SasPermissions};
use super::ContainerNames;
use crate::config::StorageConfig;
use crate::file::StorageTier;

/// Filesystem-backed blob store with one directory per container tier.
///
/// Layout: `{base_path}/{container}/{uuid}/{file name}`. Writes go through
/// `{base_path}/.tmp` and are renamed into place.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
    containers: ContainerNames,
    max_size: u64,
    leases: LeaseRegistry,
    signer: SasSigner,
}

impl FilesystemBlobStore {
    pub async fn new(
        base_path: PathBuf,
        containers: ContainerNames,
        max_size: u64,
        signer: SasSigner,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(base_path.join(".tmp")).await?;
        for tier in [StorageTier::Private, StorageTier::Public, StorageTier::Thumbnail] {
            fs::create_dir_all(base_path.join(containers.name(tier))).await?;
        }
        Ok(Self {
            base_path,
            containers,
            max_size,
            leases: LeaseRegistry::new(),
            signer,
        })
    }

    pub async fn from_config(config: &StorageConfig, max_size: u64) -> Result<Self, StorageError> {
        let signer = SasSigner::new(&config.base_url, config.signing_key.as_bytes());
        Self::new(
            PathBuf::from(&config.base_path),
            ContainerNames::from_config(config),
            max_size,
            signer,
        )
        .await
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    pub fn container_name(&self, tier: StorageTier) -> &str {
        self.containers.name(tier)
    }

    fn blob_path(&self, key: &str, tier: StorageTier) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.base_path.join(self.containers.name(tier)).join(key))
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path.join(".tmp").join(Uuid::new_v4().to_string())
    }

    /// Move a finished temp file to its final location.
    async fn commit(&self, temp_path: &Path, blob_path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = fs::rename(temp_path, blob_path).await {
            let _ = fs::remove_file(temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn write_bytes(&self, blob_path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let temp_path = self.temp_path();
        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        self.commit(&temp_path, blob_path).await
    }

    async fn copy_unleased(
        &self,
        key: &str,
        from: StorageTier,
        to: StorageTier,
    ) -> Result<Option<String>, StorageError> {
        let src = self.blob_path(key, from)?;
        let dst = self.blob_path(key, to)?;
        if src == dst {
            return Ok(fs::try_exists(&src).await?.then(|| key.to_string()));
        }

        let temp_path = self.temp_path();
        match fs::copy(&src, &temp_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let _ = fs::remove_file(&temp_path).await;
                return Ok(None);
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
        }
        self.commit(&temp_path, &dst).await?;
        Ok(Some(key.to_string()))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn upload(
        &self,
        mut reader: BoxReader,
        file_name: &str,
        content_type: &str,
        tier: StorageTier,
    ) -> Result<String, StorageError> {
        let key = format!("{}/{}", Uuid::new_v4(), sanitize_file_name(file_name));
        let blob_path = self.blob_path(&key, tier)?;
        let temp_path = self.temp_path();

        let mut total_bytes: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        let mut temp_file = fs::File::create(&temp_path).await?;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            total_bytes += n as u64;
            if total_bytes > self.max_size {
                drop(temp_file);
                let _ = fs::remove_file(&temp_path).await;
                return Err(StorageError::SizeLimitExceeded {
                    actual: total_bytes,
                    limit: self.max_size,
                });
            }

            temp_file.write_all(&buf[..n]).await?;
        }

        temp_file.flush().await?;
        drop(temp_file);

        self.commit(&temp_path, &blob_path).await?;
        debug!(
            key = %key,
            container = self.containers.name(tier),
            content_type,
            size = total_bytes,
            "Stored blob"
        );
        Ok(key)
    }

    async fn download(
        &self,
        key: &str,
        tier: StorageTier,
    ) -> Result<Option<BoxReader>, StorageError> {
        let blob_path = self.blob_path(key, tier)?;
        match fs::File::open(&blob_path).await {
            Ok(file) => Ok(Some(Box::new(BufReader::new(file)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str, tier: StorageTier) -> Result<bool, StorageError> {
        let blob_path = self.blob_path(key, tier)?;
        Ok(fs::try_exists(&blob_path).await?)
    }

    async fn delete(&self, key: &str, tier: StorageTier) -> Result<bool, StorageError> {
        let blob_path = self.blob_path(key, tier)?;
        match fs::remove_file(&blob_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy(
        &self,
        key: &str,
        from: StorageTier,
        to: StorageTier,
    ) -> Result<Option<String>, StorageError> {
        self.copy_unleased(key, from, to).await
    }

    async fn move_blob(
        &self,
        key: &str,
        from: StorageTier,
        to: StorageTier,
    ) -> Result<Option<String>, StorageError> {
        validate_key(key)?;
        if from == to {
            return Ok(self.exists(key, from).await?.then(|| key.to_string()));
        }

        let container = self.containers.name(from);
        let Some(_lease) = self.leases.try_acquire(container, key) else {
            return Err(StorageError::LeaseUnavailable {
                container: container.to_string(),
                key: key.to_string(),
            });
        };

        let Some(new_key) = self.copy_unleased(key, from, to).await? else {
            return Ok(None);
        };
        if !self.delete(key, from).await? {
            warn!(key, container, "Source blob vanished during move");
        }
        Ok(Some(new_key))
    }

    fn generate_sas_url(
        &self,
        key: &str,
        tier: StorageTier,
        ttl: Duration,
        permissions: SasPermissions,
    ) -> Result<String, StorageError> {
        validate_key(key)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StorageError::Signature(e.to_string()))?;
        self.signer
            .sign(self.containers.name(tier), key, Utc::now() + ttl, permissions)
    }

    async fn generate_thumbnail(
        &self,
        key: &str,
        tier: StorageTier,
        max_width: u32,
        max_height: u32,
    ) -> Result<Option<String>, StorageError> {
        let dest_tier = StorageTier::thumbnail_for_visibility(tier == StorageTier::Public);
        let thumb_key = thumbnail_key(key, max_width, max_height);
        if self.exists(&thumb_key, dest_tier).await? {
            return Ok(Some(thumb_key));
        }

        let Some(data) = self.download_bytes(key, tier).await? else {
            return Ok(None);
        };
        let png = tokio::task::spawn_blocking(move || {
            render_thumbnail(&data, max_width, max_height)
        })
        .await
        .map_err(|e| StorageError::Image(format!("thumbnail task failed: {e}")))??;

        let thumb_path = self.blob_path(&thumb_key, dest_tier)?;
        self.write_bytes(&thumb_path, &png).await?;
        Ok(Some(thumb_key))
    }
}

/// Reject keys that could escape their container directory.
fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Reduce a client-supplied file name to a single safe path segment.
fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            c if c.is_control() => '_',
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "blob".to_string()
    } else {
        cleaned
    }
}
