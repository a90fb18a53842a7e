mod error;
mod lease;
mod sas;
mod thumbnail;
mod traits;

pub mod filesystem;

pub use error::StorageError;
pub use filesystem::FilesystemBlobStore;
pub use lease::{BlobLease, LeaseRegistry};
pub use sas::{SasGrant, SasSigner};
pub use thumbnail::{render_thumbnail, resize_to_png, thumbnail_key};
pub use traits::{BlobStore, BoxReader, SasPermissions};

#[cfg(test)]
pub(crate) use thumbnail::sample_png;

use crate::config::StorageConfig;
use crate::file::StorageTier;

/// Physical container name for each storage tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNames {
    pub private: String,
    pub public: String,
    pub thumbnail: String,
}

impl ContainerNames {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            private: config.private_container.clone(),
            public: config.public_container.clone(),
            thumbnail: config.thumbnail_container.clone(),
        }
    }

    pub fn name(&self, tier: StorageTier) -> &str {
        match tier {
            StorageTier::Private => &self.private,
            StorageTier::Public => &self.public,
            StorageTier::Thumbnail => &self.thumbnail,
        }
    }
}

impl Default for ContainerNames {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}
