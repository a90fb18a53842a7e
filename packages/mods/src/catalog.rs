use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::info;

use crate::error::ModError;
use crate::model::{Mod, ModVersion};
use crate::version::same_version;

/// Read/write access to mods and their versions.
#[async_trait]
pub trait ModCatalog: Send + Sync {
    async fn get_mod(&self, mod_id: &str) -> Result<Option<Mod>, ModError>;

    async fn save_mod(&self, m: &Mod) -> Result<(), ModError>;

    /// Mods in a category for one game, ordered by id.
    async fn find_by_category(&self, category: &str, game_id: &str) -> Result<Vec<Mod>, ModError>;
}

#[derive(Debug, Default)]
pub struct InMemoryModCatalog {
    mods: DashMap<String, Mod>,
}

impl InMemoryModCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mods(mods: impl IntoIterator<Item = Mod>) -> Self {
        let catalog = Self::new();
        for m in mods {
            catalog.mods.insert(m.id.clone(), m);
        }
        catalog
    }
}

#[async_trait]
impl ModCatalog for InMemoryModCatalog {
    async fn get_mod(&self, mod_id: &str) -> Result<Option<Mod>, ModError> {
        Ok(self.mods.get(mod_id).map(|m| m.value().clone()))
    }

    async fn save_mod(&self, m: &Mod) -> Result<(), ModError> {
        self.mods.insert(m.id.clone(), m.clone());
        Ok(())
    }

    async fn find_by_category(&self, category: &str, game_id: &str) -> Result<Vec<Mod>, ModError> {
        let mut found: Vec<Mod> = self
            .mods
            .iter()
            .filter(|m| m.category == category && m.game_id == game_id)
            .map(|m| m.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

/// Adds and removes versions while keeping every mod at one version or more.
pub struct VersionManager {
    catalog: Arc<dyn ModCatalog>,
}

impl VersionManager {
    pub fn new(catalog: Arc<dyn ModCatalog>) -> Self {
        Self { catalog }
    }

    async fn load(&self, mod_id: &str) -> Result<Mod, ModError> {
        self.catalog
            .get_mod(mod_id)
            .await?
            .ok_or_else(|| ModError::ModNotFound(mod_id.to_string()))
    }

    /// Append a version. Version numbers are unique within a mod.
    pub async fn add_version(&self, mod_id: &str, version: ModVersion) -> Result<ModVersion, ModError> {
        let mut m = self.load(mod_id).await?;
        if m.has_version(&version.version_number) {
            return Err(ModError::DuplicateVersion {
                mod_id: mod_id.to_string(),
                version: version.version_number,
            });
        }
        m.versions.push(version.clone());
        m.updated_at = Utc::now();
        self.catalog.save_mod(&m).await?;
        info!(mod_id, version = %version.version_number, "Mod version added");
        Ok(version)
    }

    pub async fn delete_version(&self, mod_id: &str, version_number: &str) -> Result<(), ModError> {
        let mut m = self.load(mod_id).await?;
        let Some(index) = m
            .versions
            .iter()
            .position(|v| same_version(&v.version_number, version_number))
        else {
            return Err(ModError::VersionNotFound {
                mod_id: mod_id.to_string(),
                version: version_number.to_string(),
            });
        };
        if m.versions.len() <= 1 {
            return Err(ModError::LastVersion(mod_id.to_string()));
        }
        m.versions.remove(index);
        m.updated_at = Utc::now();
        self.catalog.save_mod(&m).await?;
        info!(mod_id, version = version_number, "Mod version deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(versions: &[&str]) -> (VersionManager, Arc<InMemoryModCatalog>) {
        let mut m = Mod::new("m1", "Trees", "u1", "graphics", "g1", ModVersion::new(versions[0]));
        for v in &versions[1..] {
            m.versions.push(ModVersion::new(*v));
        }
        let catalog = Arc::new(InMemoryModCatalog::with_mods([m]));
        (VersionManager::new(catalog.clone()), catalog)
    }

    #[tokio::test]
    async fn test_add_version_keeps_order_and_uniqueness() {
        let (manager, catalog) = manager_with(&["1.0"]);
        manager.add_version("m1", ModVersion::new("1.1")).await.unwrap();

        let dup = manager.add_version("m1", ModVersion::new("v1.1.0")).await;
        assert!(matches!(dup, Err(ModError::DuplicateVersion { .. })));

        let stored = catalog.get_mod("m1").await.unwrap().unwrap();
        let numbers: Vec<&str> = stored.versions.iter().map(|v| v.version_number.as_str()).collect();
        assert_eq!(numbers, ["1.0", "1.1"]);
    }

    #[tokio::test]
    async fn test_last_version_cannot_be_deleted() {
        let (manager, catalog) = manager_with(&["1.0", "1.1"]);
        manager.delete_version("m1", "1.0").await.unwrap();

        let last = manager.delete_version("m1", "1.1").await;
        assert!(matches!(last, Err(ModError::LastVersion(_))));
        assert_eq!(catalog.get_mod("m1").await.unwrap().unwrap().versions.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_mod_and_version() {
        let (manager, _) = manager_with(&["1.0", "1.1"]);
        assert!(matches!(
            manager.delete_version("m1", "3.0").await,
            Err(ModError::VersionNotFound { .. })
        ));
        assert!(matches!(
            manager.add_version("nope", ModVersion::new("1.0")).await,
            Err(ModError::ModNotFound(_))
        ));
    }
}
