use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::version::{VersionRequirement, same_version};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mod {
    pub id: String,
    pub title: String,
    pub author_id: String,
    pub category: String,
    pub game_id: String,
    pub is_private: bool,
    /// Oldest first.
    pub versions: Vec<ModVersion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mod {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        author_id: impl Into<String>,
        category: impl Into<String>,
        game_id: impl Into<String>,
        first_version: ModVersion,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            author_id: author_id.into(),
            category: category.into(),
            game_id: game_id.into(),
            is_private: false,
            versions: vec![first_version],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn version(&self, version_number: &str) -> Option<&ModVersion> {
        self.versions
            .iter()
            .find(|v| same_version(&v.version_number, version_number))
    }

    pub fn has_version(&self, version_number: &str) -> bool {
        self.version(version_number).is_some()
    }

    /// Most recently added version.
    pub fn latest_version(&self) -> Option<&ModVersion> {
        self.versions.last()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModVersion {
    pub id: Uuid,
    pub version_number: String,
    #[serde(default)]
    pub dependencies: Vec<ModDependency>,
    #[serde(default)]
    pub compatibilities: Vec<ModCompatibility>,
    pub main_file: Option<ModFile>,
    #[serde(default)]
    pub changelog: String,
    pub created_at: DateTime<Utc>,
}

impl ModVersion {
    pub fn new(version_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            version_number: version_number.into(),
            dependencies: Vec::new(),
            compatibilities: Vec::new(),
            main_file: None,
            changelog: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_dependency(mut self, dependency: ModDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_compatibility(mut self, compatibility: ModCompatibility) -> Self {
        self.compatibilities.push(compatibility);
        self
    }

    pub fn with_changelog(mut self, changelog: impl Into<String>) -> Self {
        self.changelog = changelog.into();
        self
    }
}

/// Downloadable archive of a version, stored by the file service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModFile {
    pub file_id: Uuid,
    pub file_name: String,
    pub file_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModDependency {
    pub dependency_mod_id: String,
    #[serde(default)]
    pub version_requirement: VersionRequirement,
    #[serde(default = "default_required")]
    pub is_required: bool,
}

fn default_required() -> bool {
    true
}

impl ModDependency {
    pub fn required(mod_id: impl Into<String>, requirement: VersionRequirement) -> Self {
        Self {
            dependency_mod_id: mod_id.into(),
            version_requirement: requirement,
            is_required: true,
        }
    }

    pub fn optional(mod_id: impl Into<String>, requirement: VersionRequirement) -> Self {
        Self {
            is_required: false,
            ..Self::required(mod_id, requirement)
        }
    }

    pub fn is_version_compatible(&self, version: &str) -> bool {
        self.version_requirement.matches_str(version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompatibilityType {
    Compatible,
    PartiallyCompatible,
    Incompatible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModCompatibility {
    pub source_mod_id: String,
    pub target_mod_id: String,
    #[serde(rename = "type")]
    pub compatibility_type: CompatibilityType,
    #[serde(default)]
    pub source_versions: Vec<String>,
    /// Empty means every version of the target.
    #[serde(default)]
    pub target_versions: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl ModCompatibility {
    pub fn incompatible(
        source_mod_id: impl Into<String>,
        target_mod_id: impl Into<String>,
        target_versions: Vec<String>,
    ) -> Self {
        Self {
            source_mod_id: source_mod_id.into(),
            target_mod_id: target_mod_id.into(),
            compatibility_type: CompatibilityType::Incompatible,
            source_versions: Vec::new(),
            target_versions,
            notes: String::new(),
        }
    }

    pub fn applies_to_target(&self, version_number: &str) -> bool {
        self.target_versions.is_empty()
            || self
                .target_versions
                .iter()
                .any(|v| same_version(v, version_number))
    }
}
