use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::ModCatalog;
use crate::error::ModError;
use crate::model::{CompatibilityType, Mod, ModCompatibility, ModVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingReason {
    ModNotFound,
    NoCompatibleVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingDependency {
    pub mod_id: String,
    pub requirement: String,
    pub is_required: bool,
    pub reason: MissingReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompatibleDependency {
    pub mod_id: String,
    /// Versions of the target that conflict and are present in the catalog.
    pub conflicting_versions: Vec<String>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCheck {
    pub is_satisfied: bool,
    pub missing_dependencies: Vec<MissingDependency>,
    pub incompatible_dependencies: Vec<IncompatibleDependency>,
    pub error: Option<String>,
}

impl DependencyCheck {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            is_satisfied: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn missing_ids(&self) -> Vec<&str> {
        self.missing_dependencies
            .iter()
            .map(|m| m.mod_id.as_str())
            .collect()
    }
}

/// Notes attached to every suggested compatibility entry.
pub const SUGGESTION_NOTE: &str = "Suggested automatically; needs confirmation before use.";

/// Evaluates declared dependencies and incompatibilities against the catalog.
pub struct DependencyResolver {
    catalog: Arc<dyn ModCatalog>,
}

impl DependencyResolver {
    pub fn new(catalog: Arc<dyn ModCatalog>) -> Self {
        Self { catalog }
    }

    async fn load_version(
        &self,
        mod_id: &str,
        version_number: &str,
    ) -> Result<(Mod, ModVersion), ModError> {
        let m = self
            .catalog
            .get_mod(mod_id)
            .await?
            .ok_or_else(|| ModError::ModNotFound(mod_id.to_string()))?;
        let version = m
            .version(version_number)
            .cloned()
            .ok_or_else(|| ModError::VersionNotFound {
                mod_id: mod_id.to_string(),
                version: version_number.to_string(),
            })?;
        Ok((m, version))
    }

    /// Never fails: lookup problems come back as an unsatisfied check.
    pub async fn check_dependencies(&self, mod_id: &str, version_number: &str) -> DependencyCheck {
        match self.evaluate(mod_id, version_number).await {
            Ok(check) => check,
            Err(e) => {
                debug!(mod_id, version = version_number, error = %e, "Dependency check failed");
                DependencyCheck::failed(e.to_string())
            }
        }
    }

    async fn evaluate(&self, mod_id: &str, version_number: &str) -> Result<DependencyCheck, ModError> {
        let (_, version) = self.load_version(mod_id, version_number).await?;
        let mut check = DependencyCheck::default();

        for dep in &version.dependencies {
            let reason = match self.catalog.get_mod(&dep.dependency_mod_id).await? {
                None => Some(MissingReason::ModNotFound),
                Some(target) => {
                    let found = target
                        .versions
                        .iter()
                        .any(|v| dep.is_version_compatible(&v.version_number));
                    (!found && dep.is_required).then_some(MissingReason::NoCompatibleVersion)
                }
            };
            if let Some(reason) = reason {
                check.missing_dependencies.push(MissingDependency {
                    mod_id: dep.dependency_mod_id.clone(),
                    requirement: dep.version_requirement.to_string(),
                    is_required: dep.is_required,
                    reason,
                });
            }
        }

        for compat in version
            .compatibilities
            .iter()
            .filter(|c| c.compatibility_type == CompatibilityType::Incompatible)
        {
            let Some(target) = self.catalog.get_mod(&compat.target_mod_id).await? else {
                continue;
            };
            let conflicting: Vec<String> = target
                .versions
                .iter()
                .filter(|v| compat.applies_to_target(&v.version_number))
                .map(|v| v.version_number.clone())
                .collect();
            if !conflicting.is_empty() {
                check.incompatible_dependencies.push(IncompatibleDependency {
                    mod_id: compat.target_mod_id.clone(),
                    conflicting_versions: conflicting,
                    notes: compat.notes.clone(),
                });
            }
        }

        check.is_satisfied =
            check.missing_dependencies.is_empty() && check.incompatible_dependencies.is_empty();
        if !check.is_satisfied {
            warn!(
                mod_id,
                version = version_number,
                missing = ?check.missing_ids(),
                incompatible = check.incompatible_dependencies.len(),
                "Dependencies not satisfied"
            );
        }
        Ok(check)
    }

    /// Propose `PartiallyCompatible` entries for other mods of the same
    /// category and game. Advisory only; nothing is saved.
    pub async fn analyze_compatibilities(
        &self,
        mod_id: &str,
        version_number: &str,
    ) -> Result<Vec<ModCompatibility>, ModError> {
        let (source, version) = self.load_version(mod_id, version_number).await?;
        let declared: HashSet<&str> = version
            .compatibilities
            .iter()
            .map(|c| c.target_mod_id.as_str())
            .collect();

        let suggestions = self
            .catalog
            .find_by_category(&source.category, &source.game_id)
            .await?
            .into_iter()
            .filter(|other| other.id != source.id && !declared.contains(other.id.as_str()))
            .map(|other| ModCompatibility {
                source_mod_id: source.id.clone(),
                target_mod_id: other.id.clone(),
                compatibility_type: CompatibilityType::PartiallyCompatible,
                source_versions: vec![version.version_number.clone()],
                target_versions: other
                    .latest_version()
                    .map(|v| vec![v.version_number.clone()])
                    .unwrap_or_default(),
                notes: format!(
                    "{SUGGESTION_NOTE} Both mods are in category '{}' for game '{}'.",
                    source.category, source.game_id
                ),
            })
            .collect();
        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryModCatalog;
    use crate::model::ModDependency;

    fn mod_with(id: &str, category: &str, version: ModVersion) -> Mod {
        Mod::new(id, id.to_uppercase(), "author", category, "game-1", version)
    }

    fn resolver(mods: Vec<Mod>) -> DependencyResolver {
        DependencyResolver::new(Arc::new(InMemoryModCatalog::with_mods(mods)))
    }

    #[tokio::test]
    async fn test_required_version_not_in_catalog_is_missing() {
        let a = mod_with(
            "a",
            "maps",
            ModVersion::new("1.0")
                .with_dependency(ModDependency::required("b", ">=2.0".parse().unwrap())),
        );
        let b = mod_with("b", "maps", ModVersion::new("1.0"));
        let check = resolver(vec![a, b]).check_dependencies("a", "1.0").await;

        assert!(!check.is_satisfied);
        assert_eq!(check.missing_ids(), ["b"]);
        assert_eq!(
            check.missing_dependencies[0].reason,
            MissingReason::NoCompatibleVersion
        );
        assert!(check.error.is_none());
    }

    #[tokio::test]
    async fn test_satisfied_when_any_version_matches() {
        let a = mod_with(
            "a",
            "maps",
            ModVersion::new("1.0")
                .with_dependency(ModDependency::required("b", "^2.0".parse().unwrap())),
        );
        let mut b = mod_with("b", "maps", ModVersion::new("1.0"));
        b.versions.push(ModVersion::new("2.3.1"));
        let check = resolver(vec![a, b]).check_dependencies("a", "1.0").await;
        assert!(check.is_satisfied);
        assert!(check.missing_dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_optional_without_match_does_not_fail() {
        let a = mod_with(
            "a",
            "maps",
            ModVersion::new("1.0")
                .with_dependency(ModDependency::optional("b", ">=5".parse().unwrap())),
        );
        let b = mod_with("b", "maps", ModVersion::new("1.0"));
        let check = resolver(vec![a, b]).check_dependencies("a", "1.0").await;
        assert!(check.is_satisfied);
    }

    #[tokio::test]
    async fn test_absent_dependency_mod_is_missing() {
        let a = mod_with(
            "a",
            "maps",
            ModVersion::new("1.0").with_dependency(ModDependency::required(
                "ghost",
                Default::default(),
            )),
        );
        let check = resolver(vec![a]).check_dependencies("a", "1.0").await;
        assert!(!check.is_satisfied);
        assert_eq!(check.missing_dependencies[0].reason, MissingReason::ModNotFound);
    }

    #[tokio::test]
    async fn test_declared_incompatibility_with_present_version() {
        let a = mod_with(
            "a",
            "maps",
            ModVersion::new("1.0").with_compatibility(ModCompatibility::incompatible(
                "a",
                "c",
                vec!["0.9".into(), "1.0".into()],
            )),
        );
        let mut c = mod_with("c", "maps", ModVersion::new("0.8"));
        c.versions.push(ModVersion::new("1.0"));
        let check = resolver(vec![a, c]).check_dependencies("a", "1.0").await;

        assert!(!check.is_satisfied);
        assert_eq!(check.incompatible_dependencies.len(), 1);
        assert_eq!(check.incompatible_dependencies[0].conflicting_versions, ["1.0"]);
    }

    #[tokio::test]
    async fn test_unknown_mod_or_version_is_unsatisfied() {
        let a = mod_with("a", "maps", ModVersion::new("1.0"));
        let r = resolver(vec![a]);

        let no_mod = r.check_dependencies("zzz", "1.0").await;
        assert!(!no_mod.is_satisfied);
        assert!(no_mod.error.is_some());

        let no_version = r.check_dependencies("a", "9.0").await;
        assert!(!no_version.is_satisfied);
        assert!(no_version.error.unwrap().contains("9.0"));
    }

    #[tokio::test]
    async fn test_analysis_suggests_same_category_mods() {
        let a = mod_with(
            "a",
            "maps",
            ModVersion::new("1.0").with_compatibility(ModCompatibility::incompatible(
                "a",
                "d",
                Vec::new(),
            )),
        );
        let mut b = mod_with("b", "maps", ModVersion::new("1.0"));
        b.versions.push(ModVersion::new("1.2"));
        let c = mod_with("c", "textures", ModVersion::new("1.0"));
        let d = mod_with("d", "maps", ModVersion::new("1.0"));
        let mut other_game = mod_with("e", "maps", ModVersion::new("1.0"));
        other_game.game_id = "game-2".into();

        let suggestions = resolver(vec![a, b, c, d, other_game])
            .analyze_compatibilities("a", "1.0")
            .await
            .unwrap();

        assert_eq!(suggestions.len(), 1);
        let s = &suggestions[0];
        assert_eq!(s.target_mod_id, "b");
        assert_eq!(s.compatibility_type, CompatibilityType::PartiallyCompatible);
        assert_eq!(s.target_versions, ["1.2"]);
        assert!(s.notes.contains("needs confirmation"));
    }
}
