//! Mod catalog, version management and dependency resolution.

pub mod catalog;
pub mod error;
pub mod model;
pub mod resolver;
pub mod version;

pub use catalog::{InMemoryModCatalog, ModCatalog, VersionManager};
pub use error::ModError;
pub use model::{CompatibilityType, Mod, ModCompatibility, ModDependency, ModFile, ModVersion};
pub use resolver::{
    DependencyCheck, DependencyResolver, IncompatibleDependency, MissingDependency, MissingReason,
};
pub use version::{Version, VersionRequirement};
