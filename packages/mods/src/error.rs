use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModError {
    #[error("mod not found: {0}")]
    ModNotFound(String),

    #[error("version {version} of mod {mod_id} not found")]
    VersionNotFound { mod_id: String, version: String },

    #[error("mod {mod_id} already has version {version}")]
    DuplicateVersion { mod_id: String, version: String },

    #[error("cannot delete the last version of mod {0}")]
    LastVersion(String),

    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("invalid version requirement '{0}'")]
    InvalidRequirement(String),

    #[error("catalog error: {0}")]
    Catalog(String),
}
