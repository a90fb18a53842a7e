use std::time::Duration;

use common::config::{FilesConfig, MqAppConfig, StorageConfig, VirusScanConfig};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use files::EngineConfig;
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Upper bound on file operations running at once. Default: 5.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_file_operations: usize,
    /// How long an idle engine waits before polling the queue again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_worker_id() -> String {
    "file-worker-1".into()
}
fn default_max_concurrent() -> usize {
    5
}
fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            max_concurrent_file_operations: default_max_concurrent(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Where file metadata and scan results are kept.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStore {
    /// Process memory. Records are lost on restart and are not shared
    /// between workers, so run a single worker against one storage root.
    #[default]
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    pub store: MetadataStore,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub virus_scan: VirusScanConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
}

impl WorkerAppConfig {
    /// Read `MODHUB_CONFIG` (default `config/config`), then `MODHUB__*` overrides.
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("MODHUB_CONFIG").unwrap_or_else(|_| "config/config".to_string());
        Self::build(
            Config::builder()
                .add_source(File::with_name(&config_path).required(false))
                .add_source(Environment::with_prefix("MODHUB").separator("__")),
        )
    }

    fn build(sources: ConfigBuilder<DefaultState>) -> Result<Self> {
        let defaults = Config::builder()
            .set_default("worker.id", default_worker_id())?
            .set_default("worker.max_concurrent_file_operations", default_max_concurrent() as u64)?
            .set_default("worker.poll_interval_ms", default_poll_interval_ms())?;
        Ok(defaults
            .add_source(sources.build()?)
            .build()?
            .try_deserialize()?)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent: self.worker.max_concurrent_file_operations.max(1),
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
        }
    }
}
