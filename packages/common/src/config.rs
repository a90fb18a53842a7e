use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Which event bus implementation to run against.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MqBackend {
    /// In-process topic exchange; single-node deployments and tests.
    #[default]
    Memory,
    /// Redis through broccoli_queue.
    Redis,
}

/// App-level MQ configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    #[serde(default)]
    pub backend: MqBackend,
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Redeliveries before a message is dead-lettered. Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Message time-to-live on every queue. Default: 24h.
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,
    #[serde(default = "default_files_exchange")]
    pub files_exchange: String,
    #[serde(default = "default_mods_exchange")]
    pub mods_exchange: String,
    #[serde(default = "default_users_exchange")]
    pub users_exchange: String,
    /// Prefix for the queues this service declares. Default: "file-service".
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_max_retries() -> u8 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_message_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_files_exchange() -> String {
    "files".into()
}
fn default_mods_exchange() -> String {
    "mods".into()
}
fn default_users_exchange() -> String {
    "users".into()
}
fn default_queue_prefix() -> String {
    "file-service".into()
}

impl MqAppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }

    /// Queue name for one of this service's subscriptions.
    pub fn queue_name(&self, suffix: &str) -> String {
        format!("{}.{}", self.queue_prefix, suffix)
    }
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            backend: MqBackend::default(),
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            message_ttl_secs: default_message_ttl_secs(),
            files_exchange: default_files_exchange(),
            mods_exchange: default_mods_exchange(),
            users_exchange: default_users_exchange(),
            queue_prefix: default_queue_prefix(),
        }
    }
}

/// Upload rules and post-processing switches.
#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    /// Default: 100 MiB.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Allowed content types; `type/*` wildcards accepted.
    #[serde(default = "default_allowed_categories")]
    pub allowed_file_categories: Vec<String>,
    #[serde(default = "default_max_filename_length")]
    pub max_filename_length: usize,
    /// Uploads must name an owning entity unless this is false.
    #[serde(default = "default_true")]
    pub require_entity_association: bool,
    #[serde(default)]
    pub allow_executables: bool,
    #[serde(default = "default_true")]
    pub track_downloads: bool,
    #[serde(default = "default_true")]
    pub auto_generate_thumbnails: bool,
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_width: u32,
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_height: u32,
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}
fn default_allowed_categories() -> Vec<String> {
    [
        "image/*",
        "application/zip",
        "application/x-7z-compressed",
        "application/x-rar-compressed",
        "application/pdf",
        "text/plain",
        "application/octet-stream",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_max_filename_length() -> usize {
    255
}
fn default_true() -> bool {
    true
}
fn default_thumbnail_size() -> u32 {
    256
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            allowed_file_categories: default_allowed_categories(),
            max_filename_length: default_max_filename_length(),
            require_entity_association: true,
            allow_executables: false,
            track_downloads: true,
            auto_generate_thumbnails: true,
            thumbnail_width: default_thumbnail_size(),
            thumbnail_height: default_thumbnail_size(),
        }
    }
}

/// What a scan that could not complete means for the file.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanFailurePolicy {
    /// Mark the file Available and attach a warning.
    #[default]
    FailOpen,
    /// Mark the file Error; it stays blocked until rescanned.
    FailClosed,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VirusScanConfig {
    /// When false every file is reported clean without contacting clamd.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scan_host")]
    pub host: String,
    #[serde(default = "default_scan_port")]
    pub port: u16,
    #[serde(default = "default_scan_timeout_ms")]
    pub timeout_ms: u64,
    /// Default: 25 MiB.
    #[serde(default = "default_max_scan_size")]
    pub max_scan_size_bytes: u64,
    /// Default: 64 KiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    #[serde(default)]
    pub failure_policy: ScanFailurePolicy,
}

fn default_scan_host() -> String {
    "localhost".into()
}
fn default_scan_port() -> u16 {
    3310
}
fn default_scan_timeout_ms() -> u64 {
    30_000
}
fn default_max_scan_size() -> u64 {
    25 * 1024 * 1024
}
fn default_chunk_size() -> usize {
    64 * 1024
}

impl Default for VirusScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_scan_host(),
            port: default_scan_port(),
            timeout_ms: default_scan_timeout_ms(),
            max_scan_size_bytes: default_max_scan_size(),
            chunk_size_bytes: default_chunk_size(),
            failure_policy: ScanFailurePolicy::default(),
        }
    }
}

/// Blob storage location and container names.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub base_path: String,
    #[serde(default = "default_public_container")]
    pub public_container: String,
    #[serde(default = "default_private_container")]
    pub private_container: String,
    #[serde(default = "default_thumbnail_container")]
    pub thumbnail_container: String,
    /// Prefix for generated SAS URLs.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// HMAC key for SAS URLs.
    #[serde(default)]
    pub signing_key: String,
}

fn default_storage_path() -> String {
    "./data/blobs".into()
}
fn default_public_container() -> String {
    "public-files".into()
}
fn default_private_container() -> String {
    "private-files".into()
}
fn default_thumbnail_container() -> String {
    "thumbnails".into()
}
fn default_base_url() -> String {
    "http://localhost:8080/blobs".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_path(),
            public_container: default_public_container(),
            private_container: default_private_container(),
            thumbnail_container: default_thumbnail_container(),
            base_url: default_base_url(),
            signing_key: String::new(),
        }
    }
}
