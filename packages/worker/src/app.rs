use std::sync::Arc;

use common::storage::FilesystemBlobStore;
use files::consumers::{subscribe_mod_events, subscribe_user_events};
use files::{
    ClamAvScanner, FileEvents, InMemoryFileMetadataRepository, InMemoryScanResultRepository,
    ModEventConsumer, OperationHandlers, ProcessingEngine, ProcessingQueue, ProcessingSettings,
    UserEventConsumer,
};
use mq::Subscription;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{MetadataStore, WorkerAppConfig};
use crate::error::Result;

/// The processing engine plus the event subscriptions that feed its queue.
pub struct FileWorker {
    engine: Arc<ProcessingEngine>,
    subscriptions: Vec<Subscription>,
}

impl FileWorker {
    pub async fn start(config: &WorkerAppConfig) -> Result<Self> {
        let bus = mq::connect(&config.mq).await?;
        info!(backend = ?config.mq.backend, "Event bus connected");

        let storage = Arc::new(
            FilesystemBlobStore::from_config(&config.storage, config.files.max_file_size_bytes)
                .await?,
        );
        info!(path = %config.storage.base_path, "Blob storage ready");

        if !config.virus_scan.enabled {
            warn!("Virus scanning is disabled; every file will be reported clean");
        }
        let scanner = Arc::new(ClamAvScanner::new(config.virus_scan.clone()));

        let (files, scans) = match config.metadata.store {
            MetadataStore::Memory => {
                warn!("File metadata is kept in memory and will not survive a restart");
                (
                    Arc::new(InMemoryFileMetadataRepository::new()),
                    Arc::new(InMemoryScanResultRepository::new()),
                )
            }
        };
        let queue = Arc::new(ProcessingQueue::new());

        let handlers = Arc::new(OperationHandlers::new(
            files.clone(),
            scans,
            storage,
            scanner,
            FileEvents::new(bus.clone(), config.mq.files_exchange.clone()),
            ProcessingSettings::from_config(&config.files, &config.virus_scan),
        ));
        let engine = Arc::new(ProcessingEngine::new(
            queue.clone(),
            handlers,
            config.engine_config(),
        ));

        let mod_consumer = Arc::new(ModEventConsumer::new(files.clone(), queue.clone()));
        let mut subscriptions =
            subscribe_mod_events(mod_consumer, bus.as_ref(), &config.mq).await?;

        let user_consumer = Arc::new(UserEventConsumer::new(
            files,
            queue,
            bus.clone(),
            config.mq.users_exchange.clone(),
        ));
        subscriptions.extend(subscribe_user_events(user_consumer, bus.as_ref(), &config.mq).await?);

        for sub in &subscriptions {
            info!(queue = sub.queue(), "Subscribed");
        }

        Ok(Self {
            engine,
            subscriptions,
        })
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Run the engine until `shutdown` fires, then stop consuming events.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let result = self.engine.run(shutdown).await;
        for sub in &self.subscriptions {
            sub.abort();
        }
        let stats = self.engine.stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            queued = stats.queued,
            "File worker stopped"
        );
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> WorkerAppConfig {
        let mut config = WorkerAppConfig::default();
        config.storage.base_path = dir.path().to_string_lossy().into_owned();
        config.virus_scan.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_start_subscribes_every_queue() {
        let dir = tempfile::tempdir().unwrap();
        let worker = FileWorker::start(&test_config(&dir)).await.unwrap();

        let mut queues: Vec<&str> = worker.subscriptions().iter().map(|s| s.queue()).collect();
        queues.sort();
        assert_eq!(
            queues,
            [
                "file-service.mod-deleted",
                "file-service.mod-published",
                "file-service.mod-updated",
                "file-service.user-data-export",
                "file-service.user-deleted",
                "file-service.user-updated",
            ]
        );
        assert!(dir.path().join("private-files").is_dir());
    }

    #[tokio::test]
    async fn test_run_returns_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let worker = FileWorker::start(&test_config(&dir)).await.unwrap();

        let token = CancellationToken::new();
        let handle = tokio::spawn(worker.run(token.clone()));
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
