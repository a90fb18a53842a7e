#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::FilesConfig;
use common::storage::{BoxReader, ContainerNames, FilesystemBlobStore, SasSigner};
use files::{
    EngineConfig, FileEvents, FileService, InMemoryFileMetadataRepository,
    InMemoryScanResultRepository, OperationHandlers, ProcessingEngine, ProcessingQueue,
    ProcessingSettings, ScanOutcome, VirusScanner,
};
use mq::InMemoryEventBus;
use tokio_util::sync::CancellationToken;

/// Scanner that always answers the same way.
pub struct FixedScanner(pub ScanOutcome);

#[async_trait]
impl VirusScanner for FixedScanner {
    async fn scan(&self, _content: BoxReader, _size: Option<u64>, _file_name: &str) -> ScanOutcome {
        self.0.clone()
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

pub struct Harness {
    pub bus: Arc<InMemoryEventBus>,
    pub files: Arc<InMemoryFileMetadataRepository>,
    pub scans: Arc<InMemoryScanResultRepository>,
    pub storage: Arc<FilesystemBlobStore>,
    pub queue: Arc<ProcessingQueue>,
    pub service: FileService,
    pub engine: Arc<ProcessingEngine>,
    _dir: tempfile::TempDir,
}

pub async fn harness(scanner: Arc<dyn VirusScanner>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = FilesConfig::default();
    let storage = Arc::new(
        FilesystemBlobStore::new(
            dir.path().to_path_buf(),
            ContainerNames::default(),
            config.max_file_size_bytes,
            SasSigner::new("http://localhost/blobs", "test-key"),
        )
        .await
        .unwrap(),
    );
    let bus = Arc::new(InMemoryEventBus::default());
    let files = Arc::new(InMemoryFileMetadataRepository::new());
    let scans = Arc::new(InMemoryScanResultRepository::new());
    let queue = Arc::new(ProcessingQueue::new());
    let events = FileEvents::new(bus.clone(), "files");

    let handlers = Arc::new(OperationHandlers::new(
        files.clone(),
        scans.clone(),
        storage.clone(),
        scanner,
        events.clone(),
        ProcessingSettings::default(),
    ));
    let engine = Arc::new(ProcessingEngine::new(
        queue.clone(),
        handlers.clone(),
        EngineConfig {
            max_concurrent: 5,
            poll_interval: Duration::from_millis(20),
        },
    ));
    let service = FileService::new(
        files.clone(),
        storage.clone(),
        queue.clone(),
        handlers,
        events,
        config,
    );

    Harness {
        bus,
        files,
        scans,
        storage,
        queue,
        service,
        engine,
        _dir: dir,
    }
}

impl Harness {
    /// Run the engine until `count` more operations have finished.
    pub async fn process(&self, count: usize) {
        let before = self.engine.stats();
        let target = before.completed + before.failed + count;
        let shutdown = CancellationToken::new();
        let runner = {
            let engine = Arc::clone(&self.engine);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { engine.run(shutdown).await })
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let stats = self.engine.stats();
                if stats.completed + stats.failed >= target {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        runner.await.unwrap().unwrap();
    }
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
