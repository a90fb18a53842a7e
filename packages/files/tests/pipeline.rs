mod support;

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use common::config::VirusScanConfig;
use common::event::ModUpdated;
use common::file::metadata_keys;
use common::storage::BlobStore;
use common::{
    FileOperation, FileProcessingItem, FileStatus, OwningEntity, ScanStatus, StorageTier,
};
use files::{
    ClamAvScanner, FileError, FileMetadataRepository, ModEventConsumer, ScanOutcome,
    ScanResultRepository, UploadRequest,
};
use support::{FixedScanner, harness};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn mod_archive(name: &str) -> UploadRequest {
    UploadRequest::new(name, "application/zip", b"PK\x03\x04archive".to_vec(), "u1")
        .owned_by(OwningEntity::Mod("m1".into()))
}

fn mod_cover(name: &str, width: u32, height: u32) -> UploadRequest {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 120, 60]));
    let mut png = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut png, image::ImageFormat::Png)
        .unwrap();
    UploadRequest::new(name, "image/png", png.into_inner(), "u1")
        .owned_by(OwningEntity::Mod("m1".into()))
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() { count_files(&path) } else { 1 }
        })
        .sum()
}

#[tokio::test]
async fn five_byte_png_without_header_is_rejected() {
    let h = harness(Arc::new(FixedScanner(ScanOutcome::clean()))).await;
    let request = UploadRequest::new("cover.png", "image/png", b"hello".to_vec(), "u1")
        .owned_by(OwningEntity::Mod("m1".into()));

    let err = h.service.upload(request).await.unwrap_err();
    let FileError::Validation(errors) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert!(errors.iter().any(|e| e.contains("image/png")));
    assert!(h.files.is_empty());
    assert!(h.queue.is_empty());
    assert!(
        std::fs::read_dir(h.storage.base_path().join("private-files"))
            .unwrap()
            .next()
            .is_none()
    );
}

#[tokio::test]
async fn clean_upload_becomes_available() {
    let h = harness(Arc::new(FixedScanner(ScanOutcome::clean()))).await;
    let meta = h.service.upload(mod_archive("trees.zip")).await.unwrap();
    assert_eq!(meta.status, FileStatus::Pending);

    h.process(1).await;

    let stored = h.files.get_by_id(meta.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FileStatus::Available);
    let scans = h.scans.get_by_file_id(meta.id).await.unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].status, ScanStatus::Clean);
}

/// Minimal clamd that reports every stream as EICAR.
async fn eicar_daemon() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut command = [0u8; 10];
        socket.read_exact(&mut command).await.unwrap();
        loop {
            let mut len = [0u8; 4];
            socket.read_exact(&mut len).await.unwrap();
            let len = u32::from_be_bytes(len) as usize;
            if len == 0 {
                break;
            }
            let mut chunk = vec![0u8; len];
            socket.read_exact(&mut chunk).await.unwrap();
        }
        socket
            .write_all(b"stream: Eicar-Test-Signature FOUND\0")
            .await
            .unwrap();
    });
    port
}

#[tokio::test]
async fn eicar_reply_quarantines_file() {
    let port = eicar_daemon().await;
    let scanner = ClamAvScanner::new(VirusScanConfig {
        host: "127.0.0.1".into(),
        port,
        timeout_ms: 2_000,
        ..VirusScanConfig::default()
    });
    let h = harness(Arc::new(scanner)).await;
    let meta = h.service.upload(mod_archive("eicar.zip")).await.unwrap();

    h.process(1).await;

    let stored = h.files.get_by_id(meta.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FileStatus::Quarantined);
    let scans = h.scans.get_by_file_id(meta.id).await.unwrap();
    assert_eq!(scans[0].status, ScanStatus::Infected);
    assert_eq!(scans[0].threat_name.as_deref(), Some("Eicar-Test-Signature"));

    let download = h.service.download(meta.id, Some("u1")).await;
    assert!(matches!(download, Err(FileError::Quarantined(_))));
}

#[tokio::test]
async fn second_public_move_is_noop() {
    let h = harness(Arc::new(FixedScanner(ScanOutcome::clean()))).await;
    let meta = h.service.upload(mod_archive("trees.zip")).await.unwrap();
    h.process(1).await;

    h.service.set_visibility(meta.id, "u1", true).await.unwrap();
    h.process(1).await;
    let first = h.files.get_by_id(meta.id).await.unwrap().unwrap();
    assert!(first.is_public);
    assert_eq!(first.storage_container, StorageTier::Public);
    assert!(h.storage.exists(&first.storage_location, StorageTier::Public).await.unwrap());
    assert!(!h.storage.exists(&first.storage_location, StorageTier::Private).await.unwrap());

    h.service.set_visibility(meta.id, "u1", true).await.unwrap();
    h.process(1).await;
    let second = h.files.get_by_id(meta.id).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(h.engine.stats().failed, 0);
}

#[tokio::test]
async fn concurrency_cap_holds_for_twenty_scans() {
    struct SlowScanner;

    #[async_trait::async_trait]
    impl files::VirusScanner for SlowScanner {
        async fn scan(
            &self,
            _content: common::storage::BoxReader,
            _size: Option<u64>,
            _file_name: &str,
        ) -> ScanOutcome {
            tokio::time::sleep(std::time::Duration::from_millis(40)).await;
            ScanOutcome::clean()
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    let h = harness(Arc::new(SlowScanner)).await;
    for i in 0..20 {
        h.service
            .upload(mod_archive(&format!("part-{i}.zip")))
            .await
            .unwrap();
    }
    assert_eq!(h.queue.size(), 20);

    h.process(20).await;

    let stats = h.engine.stats();
    assert_eq!(stats.completed, 20);
    assert!(stats.peak <= 5, "peak was {}", stats.peak);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn image_upload_keeps_scan_verdict_and_thumbnail() {
    let h = harness(Arc::new(FixedScanner(ScanOutcome::clean()))).await;
    let meta = h.service.upload(mod_cover("cover.png", 400, 300)).await.unwrap();
    assert_eq!(h.queue.size(), 2);

    let consumer = ModEventConsumer::new(h.files.clone(), h.queue.clone());
    let update = ModUpdated {
        mod_id: "m1".into(),
        title: Some("Forest Pack".into()),
        version: Some("2.0".into()),
        is_private: false,
    };
    let ((), updated) = tokio::join!(h.process(2), consumer.on_updated(update));
    updated.unwrap();

    let stored = h.files.get_by_id(meta.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FileStatus::Available);
    assert!(stored.has_thumbnail);
    let thumb = stored.thumbnail_location.clone().unwrap();
    assert!(h.storage.exists(&thumb, StorageTier::Thumbnail).await.unwrap());
    assert_eq!(stored.custom_metadata[metadata_keys::MOD_TITLE], "Forest Pack");
    assert_eq!(stored.custom_metadata[metadata_keys::MOD_VERSION], "2.0");
    assert_eq!(h.scans.get_by_file_id(meta.id).await.unwrap().len(), 1);
    assert_eq!(h.engine.stats().failed, 0);
}

#[tokio::test]
async fn repeated_thumbnail_request_changes_nothing() {
    let h = harness(Arc::new(FixedScanner(ScanOutcome::clean()))).await;
    let meta = h.service.upload(mod_cover("banner.png", 320, 320)).await.unwrap();
    h.process(2).await;

    let first = h.files.get_by_id(meta.id).await.unwrap().unwrap();
    assert!(first.has_thumbnail);
    let thumbs_dir = h
        .storage
        .base_path()
        .join(h.storage.container_name(StorageTier::Thumbnail));
    assert_eq!(count_files(&thumbs_dir), 1);

    h.queue
        .enqueue(FileProcessingItem::new(meta.id, FileOperation::GenerateThumbnail));
    h.process(1).await;

    let second = h.files.get_by_id(meta.id).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(count_files(&thumbs_dir), 1);
    assert_eq!(h.engine.stats().failed, 0);
}
