use std::time::Duration;

use async_trait::async_trait;
use clamav_client::tokio::{Tcp, scan_stream};
use common::ScanStatus;
use common::config::VirusScanConfig;
use common::storage::BoxReader;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// What a scanner concluded about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub status: ScanStatus,
    pub message: Option<String>,
    pub threat_name: Option<String>,
}

impl ScanOutcome {
    pub fn clean() -> Self {
        Self {
            status: ScanStatus::Clean,
            message: None,
            threat_name: None,
        }
    }

    pub fn infected(threat: impl Into<String>) -> Self {
        let threat = threat.into();
        Self {
            status: ScanStatus::Infected,
            message: Some(format!("Threat detected: {threat}")),
            threat_name: Some(threat),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Error,
            message: Some(message.into()),
            threat_name: None,
        }
    }
}

/// Virus scanning backend.
///
/// Implementations never fail: an unreachable daemon, a timeout or an
/// oversized file all come back as [`ScanStatus::Error`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VirusScanner: Send + Sync {
    async fn scan(&self, content: BoxReader, size: Option<u64>, file_name: &str) -> ScanOutcome;

    fn name(&self) -> &'static str;
}

/// clamd client over TCP, streaming content with `zINSTREAM`.
#[derive(Debug, Clone)]
pub struct ClamAvScanner {
    config: VirusScanConfig,
}

impl ClamAvScanner {
    pub fn new(config: VirusScanConfig) -> Self {
        Self { config }
    }

    /// Stream `content` to clamd in configured chunks and return its raw reply.
    ///
    /// Content of unknown size is cut off once it passes the scan limit.
    async fn stream_to_daemon(&self, content: BoxReader) -> std::io::Result<Vec<u8>> {
        let chunk_size = self.config.chunk_size_bytes.max(1);
        let max = self.config.max_scan_size_bytes;
        let mut total: u64 = 0;
        let chunks = ReaderStream::with_capacity(content, chunk_size).map(move |chunk| {
            let chunk = chunk?;
            total += chunk.len() as u64;
            if total > max {
                return Err(std::io::Error::other(format!(
                    "file exceeds maximum scan size of {max} bytes"
                )));
            }
            Ok(chunk)
        });

        let host_address = format!("{}:{}", self.config.host, self.config.port);
        let clamd = Tcp {
            host_address: &host_address,
        };
        scan_stream(chunks, clamd, Some(chunk_size)).await
    }
}

/// Interpret a clamd reply such as `stream: Eicar-Test-Signature FOUND`.
pub fn parse_response(line: &str) -> ScanOutcome {
    let line = line.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if line.is_empty() {
        return ScanOutcome::error("empty response from scanner");
    }
    if line.ends_with("OK") {
        return ScanOutcome::clean();
    }
    if let Some(found_at) = line.rfind("FOUND") {
        let before = &line[..found_at];
        let threat = match before.rfind(':') {
            Some(colon) => before[colon + 1..].trim(),
            None => before.trim(),
        };
        if threat.is_empty() {
            return ScanOutcome::infected("Unknown");
        }
        return ScanOutcome::infected(threat);
    }
    if line.contains("ERROR") {
        return ScanOutcome::error(line.to_string());
    }
    ScanOutcome::error(format!("unexpected scanner response: {line}"))
}

#[async_trait]
impl VirusScanner for ClamAvScanner {
    async fn scan(&self, content: BoxReader, size: Option<u64>, file_name: &str) -> ScanOutcome {
        if !self.config.enabled {
            debug!(file_name, "Virus scanning disabled, reporting clean");
            return ScanOutcome::clean();
        }
        if let Some(size) = size
            && size > self.config.max_scan_size_bytes
        {
            warn!(
                file_name,
                size,
                max = self.config.max_scan_size_bytes,
                "File too large to scan"
            );
            return ScanOutcome::error(format!(
                "file exceeds maximum scan size of {} bytes",
                self.config.max_scan_size_bytes
            ));
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let outcome = match tokio::time::timeout(timeout, self.stream_to_daemon(content)).await {
            Ok(Ok(reply)) => parse_response(&String::from_utf8_lossy(&reply)),
            Ok(Err(e)) => ScanOutcome::error(format!("scan failed: {e}")),
            Err(_) => ScanOutcome::error(format!(
                "scanner timed out after {}ms",
                self.config.timeout_ms
            )),
        };

        if outcome.status == ScanStatus::Error {
            warn!(file_name, message = ?outcome.message, "Virus scan did not complete");
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "ClamAV"
    }
}
