use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use common::FileProcessingItem;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::FileError;
use crate::handlers::OperationHandlers;
use crate::queue::ProcessingQueue;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Upper bound on operations running at once. Default: 5.
    pub max_concurrent: usize,
    /// How long an idle dispatcher waits before re-checking the queue.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub active: usize,
    pub peak: usize,
    pub completed: usize,
    pub failed: usize,
    pub queued: usize,
    /// Items parked behind another operation on the same file.
    pub deferred: usize,
}

#[derive(Debug, Default)]
struct EngineCounters {
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Counts one running operation for as long as it lives.
struct ActiveGuard(Arc<EngineCounters>);

impl ActiveGuard {
    fn enter(counters: &Arc<EngineCounters>) -> Self {
        let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(counters))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Operations parked per file while an earlier one on that file runs.
type InFlight = DashMap<Uuid, VecDeque<FileProcessingItem>>;

/// Pop the next parked item for `file_id`, releasing the file when none is left.
fn next_for_file(in_flight: &InFlight, file_id: Uuid) -> Option<FileProcessingItem> {
    match in_flight.entry(file_id) {
        Entry::Occupied(mut waiting) => {
            let next = waiting.get_mut().pop_front();
            if next.is_none() {
                waiting.remove();
            }
            next
        }
        Entry::Vacant(_) => None,
    }
}

/// Drains the [`ProcessingQueue`] with bounded concurrency.
///
/// At most one operation runs per file at a time; later items for a busy
/// file run in arrival order once it is released. A failing or panicking
/// operation marks its file as errored and never stops the loop.
pub struct ProcessingEngine {
    queue: Arc<ProcessingQueue>,
    handlers: Arc<OperationHandlers>,
    config: EngineConfig,
    permits: Arc<Semaphore>,
    counters: Arc<EngineCounters>,
    running: AtomicBool,
    tasks: TaskTracker,
    in_flight: Arc<InFlight>,
}

impl ProcessingEngine {
    pub fn new(
        queue: Arc<ProcessingQueue>,
        handlers: Arc<OperationHandlers>,
        config: EngineConfig,
    ) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            queue,
            handlers,
            config: EngineConfig {
                max_concurrent,
                ..config
            },
            permits: Arc::new(Semaphore::new(max_concurrent)),
            counters: Arc::new(EngineCounters::default()),
            running: AtomicBool::new(false),
            tasks: TaskTracker::new(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn queue(&self) -> &Arc<ProcessingQueue> {
        &self.queue
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active: self.counters.active.load(Ordering::SeqCst),
            peak: self.counters.peak.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            queued: self.queue.size(),
            deferred: self.in_flight.iter().map(|waiting| waiting.len()).sum(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Dispatch until `shutdown` fires, then wait for in-flight operations.
    ///
    /// Only one loop may run per engine.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), FileError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FileError::Processing(
                "processing engine is already running".into(),
            ));
        }
        self.tasks.reopen();
        info!(max_concurrent = self.config.max_concurrent, "Processing engine started");

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let item = tokio::select! {
                item = self.queue.dequeue(&shutdown) => match item {
                    Some(item) => item,
                    None => break,
                },
                _ = tokio::time::sleep(self.config.poll_interval) => continue,
            };

            let file_id = item.file_metadata_id;
            match self.in_flight.entry(file_id) {
                Entry::Occupied(mut waiting) => {
                    debug!(
                        file_id = %file_id,
                        operation = %item.operation,
                        "File busy, deferring operation"
                    );
                    waiting.get_mut().push_back(item);
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(VecDeque::new());
                }
            }

            let handlers = Arc::clone(&self.handlers);
            let counters = Arc::clone(&self.counters);
            let in_flight = Arc::clone(&self.in_flight);
            self.tasks.spawn(async move {
                let _permit = permit;
                let mut item = item;
                loop {
                    {
                        let _active = ActiveGuard::enter(&counters);
                        process_item(&handlers, &counters, item).await;
                    }
                    match next_for_file(&in_flight, file_id) {
                        Some(next) => item = next,
                        None => break,
                    }
                }
            });
        }

        self.tasks.close();
        let in_flight = self.tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight operations");
        }
        self.tasks.wait().await;
        self.running.store(false, Ordering::SeqCst);
        info!("Processing engine stopped");
        Ok(())
    }
}

async fn process_item(
    handlers: &OperationHandlers,
    counters: &EngineCounters,
    item: FileProcessingItem,
) {
    debug!(
        file_id = %item.file_metadata_id,
        operation = %item.operation,
        "Processing file operation"
    );

    let failure = match AssertUnwindSafe(handlers.handle(&item)).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some("operation panicked".to_string()),
    };

    match failure {
        None => {
            counters.completed.fetch_add(1, Ordering::SeqCst);
        }
        Some(message) => {
            error!(
                file_id = %item.file_metadata_id,
                operation = %item.operation,
                error = %message,
                "File operation failed"
            );
            handlers.record_failure(&item, &message).await;
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
