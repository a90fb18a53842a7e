use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use common::{FileProcessingItem, ProcessingPriority};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// In-memory work queue for the processing engine.
///
/// One FIFO lane per [`ProcessingPriority`]; `dequeue` always drains the
/// highest non-empty lane first.
#[derive(Debug, Default)]
pub struct ProcessingQueue {
    lanes: Mutex<[VecDeque<FileProcessingItem>; 3]>,
    notify: Notify,
}

impl ProcessingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lanes(&self) -> MutexGuard<'_, [VecDeque<FileProcessingItem>; 3]> {
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enqueue(&self, item: FileProcessingItem) {
        debug!(
            file_id = %item.file_metadata_id,
            operation = %item.operation,
            priority = ?item.priority,
            "Enqueued file operation"
        );
        self.lanes()[item.priority.index()].push_back(item);
        self.notify.notify_one();
    }

    pub fn try_dequeue(&self) -> Option<FileProcessingItem> {
        let mut lanes = self.lanes();
        ProcessingPriority::ORDERED
            .iter()
            .find_map(|p| lanes[p.index()].pop_front())
    }

    /// Wait for the next item. Returns `None` once `cancel` fires.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<FileProcessingItem> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_dequeue() {
                return Some(item);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    pub fn size(&self) -> usize {
        self.lanes().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Snapshot in dequeue order.
    pub fn peek_all(&self) -> Vec<FileProcessingItem> {
        self.lanes().iter().flat_map(|lane| lane.iter().cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use common::FileOperation;
    use uuid::Uuid;

    use super::*;

    fn item(op: FileOperation) -> FileProcessingItem {
        FileProcessingItem::new(Uuid::new_v4(), op)
    }

    #[test]
    fn test_higher_priority_drains_first() {
        let queue = ProcessingQueue::new();
        let thumb = item(FileOperation::GenerateThumbnail);
        let public = item(FileOperation::MoveToPublicStorage);
        let scan_a = item(FileOperation::ScanForViruses);
        let scan_b = item(FileOperation::ScanForViruses);
        for i in [&thumb, &public, &scan_a, &scan_b] {
            queue.enqueue(i.clone());
        }

        assert_eq!(queue.size(), 4);
        let order: Vec<Uuid> = queue.peek_all().iter().map(|i| i.file_metadata_id).collect();
        assert_eq!(
            order,
            vec![
                scan_a.file_metadata_id,
                scan_b.file_metadata_id,
                public.file_metadata_id,
                thumb.file_metadata_id
            ]
        );
        assert_eq!(queue.size(), 4);

        let drained: Vec<Uuid> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|i| i.file_metadata_id)
            .collect();
        assert_eq!(drained, order);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_explicit_priority_overrides_default() {
        let queue = ProcessingQueue::new();
        queue.enqueue(item(FileOperation::ScanForViruses));
        let urgent = item(FileOperation::GenerateThumbnail).with_priority(ProcessingPriority::High);
        queue.enqueue(urgent.clone());
        queue.enqueue(item(FileOperation::Delete).with_priority(ProcessingPriority::Low));

        queue.try_dequeue();
        assert_eq!(queue.try_dequeue().unwrap().file_metadata_id, urgent.file_metadata_id);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(ProcessingQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let expected = item(FileOperation::Delete);
        queue.enqueue(expected.clone());

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(expected));
    }

    #[tokio::test]
    async fn test_dequeue_returns_none_on_cancel() {
        let queue = ProcessingQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(queue.dequeue(&cancel).await.is_none());
    }
}
