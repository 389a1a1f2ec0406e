//! Durable work queue
//!
//! Thin typed layer over the storage queue tables. Every stage of the crawl
//! pulls its work from here, so restarts resume exactly where the previous
//! run stopped.

use crate::state::{QueueStatus, QueueType};
use crate::storage::{NewQueueItem, QueueItemRecord, Storage, StorageError, StorageResult};
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared across the crawl stages
pub type SharedStorage = Arc<Mutex<dyn Storage + Send>>;

/// Locked view of the shared storage handle
///
/// The object lifetime must be spelled out; left elided it would default to
/// the guard's lifetime, which the lock's `'static` trait object rejects.
pub type StorageGuard<'a> = MutexGuard<'a, dyn Storage + Send + 'static>;

/// Counts of queue items per status for one queue type
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Work queue for one crawl stage
pub struct CrawlQueue {
    storage: SharedStorage,
    queue_type: QueueType,
}

impl CrawlQueue {
    pub fn new(storage: SharedStorage, queue_type: QueueType) -> Self {
        Self {
            storage,
            queue_type,
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn lock(&self) -> StorageResult<StorageGuard<'_>> {
        self.storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()))
    }

    /// Enqueues a URL, deduplicating on its hash within this queue
    ///
    /// Returns the item ID and whether the item is new.
    pub fn push(
        &self,
        url: &str,
        priority: i64,
        max_attempts: u32,
        category_id: Option<i64>,
        product_id: Option<i64>,
    ) -> StorageResult<(i64, bool)> {
        let item = NewQueueItem {
            url,
            queue_type: self.queue_type,
            priority,
            max_attempts,
            category_id,
            product_id,
            metadata: None,
        };
        let (id, created) = self.lock()?.enqueue_item(&item)?;
        if created {
            tracing::debug!(url = %url, priority, queue = %self.queue_type, "enqueued");
        }
        Ok((id, created))
    }

    /// Claims the next batch of pending items, stamping their leases
    pub fn claim(&self, limit: u32) -> StorageResult<Vec<QueueItemRecord>> {
        self.lock()?.claim_batch(self.queue_type, limit)
    }

    /// Marks an item done
    pub fn complete(&self, item_id: i64) -> StorageResult<()> {
        self.lock()?.complete_item(item_id)
    }

    /// Records a failed attempt; the item requeues until its budget runs out
    pub fn fail(&self, item_id: i64, error: &str) -> StorageResult<QueueStatus> {
        let status = self.lock()?.fail_item(item_id, error)?;
        if status == QueueStatus::Failed {
            tracing::warn!(item_id, error = %error, "queue item exhausted its attempts");
        }
        Ok(status)
    }

    /// Returns stale leased items to pending, charging an attempt
    pub fn reap_stale(&self, lease_timeout_secs: u64) -> StorageResult<u64> {
        let reaped = self.lock()?.reap_stale_items(lease_timeout_secs)?;
        if reaped > 0 {
            tracing::warn!(reaped, queue = %self.queue_type, "reaped stale leases");
        }
        Ok(reaped)
    }

    pub fn count(&self, status: QueueStatus) -> StorageResult<u64> {
        self.lock()?.count_queue_items(self.queue_type, status)
    }

    pub fn stats(&self) -> StorageResult<QueueStats> {
        let storage = self.lock()?;
        Ok(QueueStats {
            pending: storage.count_queue_items(self.queue_type, QueueStatus::Pending)?,
            processing: storage.count_queue_items(self.queue_type, QueueStatus::Processing)?,
            completed: storage.count_queue_items(self.queue_type, QueueStatus::Completed)?,
            failed: storage.count_queue_items(self.queue_type, QueueStatus::Failed)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    fn queue(queue_type: QueueType) -> CrawlQueue {
        let storage: SharedStorage =
            Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        CrawlQueue::new(storage, queue_type)
    }

    #[test]
    fn test_push_deduplicates() {
        let queue = queue(QueueType::ProductList);
        let (id1, created1) = queue.push("https://x/cat/fruit", 50, 3, None, None).unwrap();
        let (id2, created2) = queue.push("https://x/cat/fruit", 90, 3, None, None).unwrap();

        assert!(created1);
        assert!(!created2);
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_claim_complete_cycle() {
        let queue = queue(QueueType::Category);
        let (id, _) = queue.push("https://x/dept/fresh", 80, 3, None, None).unwrap();

        let batch = queue.claim(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);

        queue.complete(id).unwrap();
        assert_eq!(queue.count(QueueStatus::Completed).unwrap(), 1);
        assert!(queue.claim(10).unwrap().is_empty());
    }

    #[test]
    fn test_fail_requeues_then_exhausts() {
        let queue = queue(QueueType::ProductDetail);
        let (id, _) = queue.push("https://x/product/1", 0, 2, None, None).unwrap();

        assert_eq!(queue.fail(id, "timeout").unwrap(), QueueStatus::Pending);
        assert_eq!(queue.fail(id, "timeout").unwrap(), QueueStatus::Failed);
        assert_eq!(queue.count(QueueStatus::Failed).unwrap(), 1);
    }

    #[test]
    fn test_stats() {
        let queue = queue(QueueType::ProductList);
        queue.push("https://x/a", 0, 3, None, None).unwrap();
        queue.push("https://x/b", 0, 3, None, None).unwrap();
        queue.claim(1).unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.total(), 2);
    }
}
