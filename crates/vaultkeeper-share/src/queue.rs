//! Job queues feeding the worker.
//!
//! [`StoreQueue`] is the durable queue backed by the store's `jobs` table.
//! [`MemoryQueue`] is a tokio channel for tests and embedded use; it loses
//! its contents on restart.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use vaultkeeper_core::{now_millis, Job};
use vaultkeeper_store::Store;

use crate::error::{Result, ShareError};

/// A job taken from a queue, to be acknowledged once handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    /// Durable id, if the queue has one.
    pub id: Option<i64>,
    pub job: Job,
}

/// A source and sink of background jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job.
    async fn push(&self, job: Job) -> Result<()>;

    /// Take the next job without waiting. `None` when the queue is empty.
    async fn pop(&self) -> Result<Option<QueuedJob>>;

    /// Mark a popped job as handled.
    async fn ack(&self, job: &QueuedJob) -> Result<()>;

    /// Return jobs popped before `older_than` and never acknowledged.
    async fn requeue_unacked(&self, _older_than: i64) -> Result<u64> {
        Ok(0)
    }
}

/// Durable queue on top of a [`Store`].
pub struct StoreQueue<S: Store> {
    store: Arc<S>,
}

impl<S: Store> StoreQueue<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> JobQueue for StoreQueue<S> {
    async fn push(&self, job: Job) -> Result<()> {
        let id = self.store.enqueue_job(&job, now_millis()).await?;
        tracing::debug!(job = id, kind = job.kind(), "job enqueued");
        Ok(())
    }

    async fn pop(&self) -> Result<Option<QueuedJob>> {
        Ok(self
            .store
            .claim_job(now_millis())
            .await?
            .map(|claimed| QueuedJob {
                id: Some(claimed.id),
                job: claimed.job,
            }))
    }

    async fn ack(&self, job: &QueuedJob) -> Result<()> {
        if let Some(id) = job.id {
            self.store.complete_job(id, now_millis()).await?;
        }
        Ok(())
    }

    async fn requeue_unacked(&self, older_than: i64) -> Result<u64> {
        Ok(self.store.requeue_claimed_jobs(older_than).await?)
    }
}

/// In-process queue on an unbounded tokio channel.
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn push(&self, job: Job) -> Result<()> {
        self.tx.send(job).map_err(|_| ShareError::QueueClosed)
    }

    async fn pop(&self) -> Result<Option<QueuedJob>> {
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(job) => Ok(Some(QueuedJob { id: None, job })),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ShareError::QueueClosed),
        }
    }

    async fn ack(&self, _job: &QueuedJob) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultkeeper_core::{ShareProcessId, VaultId};
    use vaultkeeper_store::SqliteStore;

    #[tokio::test]
    async fn test_memory_queue_fifo() {
        let queue = MemoryQueue::new();
        let first = Job::ShareProcess(ShareProcessId::new());
        let second = Job::cleanup_vault(VaultId::new());
        queue.push(first.clone()).await.unwrap();
        queue.push(second.clone()).await.unwrap();

        assert_eq!(queue.pop().await.unwrap().unwrap().job, first);
        assert_eq!(queue.pop().await.unwrap().unwrap().job, second);
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_queue_ack_completes_job() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let queue = StoreQueue::new(store.clone());
        queue.push(Job::cleanup_vault(VaultId::new())).await.unwrap();

        let job = queue.pop().await.unwrap().unwrap();
        assert!(job.id.is_some());
        assert_eq!(store.open_job_count().await.unwrap(), 1);

        queue.ack(&job).await.unwrap();
        assert_eq!(store.open_job_count().await.unwrap(), 0);
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_queue_requeues_unacked() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let queue = StoreQueue::new(store);
        let job = Job::ShareProcess(ShareProcessId::new());
        queue.push(job.clone()).await.unwrap();

        let popped = queue.pop().await.unwrap().unwrap();
        assert!(queue.pop().await.unwrap().is_none());

        assert_eq!(queue.requeue_unacked(now_millis() + 1).await.unwrap(), 1);
        let again = queue.pop().await.unwrap().unwrap();
        assert_eq!(again.id, popped.id);
        assert_eq!(again.job, job);
    }
}
