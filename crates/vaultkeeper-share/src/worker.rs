//! Background worker draining the job queue.
//!
//! Share processes run concurrently up to `WorkerConfig::concurrency`;
//! cleanup jobs run inline between polls. A job is acknowledged once
//! handled. Jobs that fail on a store error stay unacknowledged and come
//! back through stall recovery.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use vaultkeeper_core::{now_millis, Job, ShareProcessId};
use vaultkeeper_perms::UnlockProof;
use vaultkeeper_store::Store;

use crate::config::WorkerConfig;
use crate::engine::ShareProcessEngine;
use crate::error::{Result, ShareError};
use crate::queue::{JobQueue, QueuedJob};
use crate::reaper::PartialAccessReaper;

/// Unlock proofs for processes awaiting execution, held in memory only.
///
/// A proof is dropped once its process reaches a terminal state. After a
/// restart the cache is empty and processes wait for their initiator to
/// resume them.
#[derive(Clone, Default)]
pub struct ProofCache {
    inner: Arc<Mutex<HashMap<ShareProcessId, Arc<UnlockProof>>>>,
}

impl ProofCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ShareProcessId, proof: UnlockProof) {
        self.lock().insert(id, Arc::new(proof));
    }

    pub fn get(&self, id: ShareProcessId) -> Option<Arc<UnlockProof>> {
        self.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: ShareProcessId) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ShareProcessId, Arc<UnlockProof>>> {
        // The map stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ProofCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofCache").field("len", &self.len()).finish()
    }
}

/// Executes queued jobs against the engine and the reaper.
pub struct Worker<S: Store> {
    store: Arc<S>,
    engine: Arc<ShareProcessEngine<S>>,
    reaper: PartialAccessReaper<S>,
    queue: Arc<dyn JobQueue>,
    proofs: ProofCache,
    config: WorkerConfig,
}

impl<S: Store + 'static> Worker<S> {
    pub fn new(
        store: Arc<S>,
        engine: Arc<ShareProcessEngine<S>>,
        queue: Arc<dyn JobQueue>,
        proofs: ProofCache,
        config: WorkerConfig,
    ) -> Self {
        Self {
            reaper: PartialAccessReaper::new(store.clone()),
            store,
            engine,
            queue,
            proofs,
            config,
        }
    }

    pub fn proofs(&self) -> &ProofCache {
        &self.proofs
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Handle one job and acknowledge it.
    pub async fn handle(&self, queued: QueuedJob) -> Result<()> {
        match &queued.job {
            Job::ShareProcess(id) => self.run_share(*id).await?,
            Job::PartialAccessCleanup {
                vault_id,
                group_ids,
            } => {
                let report = self.reaper.clean_up(*vault_id, group_ids).await?;
                tracing::debug!(
                    vaults = report.vaults,
                    deleted = report.deleted,
                    "cleanup job done"
                );
            }
        }
        self.queue.ack(&queued).await
    }

    async fn run_share(&self, id: ShareProcessId) -> Result<()> {
        let Some(proof) = self.proofs.get(id) else {
            tracing::warn!(process_id = %id, "no unlock proof, process waits for resume");
            return Ok(());
        };

        match self.engine.run(id, &proof).await {
            Ok(report) if report.status.is_terminal() => {
                self.proofs.remove(id);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(
                e @ (ShareError::ProcessNotFound(_) | ShareError::ProcessAlreadyTerminal { .. }),
            ) => {
                tracing::debug!(process_id = %id, error = %e, "share job dropped");
                self.proofs.remove(id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Handle queued jobs one by one until the queue is empty.
    ///
    /// Returns the number of jobs handled.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut handled = 0;
        while let Some(queued) = self.queue.pop().await? {
            self.handle(queued).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Put stalled processes and unacknowledged jobs back in line.
    ///
    /// Processes this worker's engine is still executing are never stalled,
    /// however long their current batch takes. Returns the number of
    /// processes requeued.
    pub async fn recover_stalled(&self) -> Result<usize> {
        let now = now_millis();
        let older_than = now - self.engine.config().stale_after_ms;

        let jobs = self.queue.requeue_unacked(older_than).await?;
        let live = self.engine.running();
        let stalled = self.store.requeue_stalled(older_than, now, &live).await?;
        for id in &stalled {
            self.queue.push(Job::ShareProcess(*id)).await?;
        }
        if jobs > 0 || !stalled.is_empty() {
            tracing::warn!(jobs, processes = stalled.len(), "recovered stalled work");
        }
        Ok(stalled.len())
    }

    /// Poll the queue until `shutdown` resolves, then wait for running
    /// share processes to finish.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let stale_after_ms = self.engine.config().stale_after_ms;
        let recovery_every = Duration::from_millis((stale_after_ms / 2).max(1) as u64);
        let mut recovery = tokio::time::interval(recovery_every);
        recovery.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        tracing::info!(concurrency = self.config.concurrency, "worker started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = recovery.tick() => {
                    if let Err(e) = self.recover_stalled().await {
                        tracing::warn!(error = %e, "stall recovery failed");
                    }
                }
                _ = poll.tick() => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "share task panicked");
                    }
                }
            }
            self.dispatch(&permits, &mut tasks).await;
        }

        tracing::info!(in_flight = tasks.len(), "worker stopping");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "share task panicked");
            }
        }
        Ok(())
    }

    /// Pop jobs while there is capacity.
    async fn dispatch(self: &Arc<Self>, permits: &Arc<Semaphore>, tasks: &mut JoinSet<()>) {
        loop {
            let Ok(permit) = permits.clone().try_acquire_owned() else {
                return;
            };
            let queued = match self.queue.pop().await {
                Ok(Some(queued)) => queued,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "queue poll failed");
                    return;
                }
            };

            if let Job::ShareProcess(_) = queued.job {
                let worker = Arc::clone(self);
                tasks.spawn(async move {
                    let _permit = permit;
                    let kind = queued.job.kind();
                    if let Err(e) = worker.handle(queued).await {
                        tracing::warn!(kind, error = %e, "job failed");
                    }
                });
            } else {
                drop(permit);
                let kind = queued.job.kind();
                if let Err(e) = self.handle(queued).await {
                    tracing::warn!(kind, error = %e, "job failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::queue::{MemoryQueue, StoreQueue};
    use crate::testing::Fixture;
    use vaultkeeper_core::{GrantRequest, ItemStatus, ItemTarget, ScopeRef, ShareStatus};
    use vaultkeeper_store::{BatchCommit, ItemOutcome, SqliteStore};

    fn worker(
        fx: &Fixture,
        queue: Arc<dyn JobQueue>,
        config: WorkerConfig,
    ) -> Arc<Worker<SqliteStore>> {
        let engine = Arc::new(ShareProcessEngine::new(
            fx.store.clone(),
            queue.clone(),
            EngineConfig::default(),
        ));
        Arc::new(Worker::new(fx.store.clone(), engine, queue, ProofCache::new(), config))
    }

    #[tokio::test]
    async fn test_run_until_idle_completes_process_and_cleanup() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        let s = fx.secret(&alice, vault, None, b"hello").await;

        let worker = worker(&fx, Arc::new(MemoryQueue::new()), WorkerConfig::default());
        let process = worker
            .engine
            .create(
                ScopeRef::Vault(vault),
                false,
                vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)],
                alice.user.id,
            )
            .await
            .unwrap();
        worker.proofs().insert(process.id, alice.proof());
        worker.queue().push(Job::ShareProcess(process.id)).await.unwrap();

        // The share job, then the cleanup it enqueued.
        assert_eq!(worker.run_until_idle().await.unwrap(), 2);
        let stored = fx.store.get_share_process(process.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ShareStatus::Completed);
        assert!(worker.proofs().is_empty());
        assert_eq!(fx.read(&bob, s).await, b"hello");
    }

    #[tokio::test]
    async fn test_job_without_proof_leaves_process_pending() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let vault = fx.vault(&alice).await;

        let worker = worker(&fx, Arc::new(MemoryQueue::new()), WorkerConfig::default());
        let process = worker
            .engine
            .create(
                ScopeRef::Vault(vault),
                false,
                vec![GrantRequest::write(alice.group)],
                alice.user.id,
            )
            .await
            .unwrap();
        worker.queue().push(Job::ShareProcess(process.id)).await.unwrap();

        assert_eq!(worker.run_until_idle().await.unwrap(), 1);
        let stored = fx.store.get_share_process(process.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ShareStatus::Pending);
    }

    #[tokio::test]
    async fn test_stalled_process_is_recovered() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        fx.secret(&alice, vault, None, b"x").await;

        let queue: Arc<dyn JobQueue> = Arc::new(StoreQueue::new(fx.store.clone()));
        let worker = worker(&fx, queue, WorkerConfig::default());
        let process = worker
            .engine
            .create(
                ScopeRef::Vault(vault),
                false,
                vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)],
                alice.user.id,
            )
            .await
            .unwrap();
        worker.proofs().insert(process.id, alice.proof());

        // A run that died long ago.
        assert!(fx
            .store
            .transition_share_process(
                process.id,
                ShareStatus::Pending,
                ShareStatus::Running,
                None,
                1,
            )
            .await
            .unwrap());

        assert_eq!(worker.recover_stalled().await.unwrap(), 1);
        worker.run_until_idle().await.unwrap();

        let stored = fx.store.get_share_process(process.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ShareStatus::Completed);
        assert_eq!(stored.processed_items, 1);
        assert_eq!(fx.store.open_job_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resumed_process_skips_finished_items() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        let s1 = fx.secret(&alice, vault, None, b"one").await;
        let s2 = fx.secret(&alice, vault, None, b"two").await;

        let worker = worker(&fx, Arc::new(MemoryQueue::new()), WorkerConfig::default());
        let process = worker
            .engine
            .create(
                ScopeRef::Vault(vault),
                false,
                vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)],
                alice.user.id,
            )
            .await
            .unwrap();
        worker.proofs().insert(process.id, alice.proof());

        // An earlier run materialized both items, finished one, then died.
        fx.store
            .transition_share_process(
                process.id,
                ShareStatus::Pending,
                ShareStatus::Running,
                None,
                1,
            )
            .await
            .unwrap();
        let targets = [ItemTarget::Secret(s1), ItemTarget::Secret(s2)];
        fx.store.insert_share_items(process.id, &targets, 1).await.unwrap();
        let items = fx.store.share_items(process.id).await.unwrap();
        let finished = items[0].clone();
        let batch = BatchCommit {
            outcomes: vec![ItemOutcome {
                item_id: finished.id,
                status: ItemStatus::Done,
                message: None,
            }],
            ..BatchCommit::default()
        };
        fx.store.commit_batch(process.id, &batch, 1).await.unwrap();

        assert_eq!(worker.recover_stalled().await.unwrap(), 1);
        let report = worker.engine.run(process.id, &alice.proof()).await.unwrap();
        assert_eq!(report.status, ShareStatus::Completed);
        assert_eq!(report.progress.done, 1);

        let stored = fx.store.get_share_process(process.id).await.unwrap().unwrap();
        assert_eq!(stored.total_items, 2);
        assert_eq!(stored.processed_items, 2);
        assert_eq!(stored.failed_items, 0);

        // Only the unfinished item was re-keyed.
        let ItemTarget::Secret(skipped) = finished.target else {
            panic!("expected a secret item");
        };
        let resumed = if skipped == s1 { s2 } else { s1 };
        let grants = fx.store.secret_grants(&[skipped, resumed]).await.unwrap();
        assert!(!grants.iter().any(|g| g.secret_id == skipped && g.group_id == bob.group));
        assert!(grants.iter().any(|g| g.secret_id == resumed && g.group_id == bob.group));
    }

    #[tokio::test]
    async fn test_executing_process_is_not_requeued() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let vault = fx.vault(&alice).await;

        let worker = worker(&fx, Arc::new(MemoryQueue::new()), WorkerConfig::default());
        let process = worker
            .engine
            .create(
                ScopeRef::Vault(vault),
                false,
                vec![GrantRequest::write(alice.group)],
                alice.user.id,
            )
            .await
            .unwrap();

        // A live run whose current batch is older than the stall threshold.
        let guard = worker.engine.track(process.id).unwrap();
        fx.store
            .transition_share_process(
                process.id,
                ShareStatus::Pending,
                ShareStatus::Running,
                None,
                1,
            )
            .await
            .unwrap();
        assert_eq!(worker.engine.running(), vec![process.id]);

        assert_eq!(worker.recover_stalled().await.unwrap(), 0);
        let stored = fx.store.get_share_process(process.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ShareStatus::Running);
        assert!(worker.queue().pop().await.unwrap().is_none());

        // Once the run is gone the row really is stalled.
        drop(guard);
        assert_eq!(worker.recover_stalled().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        fx.secret(&alice, vault, None, b"x").await;

        let config = WorkerConfig {
            concurrency: 2,
            poll_interval_ms: 5,
        };
        let worker = worker(&fx, Arc::new(MemoryQueue::new()), config);
        let process = worker
            .engine
            .create(
                ScopeRef::Vault(vault),
                false,
                vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)],
                alice.user.id,
            )
            .await
            .unwrap();
        worker.proofs().insert(process.id, alice.proof());
        worker.queue().push(Job::ShareProcess(process.id)).await.unwrap();

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(worker.clone().run(async {
            let _ = stopped.await;
        }));

        let store = fx.store.clone();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let p = store.get_share_process(process.id).await.unwrap().unwrap();
                if p.status == ShareStatus::Completed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_proof_cache() {
        let cache = ProofCache::new();
        let id = ShareProcessId::new();
        assert!(cache.get(id).is_none());

        let other = cache.clone();
        let proof = vaultkeeper_perms::derive_unlock_proof(
            b"pw",
            &vaultkeeper_core::LockedKey {
                salt: [1; 16],
                nonce: [0; 12],
                ciphertext: Vec::new(),
            },
            &vaultkeeper_perms::KdfParams::fast_insecure(),
        )
        .unwrap();
        cache.insert(id, proof);
        assert!(other.get(id).is_some());
        other.remove(id);
        assert!(cache.is_empty());
    }
}
