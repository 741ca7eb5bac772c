//! # Vaultkeeper Share
//!
//! Asynchronous re-keying of vault subtrees. A share process gives every
//! item under a scope exactly the requested groups: secrets get freshly
//! wrapped content keys (or lose them), folders get their grant rows
//! updated with partial-access semantics.
//!
//! ## Key Types
//!
//! - [`ShareProcessEngine`] - Creates, cancels and runs share processes
//! - [`PartialAccessReaper`] - Deletes demoted grant rows that lead nowhere
//! - [`Worker`] - Drains a [`JobQueue`] with bounded concurrency
//! - [`StoreQueue`] / [`MemoryQueue`] - Durable and in-process job queues
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vaultkeeper_core::{GrantRequest, GroupId, Job, ScopeRef, UserId, VaultId};
//! use vaultkeeper_perms::UnlockProof;
//! use vaultkeeper_share::{
//!     EngineConfig, JobQueue, ProofCache, ShareProcessEngine, StoreQueue, Worker, WorkerConfig,
//! };
//! use vaultkeeper_store::SqliteStore;
//!
//! async fn example(vault: VaultId, team: GroupId, alice: UserId, proof: UnlockProof) {
//!     let store = Arc::new(SqliteStore::open("vaultkeeper.db").unwrap());
//!     let queue = Arc::new(StoreQueue::new(store.clone()));
//!     let config = EngineConfig::default();
//!     let engine = Arc::new(ShareProcessEngine::new(store.clone(), queue.clone(), config));
//!
//!     let process = engine
//!         .create(ScopeRef::Vault(vault), true, vec![GrantRequest::write(team)], alice)
//!         .await
//!         .unwrap();
//!
//!     let proofs = ProofCache::new();
//!     proofs.insert(process.id, proof);
//!     let worker = Worker::new(store, engine, queue, proofs, WorkerConfig::default());
//!     worker.queue().push(Job::ShareProcess(process.id)).await.unwrap();
//!     worker.run_until_idle().await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Resumable**: items are materialized before work starts; a restarted
//!   run only sees the items still pending
//! - **Item isolation**: a failing item is recorded on its row and never
//!   fails the batch or the process
//! - **Key hygiene**: the initiator's key ring is unlocked once per run and
//!   erased when the run ends; unlock proofs never touch the store

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod queue;
pub mod reaper;
pub mod worker;

#[cfg(test)]
mod testing;

pub use batch::{eligible_targets, plan_secret_grants, BatchProgress, SecretPlan};
pub use config::{EngineConfig, WorkerConfig};
pub use engine::{resolve_requests, RunReport, ShareProcessEngine};
pub use error::{Result, ShareError};
pub use queue::{JobQueue, MemoryQueue, QueuedJob, StoreQueue};
pub use reaper::{PartialAccessReaper, ReapReport};
pub use worker::{ProofCache, Worker};
