//! # Vaultkeeper Store
//!
//! Storage abstraction for Vaultkeeper. Provides a trait-based interface for
//! persisting the vault tree, grants, share processes, the job queue and the
//! audit log, with a SQLite implementation.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`StoreExt`] - Convenience lookups built on [`Store`]
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`BatchCommit`] - Everything one share batch writes, atomically
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vaultkeeper_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("vaultkeeper.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let vaults = store.list_vault_ids().await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Soft deletes**: vaults, folders, secrets and groups are tombstoned;
//!   reads never see tombstoned rows
//! - **Batch atomicity**: grant writes, item outcomes and progress counters
//!   of a share batch commit together
//! - **Atomic reaping**: cleanup plans and deletes demoted rows inside one
//!   write transaction, so a grant committed alongside is never lost

pub mod error;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use traits::{BatchCommit, ClaimedJob, ItemOutcome, Store, StoreExt};
