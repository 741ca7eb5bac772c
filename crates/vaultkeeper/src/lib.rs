//! # Vaultkeeper
//!
//! Shared secret vaults with envelope encryption. A secret's payload is
//! sealed with its own content key; the content key is wrapped separately
//! for every group allowed to read it, and each group's private key is
//! wrapped for each of its members.
//!
//! ## Key Concepts
//!
//! - **Vault tree**: vaults contain folders (a tree) and secrets.
//! - **Grants**: groups hold grants on vaults, folders and secrets. A secret
//!   grant carries the wrapped content key.
//! - **Partial grant**: a demoted, read-only row on a vault or folder that
//!   only keeps a path open to something below it.
//! - **Share process**: a background run that re-keys every item under a
//!   scope after a permission change.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vaultkeeper::{GrantRequest, Keeper, KeeperConfig, ScopeRef, Store};
//!
//! async fn example() {
//!     let keeper = Keeper::open("vaultkeeper.db", KeeperConfig::default()).unwrap();
//!
//!     let alice = keeper.register_user("alice", "correct horse").await.unwrap();
//!     let bob = keeper.register_user("bob", "battery staple").await.unwrap();
//!     let team = keeper.create_group(alice.id, "team", &[bob.id]).await.unwrap();
//!
//!     let vault = keeper.create_vault(alice.id, "infra", false).await.unwrap();
//!     keeper
//!         .create_secret(alice.id, vault.id, None, "db password", &[b"hunter2"])
//!         .await
//!         .unwrap();
//!
//!     // Re-key the vault for the team in the background.
//!     let private = keeper.store().private_group_for_user(alice.id).await.unwrap().unwrap();
//!     keeper
//!         .update_permissions(
//!             alice.id,
//!             "correct horse",
//!             ScopeRef::Vault(vault.id),
//!             vec![GrantRequest::write(private), GrantRequest::read(team.id)],
//!             true,
//!         )
//!         .await
//!         .unwrap();
//!     keeper.worker().run_until_idle().await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `vaultkeeper::core` - Data model, ids and request validation
//! - `vaultkeeper::perms` - Key handling, access graph and propagation
//! - `vaultkeeper::store` - Storage abstraction and SQLite
//! - `vaultkeeper::share` - Share process engine, reaper and worker

pub mod config;
pub mod error;
pub mod keeper;

// Re-export component crates
pub use vaultkeeper_core as core;
pub use vaultkeeper_perms as perms;
pub use vaultkeeper_share as share;
pub use vaultkeeper_store as store;

// Re-export main types for convenience
pub use config::KeeperConfig;
pub use error::{ErrorKind, KeeperError, Result};
pub use keeper::{Keeper, PermissionChange, SecretShare};

// Re-export commonly used core types
pub use vaultkeeper_core::{
    Access, AuditEntry, FolderId, GrantRequest, GroupId, NodeRef, Principal, ScopeRef, SecretId,
    ShareProcess, ShareProcessId, ShareStatus, UserId, VaultId,
};
pub use vaultkeeper_store::Store;
