//! # Vaultkeeper Core
//!
//! Pure data model for Vaultkeeper: the vault/folder/secret tree, groups and
//! their grants, share processes and the jobs that drive them.
//!
//! This crate contains no I/O, no storage and no cryptography. Key material
//! only appears here in its wrapped (encrypted) form.
//!
//! ## Key Types
//!
//! - [`Vault`], [`Folder`], [`Secret`] - The containment tree
//! - [`Group`], [`GroupMembership`] - Principals and their wrapped group keys
//! - [`Access`] - A grant on a vault or folder (`can_write`, `partial`)
//! - [`SecretGrant`] - A grant on a secret, carrying the wrapped content key
//! - [`ShareProcess`], [`ShareItem`] - The durable bulk re-keying state machine
//! - [`Job`] - Work items for the asynchronous job facility
//!
//! ## Partial grants
//!
//! A partial grant marks inherited, read-only access that only exists so a
//! descendant secret stays reachable. `partial` always implies `!can_write`;
//! see [`Access::is_demoted`].

pub mod audit;
pub mod error;
pub mod ids;
pub mod job;
pub mod material;
pub mod model;
pub mod share;
pub mod time;
pub mod validation;

pub use audit::{AuditChange, AuditDiff, AuditEntry};
pub use error::{CoreError, ValidationError};
pub use ids::{FolderId, GroupId, SecretId, ShareItemId, ShareProcessId, UserId, VaultId};
pub use job::Job;
pub use material::{LockedKey, SealedBlock, WrappedKey, PUBLIC_KEY_LEN};
pub use model::{
    Access, Folder, Group, GroupMembership, NodeRef, ScopeRef, Secret, SecretGrant, User, Vault,
};
pub use share::{
    GrantRequest, ItemKind, ItemStatus, ItemTarget, Principal, ShareItem, ShareProcess,
    ShareStatus,
};
pub use time::now_millis;
pub use validation::{validate_access, validate_grant_requests, validate_mandatory_fields};
