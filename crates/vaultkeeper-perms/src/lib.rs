//! # Vaultkeeper Permissions
//!
//! Envelope key management and permission computation.
//!
//! ## Key hierarchy
//!
//! ```text
//! passphrase ──Argon2id──► unlock proof ──► user private key
//!                                              │ (membership row)
//!                                              ▼
//!                                        group private key
//!                                              │ (secret grant row)
//!                                              ▼
//!                                         content key ──► payload blocks
//! ```
//!
//! Every arrow is an X25519 + ChaCha20-Poly1305 envelope produced by
//! [`KeyVault`], except the first, which is [`lock_private_key`]. Every
//! unwrapped key lives in a type that erases itself on drop.
//!
//! ## Permissions
//!
//! - [`AccessGraph`] - Snapshot of one vault's tree and grants, with the
//!   `has_read` / `has_write` / `has_full_write` predicates
//! - [`PermissionPropagator`] - Computes the [`GrantDiff`] of a permission
//!   change on a vault or folder
//! - [`plan_cleanup`] - Finds the demoted grants nothing still justifies
//!
//! This crate performs no I/O.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod grant;
pub mod graph;
pub mod keyring;
pub mod passphrase;
pub mod propagate;
pub mod reap;
pub mod secret;
pub mod wrap;

pub use crypto::{
    ContentKey, EncryptionKey, EncryptionNonce, EphemeralKeyPair, SharedKey, X25519PublicKey,
    X25519StaticSecret,
};
pub use envelope::{open_block, open_payload, seal_block, seal_payload};
pub use error::{PermsError, Result};
pub use grant::GrantSet;
pub use graph::{AccessGraph, Grants};
pub use keyring::KeyRing;
pub use passphrase::{
    derive_unlock_proof, lock_private_key, unlock_private_key, KdfParams, UnlockProof,
};
pub use propagate::{
    missing_ancestor_rows, plan_node_grants, GrantDiff, GrantRow, GrantUpdate, NodePlan,
    PermissionPropagator,
};
pub use reap::{plan_cleanup, ReapPlan};
pub use secret::{secure_erase, with_secret, SecretBytes};
pub use wrap::KeyVault;
