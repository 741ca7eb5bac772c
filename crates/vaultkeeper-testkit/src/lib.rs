//! # Vaultkeeper Testkit
//!
//! Testing utilities for Vaultkeeper.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Invariants**: A checker for the tree invariants of a vault snapshot
//! - **Generators**: Proptest strategies producing valid vault trees and requests
//! - **Fixtures**: An in-memory Keeper with helpers for users and populated vaults
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use vaultkeeper_perms::plan_cleanup;
//! use vaultkeeper_testkit::{generators::tree, violations};
//!
//! proptest! {
//!     #[test]
//!     fn cleanup_keeps_tree_valid(mut tree in tree()) {
//!         plan_cleanup(&tree.graph, None).apply(&mut tree.graph);
//!         prop_assert!(violations(&tree.graph).is_empty());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use vaultkeeper_testkit::TestKeeper;
//!
//! let keeper = TestKeeper::new();
//! let alice = keeper.user("alice").await;
//! let vault = keeper.populated_vault(&alice, 4, 10).await;
//! assert!(keeper.violations(vault.vault_id).await.is_empty());
//! ```

pub mod fixtures;
pub mod generators;
pub mod invariants;

pub use fixtures::{multi_user_fixture, PopulatedVault, TestKeeper, TestUser};
pub use generators::{tree_from_params, GeneratedTree, GraphParams};
pub use invariants::{violations, Violation};
