//! Test fixtures and helpers.
//!
//! Common setup code for integration tests. Fixtures panic on failure.

use std::ops::Deref;

use vaultkeeper::{Keeper, KeeperConfig};
use vaultkeeper_core::{FolderId, GroupId, NodeRef, SecretId, User, UserId, VaultId};
use vaultkeeper_store::{SqliteStore, Store, StoreExt};

use crate::invariants::{violations, Violation};

/// A registered user and the passphrase that unlocks them.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user: User,
    pub passphrase: String,
    pub private_group: GroupId,
}

impl TestUser {
    pub fn id(&self) -> UserId {
        self.user.id
    }
}

/// A vault with a flat layer of folders, each holding some secrets.
#[derive(Debug, Clone)]
pub struct PopulatedVault {
    pub vault_id: VaultId,
    pub folders: Vec<FolderId>,
    pub secrets: Vec<SecretId>,
}

impl PopulatedVault {
    /// Folders and secrets below the vault.
    pub fn item_count(&self) -> usize {
        self.folders.len() + self.secrets.len()
    }
}

/// A Keeper on an in-memory database with cheap key derivation.
pub struct TestKeeper {
    pub keeper: Keeper<SqliteStore>,
}

impl TestKeeper {
    pub fn new() -> Self {
        Self::with_config(KeeperConfig::insecure_for_tests())
    }

    pub fn with_config(config: KeeperConfig) -> Self {
        Self {
            keeper: Keeper::open_memory(config).expect("open in-memory keeper"),
        }
    }

    /// Register a user whose passphrase is `"{name} passphrase"`.
    pub async fn user(&self, name: &str) -> TestUser {
        let passphrase = format!("{name} passphrase");
        let user = self
            .keeper
            .register_user(name, &passphrase)
            .await
            .expect("register user");
        let private_group = self
            .keeper
            .store()
            .private_group_for_user(user.id)
            .await
            .expect("private group lookup")
            .expect("private group exists");
        TestUser {
            user,
            passphrase,
            private_group,
        }
    }

    /// Create a vault owned by `owner` with `folders` top-level folders and
    /// `secrets_per_folder` secrets in each.
    pub async fn populated_vault(
        &self,
        owner: &TestUser,
        folders: usize,
        secrets_per_folder: usize,
    ) -> PopulatedVault {
        let vault = self
            .keeper
            .create_vault(owner.id(), "populated", false)
            .await
            .expect("create vault");
        let mut out = PopulatedVault {
            vault_id: vault.id,
            folders: Vec::with_capacity(folders),
            secrets: Vec::with_capacity(folders * secrets_per_folder),
        };
        for f in 0..folders {
            let folder = self
                .keeper
                .create_folder(owner.id(), vault.id, None, &format!("folder-{f}"))
                .await
                .expect("create folder");
            for s in 0..secrets_per_folder {
                let body = format!("secret {f}/{s}");
                let secret = self
                    .keeper
                    .create_secret(owner.id(), vault.id, Some(folder.id), &body, &[body.as_bytes()])
                    .await
                    .expect("create secret");
                out.secrets.push(secret.id);
            }
            out.folders.push(folder.id);
        }
        out
    }

    /// Drain the job queue.
    pub async fn settle(&self) -> usize {
        self.keeper
            .worker()
            .run_until_idle()
            .await
            .expect("worker run")
    }

    /// Decrypt a single-block secret as UTF-8.
    pub async fn read_text(&self, user: &TestUser, secret_id: SecretId) -> String {
        let blocks = self
            .keeper
            .read_secret(user.id(), &user.passphrase, secret_id)
            .await
            .expect("read secret");
        String::from_utf8_lossy(blocks[0].as_bytes()).into_owned()
    }

    /// The stored grant of `group_id` on `node`.
    pub async fn grant(
        &self,
        vault_id: VaultId,
        node: NodeRef,
        group_id: GroupId,
    ) -> Option<vaultkeeper_core::Access> {
        self.keeper
            .store()
            .require_graph(vault_id)
            .await
            .expect("load graph")
            .grant(node, group_id)
    }

    /// Tree invariant violations in a stored vault.
    pub async fn violations(&self, vault_id: VaultId) -> Vec<Violation> {
        let graph = self
            .keeper
            .store()
            .require_graph(vault_id)
            .await
            .expect("load graph");
        violations(&graph)
    }
}

impl Default for TestKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestKeeper {
    type Target = Keeper<SqliteStore>;

    fn deref(&self) -> &Self::Target {
        &self.keeper
    }
}

/// A keeper with `n` registered users named `user-0..n`.
pub async fn multi_user_fixture(n: usize) -> (TestKeeper, Vec<TestUser>) {
    let keeper = TestKeeper::new();
    let mut users = Vec::with_capacity(n);
    for i in 0..n {
        users.push(keeper.user(&format!("user-{i}")).await);
    }
    (keeper, users)
}
