//! Store trait: the abstract interface for Vaultkeeper persistence.
//!
//! Every query filters tombstoned rows: deleted vaults, folders, secrets and
//! groups are invisible to the trait, except where a method says otherwise.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use vaultkeeper_core::{
    AuditEntry, Folder, FolderId, Group, GroupId, GroupMembership, ItemKind, ItemStatus,
    ItemTarget, Job, NodeRef, ScopeRef, Secret, SecretGrant, SecretId, ShareItem, ShareItemId,
    ShareProcess, ShareProcessId, ShareStatus, User, UserId, Vault, VaultId,
};
use vaultkeeper_perms::{AccessGraph, GrantDiff, GrantRow};

use crate::error::{Result, StoreError};

/// Outcome of one share item within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub item_id: ShareItemId,
    pub status: ItemStatus,
    pub message: Option<String>,
}

/// Everything one engine batch writes, committed in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct BatchCommit {
    /// Secret grants to insert or replace, carrying freshly wrapped keys.
    pub secret_grant_puts: Vec<SecretGrant>,
    /// `(secret, group, can_write)` updates of retained secret grants.
    pub secret_grant_updates: Vec<(SecretId, GroupId, bool)>,
    /// Secret grants to hard-delete.
    pub secret_grant_deletes: Vec<(SecretId, GroupId)>,
    /// Vault/folder grant rows to upsert.
    pub grant_upserts: Vec<GrantRow>,
    /// Vault/folder grant rows to insert only where the group has no row.
    pub grant_ensures: Vec<GrantRow>,
    pub outcomes: Vec<ItemOutcome>,
    pub audit: Vec<AuditEntry>,
}

impl BatchCommit {
    /// `(done, failed)` counts among the outcomes.
    pub fn counts(&self) -> (u64, u64) {
        self.outcomes.iter().fold((0, 0), |(done, failed), o| match o.status {
            ItemStatus::Done => (done + 1, failed),
            ItemStatus::Failed => (done, failed + 1),
            ItemStatus::Pending => (done, failed),
        })
    }
}

/// A job claimed from the durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: i64,
    pub job: Job,
    pub claimed_at: i64,
}

/// The Store trait: async interface for Vaultkeeper persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the
/// runtime.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Users and groups
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a user together with their private group and its membership.
    async fn insert_user(
        &self,
        user: &User,
        private_group: &Group,
        membership: &GroupMembership,
    ) -> Result<()>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    /// Get a group, including a soft-deleted one.
    async fn get_group(&self, id: GroupId) -> Result<Option<Group>>;

    /// Insert a group with its initial memberships.
    async fn insert_group(&self, group: &Group, memberships: &[GroupMembership]) -> Result<()>;

    /// Tombstone a group. Returns `false` if it was missing or already deleted.
    async fn soft_delete_group(&self, id: GroupId, at: i64) -> Result<bool>;

    /// Names of live groups, for audit diffs.
    async fn group_names(&self, ids: &[GroupId]) -> Result<HashMap<GroupId, String>>;

    async fn upsert_membership(&self, membership: &GroupMembership) -> Result<()>;

    async fn get_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<Option<GroupMembership>>;

    /// Memberships of a user in live groups.
    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<GroupMembership>>;

    /// The private group representing a user.
    async fn private_group_for_user(&self, user_id: UserId) -> Result<Option<GroupId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Vault tree
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a vault and its initial grants.
    async fn insert_vault(&self, vault: &Vault, grants: &[GrantRow]) -> Result<()>;

    async fn get_vault(&self, id: VaultId) -> Result<Option<Vault>>;

    /// Replace a live vault's mandatory fields. Returns whether it exists.
    async fn set_mandatory_fields(&self, id: VaultId, fields: &[String]) -> Result<bool>;

    async fn list_vault_ids(&self) -> Result<Vec<VaultId>>;

    /// Insert a folder with its grants; `ancestor_rows` are inserted only
    /// where the group has no row yet.
    async fn insert_folder(
        &self,
        folder: &Folder,
        grants: &[GrantRow],
        ancestor_rows: &[GrantRow],
    ) -> Result<()>;

    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>>;

    /// Tombstone a folder, its whole subtree and every secret inside.
    /// Returns the number of folders tombstoned.
    async fn soft_delete_folder(&self, id: FolderId, at: i64) -> Result<u64>;

    /// Insert a secret with its wrapped keys; `ancestor_rows` as for folders.
    async fn insert_secret(
        &self,
        secret: &Secret,
        grants: &[SecretGrant],
        ancestor_rows: &[GrantRow],
    ) -> Result<()>;

    async fn get_secret(&self, id: SecretId) -> Result<Option<Secret>>;

    async fn soft_delete_secret(&self, id: SecretId, at: i64) -> Result<bool>;

    /// Grants on the given live secrets, for live groups.
    async fn secret_grants(&self, ids: &[SecretId]) -> Result<Vec<SecretGrant>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the live tree and grants of a vault.
    async fn load_graph(&self, vault_id: VaultId) -> Result<Option<AccessGraph>>;

    /// Apply a propagator diff and its audit entry in one transaction.
    async fn apply_grant_diff(&self, diff: &GrantDiff, audit: Option<&AuditEntry>) -> Result<()>;

    /// Plan and delete the vault's demoted rows that no longer lead to any
    /// grant below them, atomically. `groups` limits the candidates.
    ///
    /// Returns the number of rows deleted, or `None` for an unknown vault.
    async fn reap_vault(
        &self,
        vault_id: VaultId,
        groups: Option<&BTreeSet<GroupId>>,
    ) -> Result<Option<u64>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Share processes
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_share_process(&self, process: &ShareProcess) -> Result<()>;

    async fn get_share_process(&self, id: ShareProcessId) -> Result<Option<ShareProcess>>;

    /// Processes currently in `status`, oldest first.
    async fn share_processes_with_status(&self, status: ShareStatus) -> Result<Vec<ShareProcess>>;

    /// Move a process from `from` to `to` if it is still in `from`.
    ///
    /// Sets `started_at` on entering `Running` and `finished_at` on entering
    /// a terminal state. Returns whether the transition happened.
    async fn transition_share_process(
        &self,
        id: ShareProcessId,
        from: ShareStatus,
        to: ShareStatus,
        message: Option<&str>,
        at: i64,
    ) -> Result<bool>;

    /// Materialize items (`Pending`), ignoring ones that already exist, and
    /// set the process total to the item count. Returns the total.
    async fn insert_share_items(
        &self,
        id: ShareProcessId,
        targets: &[ItemTarget],
        at: i64,
    ) -> Result<u64>;

    /// Up to `limit` pending items of one kind, in target order.
    async fn pending_share_items(
        &self,
        id: ShareProcessId,
        kind: ItemKind,
        limit: usize,
    ) -> Result<Vec<ShareItem>>;

    async fn share_items(&self, id: ShareProcessId) -> Result<Vec<ShareItem>>;

    /// Commit one batch: grant writes, item outcomes, counters and audit.
    async fn commit_batch(&self, id: ShareProcessId, batch: &BatchCommit, at: i64) -> Result<()>;

    /// Write the grant rows and audit entries of a batch in one transaction,
    /// outside any share process. Outcomes are ignored.
    async fn apply_grant_batch(&self, batch: &BatchCommit) -> Result<()>;

    /// Move `Running` processes not updated since `older_than` back to
    /// `Pending`, except the `live` ones still executing. Returns their ids.
    async fn requeue_stalled(
        &self,
        older_than: i64,
        at: i64,
        live: &[ShareProcessId],
    ) -> Result<Vec<ShareProcessId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Jobs
    // ─────────────────────────────────────────────────────────────────────────

    async fn enqueue_job(&self, job: &Job, at: i64) -> Result<i64>;

    /// Claim the oldest queued job.
    async fn claim_job(&self, at: i64) -> Result<Option<ClaimedJob>>;

    async fn complete_job(&self, id: i64, at: i64) -> Result<()>;

    /// Return jobs claimed before `older_than` to the queue.
    async fn requeue_claimed_jobs(&self, older_than: i64) -> Result<u64>;

    /// Number of jobs not yet completed.
    async fn open_job_count(&self) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Audit
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Audit entries for a node, oldest first.
    async fn audit_entries_for(&self, target: NodeRef) -> Result<Vec<AuditEntry>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Get a user or fail with `NotFound`.
    fn require_user(&self, id: UserId) -> impl std::future::Future<Output = Result<User>> + Send;

    /// The live groups a user belongs to.
    fn group_ids_for_user(
        &self,
        id: UserId,
    ) -> impl std::future::Future<Output = Result<BTreeSet<GroupId>>> + Send;

    /// The vault containing a live scope.
    fn vault_of(
        &self,
        scope: ScopeRef,
    ) -> impl std::future::Future<Output = Result<VaultId>> + Send;

    /// Load a vault graph or fail with `NotFound`.
    fn require_graph(
        &self,
        vault_id: VaultId,
    ) -> impl std::future::Future<Output = Result<AccessGraph>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn require_user(&self, id: UserId) -> Result<User> {
        self.get_user(id)
            .await?
            .ok_or_else(|| StoreError::not_found("user", id))
    }

    async fn group_ids_for_user(&self, id: UserId) -> Result<BTreeSet<GroupId>> {
        Ok(self
            .memberships_for_user(id)
            .await?
            .into_iter()
            .map(|m| m.group_id)
            .collect())
    }

    async fn vault_of(&self, scope: ScopeRef) -> Result<VaultId> {
        match scope {
            ScopeRef::Vault(id) => self
                .get_vault(id)
                .await?
                .map(|v| v.id)
                .ok_or_else(|| StoreError::not_found("vault", id)),
            ScopeRef::Folder(id) => self
                .get_folder(id)
                .await?
                .map(|f| f.vault_id)
                .ok_or_else(|| StoreError::not_found("folder", id)),
        }
    }

    async fn require_graph(&self, vault_id: VaultId) -> Result<AccessGraph> {
        self.load_graph(vault_id)
            .await?
            .ok_or_else(|| StoreError::not_found("vault", vault_id))
    }
}
