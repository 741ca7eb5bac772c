//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for Vaultkeeper. It uses rusqlite
//! with bundled SQLite, wrapped in async via `tokio::task::spawn_blocking`.
//! Every multi-row write runs in a single transaction.

mod codec;
mod jobs;
mod share;
mod tree;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use vaultkeeper_core::{
    AuditEntry, Folder, FolderId, Group, GroupId, GroupMembership, ItemKind, ItemTarget, Job,
    NodeRef, Secret, SecretGrant, SecretId, ShareItem, ShareProcess, ShareProcessId, ShareStatus,
    User, UserId, Vault, VaultId,
};
use vaultkeeper_perms::{AccessGraph, GrantDiff, GrantRow};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{BatchCommit, ClaimedJob, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Internal(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("spawn_blocking failed: {e}")))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_user(
        &self,
        user: &User,
        private_group: &Group,
        membership: &GroupMembership,
    ) -> Result<()> {
        let (user, group, membership) = (user.clone(), private_group.clone(), membership.clone());
        self.blocking(move |conn| tree::insert_user(conn, &user, &group, &membership))
            .await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.blocking(move |conn| tree::get_user(conn, id)).await
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.blocking(move |conn| tree::get_group(conn, id)).await
    }

    async fn insert_group(&self, group: &Group, memberships: &[GroupMembership]) -> Result<()> {
        let (group, memberships) = (group.clone(), memberships.to_vec());
        self.blocking(move |conn| tree::insert_group(conn, &group, &memberships))
            .await
    }

    async fn soft_delete_group(&self, id: GroupId, at: i64) -> Result<bool> {
        self.blocking(move |conn| tree::soft_delete_group(conn, id, at))
            .await
    }

    async fn group_names(&self, ids: &[GroupId]) -> Result<HashMap<GroupId, String>> {
        let ids = ids.to_vec();
        self.blocking(move |conn| tree::group_names(conn, &ids)).await
    }

    async fn upsert_membership(&self, membership: &GroupMembership) -> Result<()> {
        let membership = membership.clone();
        self.blocking(move |conn| tree::upsert_membership(conn, &membership))
            .await
    }

    async fn get_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<Option<GroupMembership>> {
        self.blocking(move |conn| tree::get_membership(conn, group_id, user_id))
            .await
    }

    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<GroupMembership>> {
        self.blocking(move |conn| tree::memberships_for_user(conn, user_id))
            .await
    }

    async fn private_group_for_user(&self, user_id: UserId) -> Result<Option<GroupId>> {
        self.blocking(move |conn| tree::private_group_for_user(conn, user_id))
            .await
    }

    async fn insert_vault(&self, vault: &Vault, grants: &[GrantRow]) -> Result<()> {
        let (vault, grants) = (vault.clone(), grants.to_vec());
        self.blocking(move |conn| tree::insert_vault(conn, &vault, &grants))
            .await
    }

    async fn get_vault(&self, id: VaultId) -> Result<Option<Vault>> {
        self.blocking(move |conn| tree::get_vault(conn, id)).await
    }

    async fn set_mandatory_fields(&self, id: VaultId, fields: &[String]) -> Result<bool> {
        let fields = fields.to_vec();
        self.blocking(move |conn| tree::set_mandatory_fields(conn, id, &fields))
            .await
    }

    async fn list_vault_ids(&self) -> Result<Vec<VaultId>> {
        self.blocking(|conn| tree::list_vault_ids(conn)).await
    }

    async fn insert_folder(
        &self,
        folder: &Folder,
        grants: &[GrantRow],
        ancestor_rows: &[GrantRow],
    ) -> Result<()> {
        let (folder, grants, ancestors) = (folder.clone(), grants.to_vec(), ancestor_rows.to_vec());
        self.blocking(move |conn| tree::insert_folder(conn, &folder, &grants, &ancestors))
            .await
    }

    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>> {
        self.blocking(move |conn| tree::get_folder(conn, id)).await
    }

    async fn soft_delete_folder(&self, id: FolderId, at: i64) -> Result<u64> {
        self.blocking(move |conn| tree::soft_delete_folder(conn, id, at))
            .await
    }

    async fn insert_secret(
        &self,
        secret: &Secret,
        grants: &[SecretGrant],
        ancestor_rows: &[GrantRow],
    ) -> Result<()> {
        let (secret, grants, ancestors) = (secret.clone(), grants.to_vec(), ancestor_rows.to_vec());
        self.blocking(move |conn| tree::insert_secret(conn, &secret, &grants, &ancestors))
            .await
    }

    async fn get_secret(&self, id: SecretId) -> Result<Option<Secret>> {
        self.blocking(move |conn| tree::get_secret(conn, id)).await
    }

    async fn soft_delete_secret(&self, id: SecretId, at: i64) -> Result<bool> {
        self.blocking(move |conn| tree::soft_delete_secret(conn, id, at))
            .await
    }

    async fn secret_grants(&self, ids: &[SecretId]) -> Result<Vec<SecretGrant>> {
        let ids = ids.to_vec();
        self.blocking(move |conn| tree::secret_grants(conn, &ids)).await
    }

    async fn load_graph(&self, vault_id: VaultId) -> Result<Option<AccessGraph>> {
        self.blocking(move |conn| tree::load_graph(conn, vault_id))
            .await
    }

    async fn apply_grant_diff(&self, diff: &GrantDiff, audit: Option<&AuditEntry>) -> Result<()> {
        let (diff, audit) = (diff.clone(), audit.cloned());
        self.blocking(move |conn| tree::apply_grant_diff(conn, &diff, audit.as_ref()))
            .await
    }

    async fn reap_vault(
        &self,
        vault_id: VaultId,
        groups: Option<&BTreeSet<GroupId>>,
    ) -> Result<Option<u64>> {
        let groups = groups.cloned();
        self.blocking(move |conn| tree::reap_vault(conn, vault_id, groups.as_ref()))
            .await
    }

    async fn insert_share_process(&self, process: &ShareProcess) -> Result<()> {
        let process = process.clone();
        self.blocking(move |conn| share::insert_share_process(conn, &process))
            .await
    }

    async fn get_share_process(&self, id: ShareProcessId) -> Result<Option<ShareProcess>> {
        self.blocking(move |conn| share::get_share_process(conn, id))
            .await
    }

    async fn share_processes_with_status(&self, status: ShareStatus) -> Result<Vec<ShareProcess>> {
        self.blocking(move |conn| share::share_processes_with_status(conn, status))
            .await
    }

    async fn transition_share_process(
        &self,
        id: ShareProcessId,
        from: ShareStatus,
        to: ShareStatus,
        message: Option<&str>,
        at: i64,
    ) -> Result<bool> {
        let message = message.map(str::to_owned);
        self.blocking(move |conn| {
            share::transition_share_process(conn, id, from, to, message.as_deref(), at)
        })
        .await
    }

    async fn insert_share_items(
        &self,
        id: ShareProcessId,
        targets: &[ItemTarget],
        at: i64,
    ) -> Result<u64> {
        let targets = targets.to_vec();
        self.blocking(move |conn| share::insert_share_items(conn, id, &targets, at))
            .await
    }

    async fn pending_share_items(
        &self,
        id: ShareProcessId,
        kind: ItemKind,
        limit: usize,
    ) -> Result<Vec<ShareItem>> {
        self.blocking(move |conn| share::pending_share_items(conn, id, kind, limit))
            .await
    }

    async fn share_items(&self, id: ShareProcessId) -> Result<Vec<ShareItem>> {
        self.blocking(move |conn| share::share_items(conn, id)).await
    }

    async fn commit_batch(&self, id: ShareProcessId, batch: &BatchCommit, at: i64) -> Result<()> {
        let batch = batch.clone();
        self.blocking(move |conn| share::commit_batch(conn, id, &batch, at))
            .await
    }

    async fn apply_grant_batch(&self, batch: &BatchCommit) -> Result<()> {
        let batch = batch.clone();
        self.blocking(move |conn| share::apply_grant_batch(conn, &batch))
            .await
    }

    async fn requeue_stalled(
        &self,
        older_than: i64,
        at: i64,
        live: &[ShareProcessId],
    ) -> Result<Vec<ShareProcessId>> {
        let live = live.to_vec();
        self.blocking(move |conn| share::requeue_stalled(conn, older_than, at, &live))
            .await
    }

    async fn enqueue_job(&self, job: &Job, at: i64) -> Result<i64> {
        let job = job.clone();
        self.blocking(move |conn| jobs::enqueue_job(conn, &job, at)).await
    }

    async fn claim_job(&self, at: i64) -> Result<Option<ClaimedJob>> {
        self.blocking(move |conn| jobs::claim_job(conn, at)).await
    }

    async fn complete_job(&self, id: i64, at: i64) -> Result<()> {
        self.blocking(move |conn| jobs::complete_job(conn, id, at)).await
    }

    async fn requeue_claimed_jobs(&self, older_than: i64) -> Result<u64> {
        self.blocking(move |conn| jobs::requeue_claimed_jobs(conn, older_than))
            .await
    }

    async fn open_job_count(&self) -> Result<u64> {
        self.blocking(|conn| jobs::open_job_count(conn)).await
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<()> {
        let entry = entry.clone();
        self.blocking(move |conn| jobs::insert_audit(conn, &entry)).await
    }

    async fn audit_entries_for(&self, target: NodeRef) -> Result<Vec<AuditEntry>> {
        self.blocking(move |conn| jobs::audit_entries_for(conn, target))
            .await
    }
}
