//! The Keeper: the API-boundary operations of Vaultkeeper.
//!
//! Every mutating call checks authorization and tree invariants before it
//! writes anything. Permission changes apply their direct diff
//! synchronously and hand the subtree re-keying to a share process run by
//! the background worker.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use vaultkeeper_core::{
    now_millis, validate_grant_requests, validate_mandatory_fields, Access, AuditEntry, Folder,
    FolderId, GrantRequest, Group, GroupId, GroupMembership, Job, NodeRef, ScopeRef, Secret,
    SecretGrant, SecretId, ShareItem, ShareProcess, ShareProcessId, ShareStatus, User, UserId,
    Vault, VaultId,
};
use vaultkeeper_perms::{
    derive_unlock_proof, lock_private_key, missing_ancestor_rows, open_payload, seal_payload,
    AccessGraph, GrantDiff, GrantRow, KeyRing, KeyVault, PermissionPropagator, PermsError,
    SecretBytes, UnlockProof, X25519PublicKey,
};
use vaultkeeper_share::{
    plan_secret_grants, resolve_requests, JobQueue, PartialAccessReaper, ProofCache, ReapReport,
    SecretPlan, ShareError, ShareProcessEngine, StoreQueue, Worker,
};
use vaultkeeper_store::{BatchCommit, SqliteStore, Store, StoreError, StoreExt};

use crate::config::KeeperConfig;
use crate::error::Result;

/// Outcome of [`Keeper::update_permissions`].
#[derive(Debug, Clone)]
pub struct PermissionChange {
    /// The diff applied to the scope and its ancestors.
    pub diff: GrantDiff,
    /// The share process re-keying the subtree.
    pub process: ShareProcess,
}

/// Outcome of [`Keeper::share_secret`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretShare {
    pub secret_id: SecretId,
    /// Group changes on the secret's key grants.
    pub plan: SecretPlan,
    /// Demoted rows opened on the secret's ancestors.
    pub ancestor_rows: Vec<GrantRow>,
}

/// The main Keeper struct.
///
/// Provides a unified API for:
/// - Registering users and managing groups
/// - Creating, reading and deleting vaults, folders and secrets
/// - Changing permissions and following the resulting share processes
/// - Querying access and the audit log
pub struct Keeper<S: Store + 'static> {
    store: Arc<S>,
    engine: Arc<ShareProcessEngine<S>>,
    worker: Arc<Worker<S>>,
    reaper: PartialAccessReaper<S>,
    queue: Arc<dyn JobQueue>,
    proofs: ProofCache,
    config: KeeperConfig,
}

impl Keeper<SqliteStore> {
    /// Open a Keeper on a SQLite database file.
    pub fn open(path: impl AsRef<std::path::Path>, config: KeeperConfig) -> Result<Self> {
        Ok(Self::new(SqliteStore::open(path)?, config))
    }

    /// Open a Keeper on an in-memory database.
    pub fn open_memory(config: KeeperConfig) -> Result<Self> {
        Ok(Self::new(SqliteStore::open_memory()?, config))
    }
}

impl<S: Store + 'static> Keeper<S> {
    /// Create a Keeper with the durable job queue of `store`.
    pub fn new(store: S, config: KeeperConfig) -> Self {
        let store = Arc::new(store);
        let queue: Arc<dyn JobQueue> = Arc::new(StoreQueue::new(store.clone()));
        Self::with_queue(store, queue, config)
    }

    /// Create a Keeper with a custom job queue.
    pub fn with_queue(store: Arc<S>, queue: Arc<dyn JobQueue>, config: KeeperConfig) -> Self {
        let engine = Arc::new(ShareProcessEngine::new(
            store.clone(),
            queue.clone(),
            config.engine.clone(),
        ));
        let proofs = ProofCache::new();
        let worker = Arc::new(Worker::new(
            store.clone(),
            engine.clone(),
            queue.clone(),
            proofs.clone(),
            config.worker.clone(),
        ));
        Self {
            reaper: PartialAccessReaper::new(store.clone()),
            store,
            engine,
            worker,
            queue,
            proofs,
            config,
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The background worker. Run it with [`Worker::run`] or drain it with
    /// [`Worker::run_until_idle`].
    pub fn worker(&self) -> &Arc<Worker<S>> {
        &self.worker
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a user with their private group.
    pub async fn register_user(&self, name: &str, passphrase: &str) -> Result<User> {
        let now = now_millis();
        let (user_secret, user_public) = KeyVault::generate_key_pair();
        let (group_secret, group_public) = KeyVault::generate_key_pair();

        let user = User {
            id: UserId::new(),
            name: name.to_string(),
            public_key: user_public.0,
            locked_private_key: lock_private_key(
                &user_secret,
                passphrase.as_bytes(),
                &self.config.kdf,
            )?,
            created_at: now,
        };
        let group = Group {
            id: GroupId::new(),
            name: name.to_string(),
            public_key: group_public.0,
            private: true,
            created_at: now,
            deleted_at: None,
        };
        let membership = GroupMembership {
            group_id: group.id,
            user_id: user.id,
            wrapped_private_key: KeyVault::wrap_for_user(
                group_secret.to_bytes().as_slice(),
                &user_public,
            )?,
            manager: true,
        };
        self.store.insert_user(&user, &group, &membership).await?;

        tracing::info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Derive and verify a user's unlock proof.
    async fn unlock(&self, user_id: UserId, passphrase: &str) -> Result<(User, UnlockProof)> {
        let user = self.store.require_user(user_id).await?;
        let proof = derive_unlock_proof(
            passphrase.as_bytes(),
            &user.locked_private_key,
            &self.config.kdf,
        )?;
        // Fails on a wrong passphrase; the ring is erased right away.
        KeyRing::unlock(&user, &proof, Vec::new())?;
        Ok((user, proof))
    }

    /// Create a shared group. The creator becomes its manager.
    pub async fn create_group(
        &self,
        creator: UserId,
        name: &str,
        members: &[UserId],
    ) -> Result<Group> {
        let now = now_millis();
        let (group_secret, group_public) = KeyVault::generate_key_pair();
        let group = Group {
            id: GroupId::new(),
            name: name.to_string(),
            public_key: group_public.0,
            private: false,
            created_at: now,
            deleted_at: None,
        };

        let mut users = BTreeMap::from([(creator, true)]);
        for member in members {
            users.entry(*member).or_insert(false);
        }

        let group_key = group_secret.to_bytes();
        let mut memberships = Vec::with_capacity(users.len());
        for (user_id, manager) in users {
            let user = self.store.require_user(user_id).await?;
            memberships.push(GroupMembership {
                group_id: group.id,
                user_id,
                wrapped_private_key: KeyVault::wrap_for_user(
                    group_key.as_slice(),
                    &X25519PublicKey::from_bytes(user.public_key),
                )?,
                manager,
            });
        }
        self.store.insert_group(&group, &memberships).await?;

        tracing::info!(group_id = %group.id, members = memberships.len(), "group created");
        Ok(group)
    }

    /// Add a member to a group. The manager re-wraps the group key for them.
    pub async fn add_group_member(
        &self,
        manager: UserId,
        passphrase: &str,
        group_id: GroupId,
        user_id: UserId,
        as_manager: bool,
    ) -> Result<()> {
        let group = self.live_group(group_id).await?;
        if group.private {
            return Err(PermsError::InvariantViolation(format!(
                "private group {group_id} has exactly one member"
            ))
            .into());
        }
        let membership = self.require_manager(manager, group_id).await?;

        let (user, proof) = self.unlock(manager, passphrase).await?;
        let new_member = self.store.require_user(user_id).await?;

        let mut ring = KeyRing::unlock(&user, &proof, vec![membership])?;
        let wrapped_private_key = KeyVault::wrap_for_user(
            ring.group_key(group_id)?.to_bytes().as_slice(),
            &X25519PublicKey::from_bytes(new_member.public_key),
        )?;
        drop(ring);

        self.store
            .upsert_membership(&GroupMembership {
                group_id,
                user_id,
                wrapped_private_key,
                manager: as_manager,
            })
            .await?;
        tracing::info!(%group_id, %user_id, "group member added");
        Ok(())
    }

    /// Soft-delete a shared group. Its grants stop counting everywhere.
    pub async fn delete_group(&self, actor: UserId, group_id: GroupId) -> Result<bool> {
        let group = self.live_group(group_id).await?;
        if group.private {
            return Err(PermsError::InvariantViolation(format!(
                "private group {group_id} cannot be deleted"
            ))
            .into());
        }
        self.require_manager(actor, group_id).await?;

        let deleted = self.store.soft_delete_group(group_id, now_millis()).await?;
        if deleted {
            tracing::info!(%group_id, "group deleted");
            self.queue
                .push(Job::PartialAccessCleanup {
                    vault_id: None,
                    group_ids: vec![group_id],
                })
                .await?;
        }
        Ok(deleted)
    }

    async fn live_group(&self, group_id: GroupId) -> Result<Group> {
        Ok(self
            .store
            .get_group(group_id)
            .await?
            .filter(|g| !g.is_deleted())
            .ok_or_else(|| StoreError::not_found("group", group_id))?)
    }

    async fn require_manager(&self, user_id: UserId, group_id: GroupId) -> Result<GroupMembership> {
        match self.store.get_membership(group_id, user_id).await? {
            Some(m) if m.manager => Ok(m),
            _ => Err(PermsError::AuthorizationInsufficient(format!(
                "user {user_id} does not manage group {group_id}"
            ))
            .into()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tree Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a vault written by the creator's private group.
    ///
    /// A personal vault is owned by the creator and cannot be shared.
    pub async fn create_vault(&self, creator: UserId, name: &str, personal: bool) -> Result<Vault> {
        let private = self.private_group(creator).await?;
        let vault = Vault {
            id: VaultId::new(),
            name: name.to_string(),
            owner: personal.then_some(creator),
            mandatory_fields: Vec::new(),
            created_at: now_millis(),
            deleted_at: None,
        };
        let row = GrantRow {
            node: NodeRef::Vault(vault.id),
            group_id: private,
            access: Access::write(),
        };
        self.store.insert_vault(&vault, &[row]).await?;

        tracing::info!(vault_id = %vault.id, personal, "vault created");
        Ok(vault)
    }

    /// Set the fields every new secret in the vault must fill in.
    ///
    /// Needs explicit write on the vault. Existing secrets are not checked.
    pub async fn set_mandatory_fields(
        &self,
        actor: UserId,
        vault_id: VaultId,
        fields: Vec<String>,
    ) -> Result<Vault> {
        let node = NodeRef::Vault(vault_id);
        if !self.has_full_write(actor, node).await? {
            return Err(PermsError::AuthorizationInsufficient(format!(
                "user {actor} cannot write {node}"
            ))
            .into());
        }
        if !self.store.set_mandatory_fields(vault_id, &fields).await? {
            return Err(StoreError::not_found("vault", vault_id).into());
        }
        tracing::info!(%vault_id, fields = fields.len(), "mandatory fields set");
        Ok(self
            .store
            .get_vault(vault_id)
            .await?
            .ok_or_else(|| StoreError::not_found("vault", vault_id))?)
    }

    /// Create a folder under a vault or another folder.
    ///
    /// The folder inherits the parent's explicit grants and the creator's
    /// private group gets full write.
    pub async fn create_folder(
        &self,
        creator: UserId,
        vault_id: VaultId,
        parent: Option<FolderId>,
        name: &str,
    ) -> Result<Folder> {
        let (mut graph, parent_node) = self.writable_parent(creator, vault_id, parent).await?;
        let private = self.private_group(creator).await?;

        let folder = Folder {
            id: FolderId::new(),
            name: name.to_string(),
            vault_id,
            parent_id: parent,
            created_at: now_millis(),
            deleted_at: None,
        };
        let node = NodeRef::Folder(folder.id);

        let mut grants = explicit_grants(&graph, parent_node);
        grants.insert(private, Access::write());
        let rows: Vec<GrantRow> = grants
            .into_iter()
            .map(|(group_id, access)| GrantRow {
                node,
                group_id,
                access,
            })
            .collect();

        graph.add_folder(folder.id, parent);
        let ancestor_rows = missing_ancestor_rows(&graph, node, rows.iter().map(|r| r.group_id));
        self.store.insert_folder(&folder, &rows, &ancestor_rows).await?;

        tracing::debug!(folder_id = %folder.id, %vault_id, "folder created");
        Ok(folder)
    }

    /// Create a secret, sealing `blocks` with a fresh content key.
    ///
    /// The leading blocks must fill the vault's mandatory fields, in order.
    ///
    /// The key is wrapped for every group with explicit access to the
    /// parent, keeping its write flag, and for the creator's private group.
    pub async fn create_secret<B: AsRef<[u8]>>(
        &self,
        creator: UserId,
        vault_id: VaultId,
        folder_id: Option<FolderId>,
        title: &str,
        blocks: &[B],
    ) -> Result<Secret> {
        let (mut graph, parent_node) = self.writable_parent(creator, vault_id, folder_id).await?;
        let vault = self
            .store
            .get_vault(vault_id)
            .await?
            .ok_or_else(|| StoreError::not_found("vault", vault_id))?;
        validate_mandatory_fields(&vault.mandatory_fields, blocks)?;
        let private = self.private_group(creator).await?;

        let mut recipients: BTreeMap<GroupId, bool> = explicit_grants(&graph, parent_node)
            .into_iter()
            .map(|(g, a)| (g, a.can_write))
            .collect();
        recipients.insert(private, true);

        let now = now_millis();
        let id = SecretId::new();
        let content_key = KeyVault::generate_content_key();
        let mut grants = Vec::with_capacity(recipients.len());
        for (group_id, can_write) in &recipients {
            let group = self.store.get_group(*group_id).await?;
            let Some(group) = group.filter(|g| !g.is_deleted()) else {
                continue;
            };
            grants.push(SecretGrant {
                secret_id: id,
                group_id: *group_id,
                can_write: *can_write,
                wrapped_key: KeyVault::wrap_for_group(
                    content_key.as_bytes(),
                    &X25519PublicKey::from_bytes(group.public_key),
                )?,
            });
        }

        let secret = Secret {
            id,
            title: title.to_string(),
            vault_id,
            folder_id,
            blocks: seal_payload(&content_key, blocks)?,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        drop(content_key);

        graph.add_secret(id, folder_id);
        let ancestor_rows =
            missing_ancestor_rows(&graph, NodeRef::Secret(id), grants.iter().map(|g| g.group_id));
        self.store.insert_secret(&secret, &grants, &ancestor_rows).await?;

        tracing::debug!(secret_id = %id, %vault_id, recipients = grants.len(), "secret created");
        Ok(secret)
    }

    /// Decrypt a secret's payload blocks.
    pub async fn read_secret(
        &self,
        user_id: UserId,
        passphrase: &str,
        secret_id: SecretId,
    ) -> Result<Vec<SecretBytes>> {
        let secret = self
            .store
            .get_secret(secret_id)
            .await?
            .ok_or_else(|| StoreError::not_found("secret", secret_id))?;
        let grants = self.store.secret_grants(&[secret_id]).await?;

        let (user, proof) = self.unlock(user_id, passphrase).await?;
        let memberships = self.store.memberships_for_user(user_id).await?;
        let mut ring = KeyRing::unlock(&user, &proof, memberships)?;
        let content_key = ring.recover_content_key(&grants)?;
        Ok(open_payload(&content_key, &secret.blocks)?)
    }

    /// Soft-delete a folder with its subtree. Returns the folders deleted.
    pub async fn delete_folder(&self, actor: UserId, folder_id: FolderId) -> Result<u64> {
        let folder = self
            .store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| StoreError::not_found("folder", folder_id))?;
        self.require_write(actor, folder.vault_id, NodeRef::Folder(folder_id)).await?;

        let deleted = self.store.soft_delete_folder(folder_id, now_millis()).await?;
        tracing::info!(%folder_id, deleted, "folder deleted");
        Ok(deleted)
    }

    /// Soft-delete a secret.
    pub async fn delete_secret(&self, actor: UserId, secret_id: SecretId) -> Result<bool> {
        let secret = self
            .store
            .get_secret(secret_id)
            .await?
            .ok_or_else(|| StoreError::not_found("secret", secret_id))?;
        self.require_write(actor, secret.vault_id, NodeRef::Secret(secret_id)).await?;
        Ok(self.store.soft_delete_secret(secret_id, now_millis()).await?)
    }

    async fn private_group(&self, user_id: UserId) -> Result<GroupId> {
        Ok(self
            .store
            .private_group_for_user(user_id)
            .await?
            .ok_or_else(|| StoreError::not_found("private group of user", user_id))?)
    }

    /// Load the vault graph and check the actor may write the parent node.
    async fn writable_parent(
        &self,
        actor: UserId,
        vault_id: VaultId,
        folder_id: Option<FolderId>,
    ) -> Result<(AccessGraph, NodeRef)> {
        let graph = self.store.require_graph(vault_id).await?;
        let parent = folder_id.map_or(NodeRef::Vault(vault_id), NodeRef::Folder);
        if !graph.contains(parent) {
            return Err(PermsError::NodeNotFound(parent).into());
        }
        let groups = self.store.group_ids_for_user(actor).await?;
        if !graph.has_write(parent, &groups) {
            return Err(PermsError::AuthorizationInsufficient(format!(
                "user {actor} cannot write {parent}"
            ))
            .into());
        }
        Ok((graph, parent))
    }

    async fn require_write(&self, actor: UserId, vault_id: VaultId, node: NodeRef) -> Result<()> {
        let graph = self.store.require_graph(vault_id).await?;
        let groups = self.store.group_ids_for_user(actor).await?;
        if !graph.has_write(node, &groups) {
            return Err(PermsError::AuthorizationInsufficient(format!(
                "user {actor} cannot write {node}"
            ))
            .into());
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Access Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the user can see the node.
    pub async fn has_read(&self, user_id: UserId, node: NodeRef) -> Result<bool> {
        self.check(user_id, node, AccessGraph::has_read).await
    }

    /// Whether the user can write the node, explicitly or not.
    pub async fn has_write(&self, user_id: UserId, node: NodeRef) -> Result<bool> {
        self.check(user_id, node, AccessGraph::has_write).await
    }

    /// Whether the user holds explicit (non-partial) write on the node.
    pub async fn has_full_write(&self, user_id: UserId, node: NodeRef) -> Result<bool> {
        self.check(user_id, node, AccessGraph::has_full_write).await
    }

    async fn check(
        &self,
        user_id: UserId,
        node: NodeRef,
        predicate: fn(&AccessGraph, NodeRef, &BTreeSet<GroupId>) -> bool,
    ) -> Result<bool> {
        let Some(vault_id) = self.vault_of_node(node).await? else {
            return Ok(false);
        };
        let graph = self.store.require_graph(vault_id).await?;
        let groups = self.store.group_ids_for_user(user_id).await?;
        Ok(predicate(&graph, node, &groups))
    }

    async fn vault_of_node(&self, node: NodeRef) -> Result<Option<VaultId>> {
        Ok(match node {
            NodeRef::Vault(id) => self.store.get_vault(id).await?.map(|v| v.id),
            NodeRef::Folder(id) => self.store.get_folder(id).await?.map(|f| f.vault_id),
            NodeRef::Secret(id) => self.store.get_secret(id).await?.map(|s| s.vault_id),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permission Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Set the grants of a vault or folder to `requests`.
    ///
    /// The scope's own rows and missing ancestor rows are written now,
    /// together with the audit entry. A share process then re-keys the
    /// items below the scope in the background; with `cascade` it covers
    /// the whole subtree, otherwise only the direct children secrets.
    pub async fn update_permissions(
        &self,
        initiator: UserId,
        passphrase: &str,
        scope: ScopeRef,
        requests: Vec<GrantRequest>,
        cascade: bool,
    ) -> Result<PermissionChange> {
        validate_grant_requests(&requests)?;
        let vault_id = self.store.vault_of(scope).await?;
        let (_, proof) = self.unlock(initiator, passphrase).await?;

        let grants = resolve_requests(self.store.as_ref(), &requests).await?;
        let groups = self.store.group_ids_for_user(initiator).await?;
        let graph = self.store.require_graph(vault_id).await?;
        let diff = PermissionPropagator::new(&graph).diff(scope, &grants, &groups)?;

        let audit = if diff.plan.is_empty() {
            None
        } else {
            let mut ids: Vec<GroupId> = grants.group_ids().collect();
            ids.extend(diff.revoked_groups());
            let names = self.store.group_names(&ids).await?;
            Some(AuditEntry {
                actor: initiator,
                target: scope.into(),
                diff: diff.audit_diff(|g| names.get(&g).cloned().unwrap_or_else(|| g.to_string())),
                at: now_millis(),
            })
        };
        self.store.apply_grant_diff(&diff, audit.as_ref()).await?;

        let process = self.engine.create(scope, cascade, requests, initiator).await?;
        self.proofs.insert(process.id, proof);
        self.queue.push(Job::ShareProcess(process.id)).await?;

        let revoked = diff.revoked_groups();
        if !revoked.is_empty() {
            self.queue
                .push(Job::PartialAccessCleanup {
                    vault_id: Some(vault_id),
                    group_ids: revoked.into_iter().collect(),
                })
                .await?;
        }

        tracing::info!(
            process_id = %process.id,
            %scope,
            added = diff.plan.add.len(),
            updated = diff.plan.keep.len(),
            demoted = diff.plan.remove.len(),
            "permissions updated"
        );
        Ok(PermissionChange { diff, process })
    }

    /// Give one secret exactly the groups in `requests`.
    ///
    /// The content key is wrapped for new groups with the initiator's
    /// memberships, and every ancestor the groups cannot reach yet gets a
    /// demoted row. Everything is written in one transaction; no share
    /// process is involved. Partial requests are ignored: a secret is a
    /// leaf and only carries keys.
    pub async fn share_secret(
        &self,
        initiator: UserId,
        passphrase: &str,
        secret_id: SecretId,
        requests: Vec<GrantRequest>,
    ) -> Result<SecretShare> {
        validate_grant_requests(&requests)?;
        let secret = self
            .store
            .get_secret(secret_id)
            .await?
            .ok_or_else(|| StoreError::not_found("secret", secret_id))?;
        let node = NodeRef::Secret(secret_id);

        let graph = self.store.require_graph(secret.vault_id).await?;
        let groups = self.store.group_ids_for_user(initiator).await?;
        if !graph.has_full_write(node, &groups) {
            return Err(PermsError::AuthorizationInsufficient(format!(
                "user {initiator} cannot write {node}"
            ))
            .into());
        }
        let (user, proof) = self.unlock(initiator, passphrase).await?;

        let targets = resolve_requests(self.store.as_ref(), &requests)
            .await?
            .secret_targets();
        let current = self.store.secret_grants(&[secret_id]).await?;
        let plan = plan_secret_grants(&current, &targets)?;

        if let Some(owner) = graph.owner() {
            if !plan.add.is_empty() {
                return Err(PermsError::InvariantViolation(format!(
                    "personal vault of user {owner} cannot be shared"
                ))
                .into());
            }
        }

        let mut batch = BatchCommit::default();
        if !plan.add.is_empty() {
            let memberships = self.store.memberships_for_user(initiator).await?;
            let mut ring = KeyRing::unlock(&user, &proof, memberships)?;
            let content_key = ring.recover_content_key(&current)?;
            for (group_id, can_write) in &plan.add {
                let group = self.live_group(*group_id).await?;
                batch.secret_grant_puts.push(SecretGrant {
                    secret_id,
                    group_id: *group_id,
                    can_write: *can_write,
                    wrapped_key: KeyVault::wrap_for_group(
                        content_key.as_bytes(),
                        &X25519PublicKey::from_bytes(group.public_key),
                    )?,
                });
            }
        }
        batch.secret_grant_updates = plan
            .update
            .iter()
            .map(|(group_id, _, after)| (secret_id, *group_id, *after))
            .collect();
        batch.secret_grant_deletes = plan
            .remove
            .iter()
            .map(|(group_id, _)| (secret_id, *group_id))
            .collect();
        let ancestor_rows = missing_ancestor_rows(&graph, node, targets.keys().copied());
        batch.grant_ensures = ancestor_rows.clone();

        if !plan.is_empty() {
            let mut ids: Vec<GroupId> = targets.keys().copied().collect();
            ids.extend(plan.remove.iter().map(|(g, _)| *g));
            let names = self.store.group_names(&ids).await?;
            batch.audit.push(AuditEntry {
                actor: initiator,
                target: node,
                diff: plan.audit_diff(|g| names.get(&g).cloned().unwrap_or_else(|| g.to_string())),
                at: now_millis(),
            });
        }
        self.store.apply_grant_batch(&batch).await?;

        if !plan.remove.is_empty() {
            self.queue
                .push(Job::PartialAccessCleanup {
                    vault_id: Some(secret.vault_id),
                    group_ids: plan.remove.iter().map(|(g, _)| *g).collect(),
                })
                .await?;
        }

        tracing::info!(
            %secret_id,
            added = plan.add.len(),
            updated = plan.update.len(),
            removed = plan.remove.len(),
            ancestors = ancestor_rows.len(),
            "secret shared"
        );
        Ok(SecretShare {
            secret_id,
            plan,
            ancestor_rows,
        })
    }

    /// Cancel a pending share process. Only its initiator may cancel it.
    pub async fn cancel_share_process(
        &self,
        actor: UserId,
        id: ShareProcessId,
    ) -> Result<ShareProcess> {
        let process = self.share_process(id).await?;
        if process.initiator != actor {
            return Err(PermsError::AuthorizationInsufficient(format!(
                "user {actor} did not start share process {id}"
            ))
            .into());
        }
        let canceled = self.engine.cancel(id).await?;
        self.proofs.remove(id);
        Ok(canceled)
    }

    /// Status and counters of a share process.
    pub async fn share_process(&self, id: ShareProcessId) -> Result<ShareProcess> {
        Ok(self
            .store
            .get_share_process(id)
            .await?
            .ok_or(ShareError::ProcessNotFound(id))?)
    }

    /// Items of a share process with their outcomes.
    pub async fn share_items(&self, id: ShareProcessId) -> Result<Vec<ShareItem>> {
        Ok(self.store.share_items(id).await?)
    }

    /// Re-supply the unlock proof of a pending process and queue it again.
    ///
    /// Proofs live in memory only, so processes left pending by a restart
    /// wait here.
    pub async fn resume_share_process(
        &self,
        initiator: UserId,
        passphrase: &str,
        id: ShareProcessId,
    ) -> Result<()> {
        let process = self.share_process(id).await?;
        if process.initiator != initiator {
            return Err(PermsError::AuthorizationInsufficient(format!(
                "user {initiator} did not start share process {id}"
            ))
            .into());
        }
        if process.status != ShareStatus::Pending {
            return Err(ShareError::ProcessAlreadyTerminal {
                id,
                status: process.status,
            }
            .into());
        }

        let (_, proof) = self.unlock(initiator, passphrase).await?;
        self.proofs.insert(id, proof);
        self.queue.push(Job::ShareProcess(id)).await?;
        tracing::info!(process_id = %id, "share process resumed");
        Ok(())
    }

    /// Run the reaper now, outside the job queue.
    pub async fn clean_up(
        &self,
        vault_id: Option<VaultId>,
        group_ids: &[GroupId],
    ) -> Result<ReapReport> {
        Ok(self.reaper.clean_up(vault_id, group_ids).await?)
    }

    /// Audit entries of a node, oldest first.
    pub async fn audit_entries(&self, target: NodeRef) -> Result<Vec<AuditEntry>> {
        Ok(self.store.audit_entries_for(target).await?)
    }
}

/// Explicit (non-partial) grants of a node.
fn explicit_grants(graph: &AccessGraph, node: NodeRef) -> BTreeMap<GroupId, Access> {
    graph
        .grants(node)
        .map(|grants| {
            grants
                .iter()
                .filter(|(_, a)| !a.partial)
                .map(|(g, a)| (*g, *a))
                .collect()
        })
        .unwrap_or_default()
}
