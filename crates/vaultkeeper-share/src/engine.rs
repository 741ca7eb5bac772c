//! The share process engine.
//!
//! A share process re-keys every eligible item under a scope so that the
//! items end up granted to exactly the requested groups. The process is a
//! durable state machine:
//!
//! ```text
//! Pending ──run──► Running ──► Completed
//!    │                 └─────► Failed
//!    └──cancel──► Canceled
//! ```
//!
//! Items are materialized as `ShareItem` rows before any work starts, so a
//! crashed run resumes from the rows still `Pending`. Each batch commits in
//! one transaction; a failing item is recorded and never aborts the batch.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use vaultkeeper_core::{
    now_millis, validate_grant_requests, AuditEntry, FolderId, GrantRequest, GroupId, ItemKind,
    ItemTarget, Job, NodeRef, Principal, ScopeRef, SecretGrant, SecretId, ShareItem,
    ShareProcess, ShareProcessId, ShareStatus, UserId,
};
use vaultkeeper_perms::{
    missing_ancestor_rows, plan_node_grants, AccessGraph, GrantRow, GrantSet, Grants, KeyRing,
    KeyVault, PermsError, UnlockProof, X25519PublicKey,
};
use vaultkeeper_store::{BatchCommit, ItemOutcome, Store, StoreExt};

use crate::batch::{self, eligible_targets, plan_secret_grants, BatchProgress};
use crate::config::EngineConfig;
use crate::error::{Result, ShareError};
use crate::queue::JobQueue;

/// Outcome of one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub process_id: ShareProcessId,
    /// Status after the invocation.
    pub status: ShareStatus,
    /// Batches committed by this invocation.
    pub progress: BatchProgress,
    pub message: Option<String>,
}

impl RunReport {
    fn untouched(process: &ShareProcess) -> Self {
        Self {
            process_id: process.id,
            status: process.status,
            progress: BatchProgress::default(),
            message: process.message.clone(),
        }
    }
}

/// Resolve grant requests into a group-keyed set, mapping user principals
/// to their private groups.
pub async fn resolve_requests<S: Store + ?Sized>(
    store: &S,
    requests: &[GrantRequest],
) -> Result<GrantSet> {
    let mut private = HashMap::new();
    for request in requests {
        if let Principal::User(user_id) = request.principal {
            if let Some(group_id) = store.private_group_for_user(user_id).await? {
                private.insert(user_id, group_id);
            }
        }
    }
    Ok(GrantSet::resolve(requests, |user_id| {
        private.get(&user_id).copied()
    })?)
}

/// Per-run state shared by every batch.
struct RunContext<'a> {
    process: &'a ShareProcess,
    /// The initiator's memberships at run start.
    groups: BTreeSet<GroupId>,
    grants: GrantSet,
    /// `group -> can_write` for secrets.
    secret_targets: BTreeMap<GroupId, bool>,
    /// Public keys of the groups in `secret_targets`.
    recipients: HashMap<GroupId, X25519PublicKey>,
}

/// Rows produced for one item, merged into the batch only on success.
#[derive(Default)]
struct ItemChanges {
    secret_grant_puts: Vec<SecretGrant>,
    secret_grant_updates: Vec<(SecretId, GroupId, bool)>,
    secret_grant_deletes: Vec<(SecretId, GroupId)>,
    grant_upserts: Vec<GrantRow>,
    grant_ensures: Vec<GrantRow>,
    audit: Option<AuditEntry>,
}

impl ItemChanges {
    fn merge_into(self, batch: &mut BatchCommit) {
        batch.secret_grant_puts.extend(self.secret_grant_puts);
        batch.secret_grant_updates.extend(self.secret_grant_updates);
        batch.secret_grant_deletes.extend(self.secret_grant_deletes);
        batch.grant_upserts.extend(self.grant_upserts);
        batch.grant_ensures.extend(self.grant_ensures);
        batch.audit.extend(self.audit);
    }
}

/// Ids of the processes this engine is executing.
#[derive(Debug, Default)]
struct InFlight(Mutex<HashSet<ShareProcessId>>);

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashSet<ShareProcessId>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `id`; `None` if it is already executing here.
    fn enter(&self, id: ShareProcessId) -> Option<RunGuard<'_>> {
        self.lock().insert(id).then_some(RunGuard { set: self, id })
    }
}

/// Unregisters a process when its run ends, however it ends.
pub(crate) struct RunGuard<'a> {
    set: &'a InFlight,
    id: ShareProcessId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Executes share processes against a store.
pub struct ShareProcessEngine<S: Store> {
    store: Arc<S>,
    queue: Arc<dyn JobQueue>,
    config: EngineConfig,
    in_flight: InFlight,
}

impl<S: Store> ShareProcessEngine<S> {
    pub fn new(store: Arc<S>, queue: Arc<dyn JobQueue>, config: EngineConfig) -> Self {
        Self {
            store,
            queue,
            config,
            in_flight: InFlight::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Processes this engine is executing right now. Their rows read
    /// `Running` and must not be mistaken for stalled ones.
    pub fn running(&self) -> Vec<ShareProcessId> {
        self.in_flight.lock().iter().copied().collect()
    }

    pub(crate) fn track(&self, id: ShareProcessId) -> Option<RunGuard<'_>> {
        self.in_flight.enter(id)
    }

    /// Persist a new `Pending` process. Execution is asynchronous.
    pub async fn create(
        &self,
        scope: ScopeRef,
        cascade: bool,
        requested: Vec<GrantRequest>,
        initiator: UserId,
    ) -> Result<ShareProcess> {
        validate_grant_requests(&requested).map_err(PermsError::from)?;
        let vault_id = self.store.vault_of(scope).await?;

        let process =
            ShareProcess::new(scope, vault_id, cascade, requested, initiator, now_millis());
        self.store.insert_share_process(&process).await?;

        tracing::info!(process_id = %process.id, %scope, cascade, "share process created");
        Ok(process)
    }

    /// Cancel a `Pending` process.
    pub async fn cancel(&self, id: ShareProcessId) -> Result<ShareProcess> {
        let canceled = self
            .store
            .transition_share_process(
                id,
                ShareStatus::Pending,
                ShareStatus::Canceled,
                Some("canceled"),
                now_millis(),
            )
            .await?;
        let process = self
            .store
            .get_share_process(id)
            .await?
            .ok_or(ShareError::ProcessNotFound(id))?;

        if canceled {
            tracing::info!(process_id = %id, "share process canceled");
            return Ok(process);
        }
        match process.status {
            status if status.is_terminal() => {
                Err(ShareError::ProcessAlreadyTerminal { id, status })
            }
            status => Err(ShareError::NotCancelable { id, status }),
        }
    }

    /// Run a process to completion.
    ///
    /// A canceled or already running process is left untouched. A finished
    /// one yields [`ShareError::ProcessAlreadyTerminal`]. Run-level failures
    /// are recorded on the process and reported, not returned as errors.
    pub async fn run(&self, id: ShareProcessId, proof: &UnlockProof) -> Result<RunReport> {
        let process = self
            .store
            .get_share_process(id)
            .await?
            .ok_or(ShareError::ProcessNotFound(id))?;

        match process.status {
            ShareStatus::Pending => {}
            ShareStatus::Canceled | ShareStatus::Running => {
                tracing::debug!(
                    process_id = %id,
                    status = %process.status,
                    "share process skipped"
                );
                return Ok(RunReport::untouched(&process));
            }
            status => return Err(ShareError::ProcessAlreadyTerminal { id, status }),
        }

        let Some(_guard) = self.track(id) else {
            tracing::debug!(process_id = %id, "share process already executing");
            return Ok(RunReport::untouched(&process));
        };
        let started = self
            .store
            .transition_share_process(
                id,
                ShareStatus::Pending,
                ShareStatus::Running,
                None,
                now_millis(),
            )
            .await?;
        if !started {
            // Lost the race against another run or a cancel.
            let current = self
                .store
                .get_share_process(id)
                .await?
                .ok_or(ShareError::ProcessNotFound(id))?;
            return Ok(RunReport::untouched(&current));
        }
        tracing::info!(process_id = %id, vault_id = %process.vault_id, "share process started");

        match self.execute(&process, proof).await {
            Ok(progress) => {
                self.store
                    .transition_share_process(
                        id,
                        ShareStatus::Running,
                        ShareStatus::Completed,
                        None,
                        now_millis(),
                    )
                    .await?;
                tracing::info!(
                    process_id = %id,
                    batches = progress.batches,
                    done = progress.done,
                    failed = progress.failed,
                    "share process completed"
                );
                self.queue.push(Job::cleanup_vault(process.vault_id)).await?;
                Ok(RunReport {
                    process_id: id,
                    status: ShareStatus::Completed,
                    progress,
                    message: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(process_id = %id, error = %message, "share process failed");
                self.store
                    .transition_share_process(
                        id,
                        ShareStatus::Running,
                        ShareStatus::Failed,
                        Some(&message),
                        now_millis(),
                    )
                    .await?;
                Ok(RunReport {
                    process_id: id,
                    status: ShareStatus::Failed,
                    progress: BatchProgress::default(),
                    message: Some(message),
                })
            }
        }
    }

    async fn execute(&self, process: &ShareProcess, proof: &UnlockProof) -> Result<BatchProgress> {
        let initiator = self.store.require_user(process.initiator).await?;
        let memberships = self.store.memberships_for_user(initiator.id).await?;
        let groups: BTreeSet<GroupId> = memberships.iter().map(|m| m.group_id).collect();

        let mut grants = resolve_requests(self.store.as_ref(), &process.requested).await?;
        let recipients = self.recipients(process.id, &mut grants).await?;
        let secret_targets = grants.secret_targets();

        let graph = self.store.require_graph(process.vault_id).await?;
        let scope = NodeRef::from(process.scope);
        if !graph.contains(scope) {
            return Err(PermsError::NodeNotFound(scope).into());
        }

        let targets = eligible_targets(&graph, process.scope, process.cascade, &groups);
        let total = self
            .store
            .insert_share_items(process.id, &targets, now_millis())
            .await?;
        if total == 0 {
            tracing::debug!(process_id = %process.id, "no eligible items");
            return Ok(BatchProgress::default());
        }

        // Unlocked once per run; every key in the ring is erased on drop,
        // whichever way this function returns.
        let mut ring = KeyRing::unlock(&initiator, proof, memberships)?;

        let ctx = RunContext {
            process,
            groups,
            grants,
            secret_targets,
            recipients,
        };
        let progress = self
            .drain(ItemKind::Secret, &ctx, &mut ring, BatchProgress::default())
            .await?;
        self.drain(ItemKind::Folder, &ctx, &mut ring, progress).await
    }

    /// Public keys of the requested groups.
    ///
    /// A group deleted after the request was made is dropped from `grants`
    /// and the rest of the process goes ahead without it.
    async fn recipients(
        &self,
        process_id: ShareProcessId,
        grants: &mut GrantSet,
    ) -> Result<HashMap<GroupId, X25519PublicKey>> {
        let requested: Vec<GroupId> = grants.group_ids().collect();
        let mut out = HashMap::new();
        for group_id in requested {
            match self.store.get_group(group_id).await?.filter(|g| !g.is_deleted()) {
                Some(group) => {
                    out.insert(group_id, X25519PublicKey::from_bytes(group.public_key));
                }
                None => {
                    tracing::warn!(%process_id, %group_id, "requested group is gone, skipped");
                    grants.remove(group_id);
                }
            }
        }
        Ok(out)
    }

    /// Process every pending item of one kind, batch by batch.
    async fn drain(
        &self,
        kind: ItemKind,
        ctx: &RunContext<'_>,
        ring: &mut KeyRing,
        mut progress: BatchProgress,
    ) -> Result<BatchProgress> {
        let limit = self.config.batch_size.max(1);
        loop {
            let items = self
                .store
                .pending_share_items(ctx.process.id, kind, limit)
                .await?;
            if items.is_empty() {
                return Ok(progress);
            }

            // Fresh snapshot per batch: deletions and earlier batches are visible.
            let mut graph = self.store.require_graph(ctx.process.vault_id).await?;
            let batch = match kind {
                ItemKind::Secret => self.secret_batch(ctx, &mut graph, ring, &items).await?,
                ItemKind::Folder => self.folder_batch(ctx, &mut graph, &items).await?,
            };

            self.store
                .commit_batch(ctx.process.id, &batch, now_millis())
                .await?;
            progress = progress.record(&batch);
            tracing::debug!(
                process_id = %ctx.process.id,
                batch = progress.batches,
                kind = kind.as_str(),
                items = items.len(),
                "batch committed"
            );
        }
    }

    /// Names of the requested groups plus `extra`, resolved for audit.
    async fn group_names(
        &self,
        ctx: &RunContext<'_>,
        extra: impl Iterator<Item = GroupId> + Send,
    ) -> Result<HashMap<GroupId, String>> {
        let wanted: BTreeSet<GroupId> = ctx.grants.group_ids().chain(extra).collect();
        let wanted: Vec<GroupId> = wanted.into_iter().collect();
        Ok(self.store.group_names(&wanted).await?)
    }

    async fn secret_batch(
        &self,
        ctx: &RunContext<'_>,
        graph: &mut AccessGraph,
        ring: &mut KeyRing,
        items: &[ShareItem],
    ) -> Result<BatchCommit> {
        let ids: Vec<SecretId> = items
            .iter()
            .filter_map(|item| match item.target {
                ItemTarget::Secret(id) => Some(id),
                ItemTarget::Folder(_) => None,
            })
            .collect();

        let mut current: HashMap<SecretId, Vec<SecretGrant>> = HashMap::new();
        for grant in self.store.secret_grants(&ids).await? {
            current.entry(grant.secret_id).or_default().push(grant);
        }
        let names = self
            .group_names(ctx, current.values().flatten().map(|g| g.group_id))
            .await?;

        let now = now_millis();
        let mut out = BatchCommit::default();
        for item in items {
            let ItemTarget::Secret(secret_id) = item.target else {
                out.outcomes.push(batch::failed(item, "not a secret item".into()));
                continue;
            };
            if !graph.contains(NodeRef::Secret(secret_id)) {
                out.outcomes.push(batch::done(item, Some("target deleted")));
                continue;
            }

            let grants = current.get(&secret_id).map(Vec::as_slice).unwrap_or(&[]);
            match rekey_secret(ctx, graph, ring, secret_id, grants, &names, now) {
                Ok(changes) => {
                    changes.merge_into(&mut out);
                    out.outcomes.push(batch::done(item, None));
                }
                Err(e) => {
                    tracing::warn!(
                        process_id = %ctx.process.id,
                        secret = %secret_id,
                        error = %e,
                        "secret item failed"
                    );
                    out.outcomes.push(item_failed(item, e));
                }
            }
        }
        Ok(out)
    }

    async fn folder_batch(
        &self,
        ctx: &RunContext<'_>,
        graph: &mut AccessGraph,
        items: &[ShareItem],
    ) -> Result<BatchCommit> {
        let present: Vec<GroupId> = items
            .iter()
            .filter_map(|item| match item.target {
                ItemTarget::Folder(id) => graph.grants(NodeRef::Folder(id)),
                ItemTarget::Secret(_) => None,
            })
            .flat_map(|grants| grants.keys().copied())
            .collect();
        let names = self.group_names(ctx, present.into_iter()).await?;

        let now = now_millis();
        let mut out = BatchCommit::default();
        for item in items {
            let ItemTarget::Folder(folder_id) = item.target else {
                out.outcomes.push(batch::failed(item, "not a folder item".into()));
                continue;
            };
            let Some(current) = graph.grants(NodeRef::Folder(folder_id)).cloned() else {
                out.outcomes.push(batch::done(item, Some("target deleted")));
                continue;
            };

            match rekey_folder(ctx, graph, folder_id, &current, &names, now) {
                Ok(changes) => {
                    changes.merge_into(&mut out);
                    out.outcomes.push(batch::done(item, None));
                }
                Err(e) => {
                    tracing::warn!(
                        process_id = %ctx.process.id,
                        folder = %folder_id,
                        error = %e,
                        "folder item failed"
                    );
                    out.outcomes.push(item_failed(item, e));
                }
            }
        }
        Ok(out)
    }
}

fn item_failed(item: &ShareItem, e: ShareError) -> ItemOutcome {
    batch::failed(item, ShareError::ItemProcessing(e.to_string()).to_string())
}

fn name_lookup(names: &HashMap<GroupId, String>) -> impl FnMut(GroupId) -> String + '_ {
    move |group_id| {
        names
            .get(&group_id)
            .cloned()
            .unwrap_or_else(|| group_id.to_string())
    }
}

/// Give a secret exactly the requested groups.
///
/// New groups receive the content key recovered through the initiator's
/// memberships; the recovered key is erased before returning.
fn rekey_secret(
    ctx: &RunContext<'_>,
    graph: &mut AccessGraph,
    ring: &mut KeyRing,
    secret_id: SecretId,
    current: &[SecretGrant],
    names: &HashMap<GroupId, String>,
    now: i64,
) -> Result<ItemChanges> {
    let plan = plan_secret_grants(current, &ctx.secret_targets)?;
    let mut changes = ItemChanges::default();

    if !plan.add.is_empty() {
        let content_key = ring.recover_content_key(current)?;
        for (group_id, can_write) in &plan.add {
            let recipient = ctx.recipients.get(group_id).ok_or_else(|| {
                ShareError::ItemProcessing(format!("no public key for group {group_id}"))
            })?;
            changes.secret_grant_puts.push(SecretGrant {
                secret_id,
                group_id: *group_id,
                can_write: *can_write,
                wrapped_key: KeyVault::wrap_for_group(content_key.as_bytes(), recipient)?,
            });
        }
    }

    changes.secret_grant_updates = plan
        .update
        .iter()
        .map(|(group_id, _, after)| (secret_id, *group_id, *after))
        .collect();
    changes.secret_grant_deletes = plan
        .remove
        .iter()
        .map(|(group_id, _)| (secret_id, *group_id))
        .collect();

    let node = NodeRef::Secret(secret_id);
    changes.grant_ensures = missing_ancestor_rows(graph, node, ctx.secret_targets.keys().copied());
    for row in &changes.grant_ensures {
        graph.set_grant(row.node, row.group_id, row.access);
    }

    if !plan.is_empty() {
        changes.audit = Some(AuditEntry {
            actor: ctx.process.initiator,
            target: node,
            diff: plan.audit_diff(name_lookup(names)),
            at: now,
        });
    }
    Ok(changes)
}

/// Apply the requested grants to a folder with partial semantics.
fn rekey_folder(
    ctx: &RunContext<'_>,
    graph: &mut AccessGraph,
    folder_id: FolderId,
    current: &Grants,
    names: &HashMap<GroupId, String>,
    now: i64,
) -> Result<ItemChanges> {
    let node = NodeRef::Folder(folder_id);
    let full_write = graph.has_full_write(node, &ctx.groups);
    let plan = plan_node_grants(current, &ctx.grants, full_write);

    let result = plan.result(current);
    if !result.values().any(|a| a.can_write) {
        return Err(PermsError::InvariantViolation(format!(
            "{node} would be left without a writer"
        ))
        .into());
    }

    let mut changes = ItemChanges {
        grant_upserts: plan.rows(node),
        ..ItemChanges::default()
    };
    for row in &changes.grant_upserts {
        graph.set_grant(row.node, row.group_id, row.access);
    }

    let present = result
        .iter()
        .filter(|(_, a)| !a.is_demoted())
        .map(|(g, _)| *g);
    changes.grant_ensures = missing_ancestor_rows(graph, node, present);
    for row in &changes.grant_ensures {
        graph.set_grant(row.node, row.group_id, row.access);
    }

    if !plan.is_empty() {
        changes.audit = Some(AuditEntry {
            actor: ctx.process.initiator,
            target: node,
            diff: plan.audit_diff(name_lookup(names)),
            at: now,
        });
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::testing::{Fixture, Member};
    use vaultkeeper_core::{Access, ItemStatus};
    use vaultkeeper_store::SqliteStore;

    fn engine(
        fx: &Fixture,
        batch_size: usize,
    ) -> (ShareProcessEngine<SqliteStore>, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new());
        let engine = ShareProcessEngine::new(
            fx.store.clone(),
            queue.clone(),
            EngineConfig {
                batch_size,
                ..EngineConfig::default()
            },
        );
        (engine, queue)
    }

    async fn share(
        engine: &ShareProcessEngine<SqliteStore>,
        initiator: &Member,
        scope: ScopeRef,
        cascade: bool,
        requested: Vec<GrantRequest>,
    ) -> RunReport {
        let process = engine
            .create(scope, cascade, requested, initiator.user.id)
            .await
            .unwrap();
        engine.run(process.id, &initiator.proof()).await.unwrap()
    }

    #[tokio::test]
    async fn test_share_vault_with_new_group() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        let folder = fx.folder(&alice, vault, None).await;
        let s1 = fx.secret(&alice, vault, None, b"one").await;
        let s2 = fx.secret(&alice, vault, Some(folder), b"two").await;

        let (engine, queue) = engine(&fx, 500);
        let report = share(
            &engine,
            &alice,
            ScopeRef::Vault(vault),
            true,
            vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)],
        )
        .await;
        assert_eq!(report.status, ShareStatus::Completed);
        assert_eq!(report.progress.settled(), 3);
        assert_eq!(report.progress.failed, 0);

        // Bob can now decrypt both secrets.
        assert_eq!(fx.read(&bob, s1).await, b"one");
        assert_eq!(fx.read(&bob, s2).await, b"two");

        // The folder gained an explicit read row for bob.
        let graph = fx.store.require_graph(vault).await.unwrap();
        assert_eq!(graph.grant(NodeRef::Folder(folder), bob.group), Some(Access::read()));
        // The vault itself is not a target; bob only got the ancestor row.
        assert_eq!(graph.grant(NodeRef::Vault(vault), bob.group), Some(Access::demoted()));

        let next = queue.pop().await.unwrap().unwrap();
        assert_eq!(next.job, Job::cleanup_vault(vault));

        let stored = fx.store.get_share_process(report.process_id).await.unwrap().unwrap();
        assert_eq!(stored.total_items, 3);
        assert_eq!(stored.settled_items(), 3);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_batches_and_counters() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        for i in 0..7u8 {
            fx.secret(&alice, vault, None, &[i]).await;
        }

        let (engine, _) = engine(&fx, 3);
        let report = share(
            &engine,
            &alice,
            ScopeRef::Vault(vault),
            false,
            vec![GrantRequest::write(alice.group), GrantRequest::write(bob.group)],
        )
        .await;

        assert_eq!(report.progress.batches, 3);
        assert_eq!(report.progress.done, 7);
        let items = fx.store.share_items(report.process_id).await.unwrap();
        assert!(items.iter().all(|i| i.status == ItemStatus::Done));
    }

    #[tokio::test]
    async fn test_removed_group_loses_secret_key() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        let s = fx.secret(&alice, vault, None, b"x").await;
        let (engine, _) = engine(&fx, 500);

        let scope = ScopeRef::Vault(vault);
        let both = vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)];
        share(&engine, &alice, scope, false, both).await;
        assert_eq!(fx.store.secret_grants(&[s]).await.unwrap().len(), 2);

        share(&engine, &alice, scope, false, vec![GrantRequest::write(alice.group)]).await;
        let grants = fx.store.secret_grants(&[s]).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].group_id, alice.group);

        let audit = fx.store.audit_entries_for(NodeRef::Secret(s)).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[1].diff.remove[0].group_id, bob.group);
        assert_eq!(audit[1].diff.remove[0].group_name, "bob");
    }

    #[tokio::test]
    async fn test_failed_item_does_not_fail_process() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        let good = fx.secret(&alice, vault, None, b"ok").await;
        let broken = fx.broken_secret(&alice, vault).await;

        let (engine, _) = engine(&fx, 500);
        let report = share(
            &engine,
            &alice,
            ScopeRef::Vault(vault),
            false,
            vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)],
        )
        .await;

        assert_eq!(report.status, ShareStatus::Completed);
        assert_eq!(report.progress.done, 1);
        assert_eq!(report.progress.failed, 1);

        let items = fx.store.share_items(report.process_id).await.unwrap();
        let failed = items
            .iter()
            .find(|i| i.target == ItemTarget::Secret(broken))
            .unwrap();
        assert_eq!(failed.status, ItemStatus::Failed);
        assert!(failed.message.as_deref().unwrap().contains("item processing failed"));

        // The healthy secret went through; the broken one is untouched.
        assert_eq!(fx.read(&bob, good).await, b"ok");
        assert_eq!(fx.store.secret_grants(&[broken]).await.unwrap().len(), 1);

        let stored = fx.store.get_share_process(report.process_id).await.unwrap().unwrap();
        assert_eq!(stored.failed_items, 1);
        assert_eq!(stored.processed_items, 1);
    }

    #[tokio::test]
    async fn test_partial_request_demotes_folder_grant() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        let folder = fx.folder(&alice, vault, None).await;
        let (engine, _) = engine(&fx, 500);
        let scope = ScopeRef::Vault(vault);

        let read = vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)];
        share(&engine, &alice, scope, true, read).await;
        let partial = vec![GrantRequest::write(alice.group), GrantRequest::partial(bob.group)];
        share(&engine, &alice, scope, true, partial).await;

        let graph = fx.store.require_graph(vault).await.unwrap();
        assert_eq!(graph.grant(NodeRef::Folder(folder), bob.group), Some(Access::demoted()));
        assert_eq!(graph.grant(NodeRef::Folder(folder), alice.group), Some(Access::write()));
    }

    #[tokio::test]
    async fn test_canceled_process_is_untouched() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        let s = fx.secret(&alice, vault, None, b"x").await;

        let (engine, queue) = engine(&fx, 500);
        let process = engine
            .create(
                ScopeRef::Vault(vault),
                false,
                vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)],
                alice.user.id,
            )
            .await
            .unwrap();
        let canceled = engine.cancel(process.id).await.unwrap();
        assert_eq!(canceled.status, ShareStatus::Canceled);

        let report = engine.run(process.id, &alice.proof()).await.unwrap();
        assert_eq!(report.status, ShareStatus::Canceled);
        assert!(fx.store.share_items(process.id).await.unwrap().is_empty());
        assert_eq!(fx.store.secret_grants(&[s]).await.unwrap().len(), 1);
        assert!(queue.pop().await.unwrap().is_none());

        let err = engine.cancel(process.id).await.unwrap_err();
        assert!(matches!(err, ShareError::ProcessAlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn test_cancel_unknown_process() {
        let fx = Fixture::new().await;
        let (engine, _) = engine(&fx, 500);
        let err = engine.cancel(ShareProcessId::new()).await.unwrap_err();
        assert!(matches!(err, ShareError::ProcessNotFound(_)));
    }

    #[tokio::test]
    async fn test_finished_process_cannot_rerun() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let vault = fx.vault(&alice).await;

        let (engine, _) = engine(&fx, 500);
        let requested = vec![GrantRequest::write(alice.group)];
        let report = share(&engine, &alice, ScopeRef::Vault(vault), true, requested).await;
        // Nothing eligible: completed immediately.
        assert_eq!(report.status, ShareStatus::Completed);
        assert_eq!(report.progress, BatchProgress::default());

        let err = engine.run(report.process_id, &alice.proof()).await.unwrap_err();
        assert!(matches!(err, ShareError::ProcessAlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn test_wrong_passphrase_fails_process() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let vault = fx.vault(&alice).await;
        fx.secret(&alice, vault, None, b"x").await;

        let (engine, queue) = engine(&fx, 500);
        let process = engine
            .create(
                ScopeRef::Vault(vault),
                false,
                vec![GrantRequest::write(alice.group), GrantRequest::read(bob.group)],
                alice.user.id,
            )
            .await
            .unwrap();

        let report = engine.run(process.id, &bob.proof()).await.unwrap();
        assert_eq!(report.status, ShareStatus::Failed);
        let stored = fx.store.get_share_process(process.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ShareStatus::Failed);
        assert!(stored.message.unwrap().contains("decryption failed"));
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_only_fully_writable_items_are_targeted() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let carol = fx.member("carol").await;
        // Bob can write the vault but holds no key for its secret.
        let vault = fx.vault_with(&[(&alice, Access::write()), (&bob, Access::write())]).await;
        fx.secret(&alice, vault, None, b"x").await;

        let (engine, _) = engine(&fx, 500);
        let report = share(
            &engine,
            &bob,
            ScopeRef::Vault(vault),
            false,
            vec![GrantRequest::write(bob.group), GrantRequest::read(carol.group)],
        )
        .await;
        assert_eq!(report.status, ShareStatus::Completed);
        assert_eq!(report.progress.settled(), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_requests() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let vault = fx.vault(&alice).await;
        let (engine, _) = engine(&fx, 500);

        let duplicate = vec![GrantRequest::write(alice.group), GrantRequest::read(alice.group)];
        let err = engine
            .create(ScopeRef::Vault(vault), false, duplicate, alice.user.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::Perms(PermsError::Validation(_))));
    }

    #[tokio::test]
    async fn test_user_principal_resolves_to_private_group() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;

        let grants = resolve_requests(
            fx.store.as_ref(),
            &[GrantRequest::write(alice.group), GrantRequest::user(bob.user.id, false)],
        )
        .await
        .unwrap();
        assert_eq!(grants.get(bob.group), Some(Access::read()));
    }

    #[tokio::test]
    async fn test_group_deleted_before_run_is_skipped() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let carol = fx.member("carol").await;
        let vault = fx.vault(&alice).await;
        let folder = fx.folder(&alice, vault, None).await;
        let s1 = fx.secret(&alice, vault, Some(folder), b"one").await;

        let (engine, _) = engine(&fx, 500);
        let process = engine
            .create(
                ScopeRef::Vault(vault),
                true,
                vec![
                    GrantRequest::write(alice.group),
                    GrantRequest::read(bob.group),
                    GrantRequest::read(carol.group),
                ],
                alice.user.id,
            )
            .await
            .unwrap();
        assert!(fx.store.soft_delete_group(carol.group, now_millis()).await.unwrap());

        let report = engine.run(process.id, &alice.proof()).await.unwrap();
        assert_eq!(report.status, ShareStatus::Completed);
        assert_eq!(report.progress.failed, 0);
        assert_eq!(report.progress.settled(), 2);

        assert_eq!(fx.read(&bob, s1).await, b"one");
        let grants = fx.store.secret_grants(&[s1]).await.unwrap();
        assert!(!grants.iter().any(|g| g.group_id == carol.group));
        let graph = fx.store.require_graph(vault).await.unwrap();
        assert_eq!(graph.grant(NodeRef::Folder(folder), bob.group), Some(Access::read()));
    }
}
