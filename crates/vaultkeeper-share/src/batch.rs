//! Pure planning for share batches.
//!
//! Nothing here touches the store or key material; the engine feeds the
//! plans into a [`BatchCommit`].

use std::collections::{BTreeMap, BTreeSet};

use vaultkeeper_core::{
    AuditChange, AuditDiff, GroupId, ItemStatus, ItemTarget, NodeRef, ScopeRef, SecretGrant,
    ShareItem,
};
use vaultkeeper_perms::{AccessGraph, PermsError};
use vaultkeeper_store::{BatchCommit, ItemOutcome};

/// Progress accumulated over the batches of one run.
///
/// Passed into and returned from each batch step instead of living in
/// shared state, so a resumed run simply starts from a fresh value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub batches: u32,
    pub done: u64,
    pub failed: u64,
}

impl BatchProgress {
    /// Fold one committed batch into the progress.
    pub fn record(self, batch: &BatchCommit) -> Self {
        let (done, failed) = batch.counts();
        Self {
            batches: self.batches + 1,
            done: self.done + done,
            failed: self.failed + failed,
        }
    }

    pub fn settled(&self) -> u64 {
        self.done + self.failed
    }
}

pub(crate) fn done(item: &ShareItem, message: Option<&str>) -> ItemOutcome {
    ItemOutcome {
        item_id: item.id,
        status: ItemStatus::Done,
        message: message.map(str::to_owned),
    }
}

pub(crate) fn failed(item: &ShareItem, message: String) -> ItemOutcome {
    ItemOutcome {
        item_id: item.id,
        status: ItemStatus::Failed,
        message: Some(message),
    }
}

/// Items of a scope the initiator may re-key.
///
/// Only nodes on which `groups` hold explicit write are eligible. Folders
/// are only targeted with `cascade`; the scope itself is never a target.
pub fn eligible_targets(
    graph: &AccessGraph,
    scope: ScopeRef,
    cascade: bool,
    groups: &BTreeSet<GroupId>,
) -> Vec<ItemTarget> {
    let mut targets: Vec<ItemTarget> = graph
        .secrets_in(scope, cascade)
        .into_iter()
        .filter(|id| graph.has_full_write(NodeRef::Secret(*id), groups))
        .map(ItemTarget::Secret)
        .collect();

    if cascade {
        targets.extend(
            graph
                .folders_in(scope, true)
                .into_iter()
                .filter(|id| graph.has_full_write(NodeRef::Folder(*id), groups))
                .map(ItemTarget::Folder),
        );
    }
    targets
}

/// Changes to the grants of one secret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretPlan {
    /// Groups that need a freshly wrapped key, with their `can_write`.
    pub add: Vec<(GroupId, bool)>,
    /// `(group, before, after)` for retained groups whose `can_write` changes.
    pub update: Vec<(GroupId, bool, bool)>,
    /// Groups whose wrapped key is deleted, with their former `can_write`.
    pub remove: Vec<(GroupId, bool)>,
}

impl SecretPlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }

    /// Audit payload; secret grants carry no partial flag.
    pub fn audit_diff(&self, mut name_of: impl FnMut(GroupId) -> String) -> AuditDiff {
        let mut change = |group_id: GroupId, can_write: bool| AuditChange {
            group_id,
            group_name: name_of(group_id),
            can_write,
            partial: None,
        };
        AuditDiff {
            add: self.add.iter().map(|(g, w)| change(*g, *w)).collect(),
            remove: self.remove.iter().map(|(g, w)| change(*g, *w)).collect(),
            update: self.update.iter().map(|(g, _, w)| change(*g, *w)).collect(),
        }
    }
}

/// Diff a secret's grant rows against the requested `group -> can_write`
/// targets. The secret ends up with exactly the targets.
///
/// Fails if the targets contain no writer.
pub fn plan_secret_grants(
    current: &[SecretGrant],
    targets: &BTreeMap<GroupId, bool>,
) -> Result<SecretPlan, PermsError> {
    if !targets.values().any(|w| *w) {
        return Err(PermsError::InvariantViolation(
            "secret would be left without a writer".into(),
        ));
    }

    let existing: BTreeMap<GroupId, bool> = current
        .iter()
        .map(|g| (g.group_id, g.can_write))
        .collect();

    let mut plan = SecretPlan::default();
    for (group_id, can_write) in targets {
        match existing.get(group_id) {
            None => plan.add.push((*group_id, *can_write)),
            Some(before) if before != can_write => {
                plan.update.push((*group_id, *before, *can_write))
            }
            Some(_) => {}
        }
    }
    for (group_id, can_write) in &existing {
        if !targets.contains_key(group_id) {
            plan.remove.push((*group_id, *can_write));
        }
    }
    Ok(plan)
}
