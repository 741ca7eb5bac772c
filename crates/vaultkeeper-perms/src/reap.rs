//! Planning the collection of unjustified partial grants.
//!
//! A demoted row (`partial && !can_write`) on a folder is justified for its
//! group while some secret in the folder's subtree is still wrapped for the
//! group, or some folder strictly below it still carries a non-demoted grant
//! for the group. A vault row is justified the same way over the whole vault.
//! Every other demoted row is garbage.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use vaultkeeper_core::{FolderId, GroupId, NodeRef, VaultId};

use crate::graph::AccessGraph;

/// Demoted rows of one vault that can be deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapPlan {
    pub vault_id: Option<VaultId>,
    pub folder_rows: Vec<(FolderId, GroupId)>,
    pub vault_rows: Vec<GroupId>,
}

impl ReapPlan {
    pub fn is_empty(&self) -> bool {
        self.folder_rows.is_empty() && self.vault_rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.folder_rows.len() + self.vault_rows.len()
    }

    /// Mirror the deletions into an in-memory graph.
    pub fn apply(&self, graph: &mut AccessGraph) {
        for (folder_id, group_id) in &self.folder_rows {
            graph.remove_grant(NodeRef::Folder(*folder_id), *group_id);
        }
        let vault = NodeRef::Vault(graph.vault_id());
        for group_id in &self.vault_rows {
            graph.remove_grant(vault, *group_id);
        }
    }
}

/// Find the unjustified demoted rows of a vault.
///
/// With `groups`, only rows of those groups are considered. Folders that
/// cannot be reached from the vault root are left alone.
pub fn plan_cleanup(graph: &AccessGraph, groups: Option<&BTreeSet<GroupId>>) -> ReapPlan {
    let in_scope = |g: &GroupId| groups.map_or(true, |set| set.contains(g));

    // Post-order over the reachable tree: each folder after its children.
    let order = graph.subtree(None);
    let mut below: HashMap<FolderId, BTreeSet<GroupId>> = HashMap::with_capacity(order.len());

    let mut plan = ReapPlan {
        vault_id: Some(graph.vault_id()),
        ..ReapPlan::default()
    };

    for &folder_id in order.iter().rev() {
        let needed = needed_below(graph, Some(folder_id), &below);

        if let Some(grants) = graph.grants(NodeRef::Folder(folder_id)) {
            for (group_id, access) in grants {
                if access.is_demoted() && in_scope(group_id) && !needed.contains(group_id) {
                    plan.folder_rows.push((folder_id, *group_id));
                }
            }
        }

        below.insert(folder_id, needed);
    }

    let needed = needed_below(graph, None, &below);
    if let Some(grants) = graph.grants(NodeRef::Vault(graph.vault_id())) {
        for (group_id, access) in grants {
            if access.is_demoted() && in_scope(group_id) && !needed.contains(group_id) {
                plan.vault_rows.push(*group_id);
            }
        }
    }

    plan
}

/// Groups that justify a demoted row on `container`.
///
/// `below` must already hold the entry of every child folder.
fn needed_below(
    graph: &AccessGraph,
    container: Option<FolderId>,
    below: &HashMap<FolderId, BTreeSet<GroupId>>,
) -> BTreeSet<GroupId> {
    let mut needed = BTreeSet::new();

    for secret_id in graph.secrets_directly_in(container) {
        if let Some(grants) = graph.grants(NodeRef::Secret(secret_id)) {
            needed.extend(grants.keys().copied());
        }
    }

    for child in graph.children(container) {
        if let Some(child_needed) = below.get(&child) {
            needed.extend(child_needed.iter().copied());
        }
        if let Some(grants) = graph.grants(NodeRef::Folder(child)) {
            needed.extend(
                grants
                    .iter()
                    .filter(|(_, a)| !a.is_demoted())
                    .map(|(g, _)| *g),
            );
        }
    }

    needed
}
