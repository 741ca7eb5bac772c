//! Permission propagation.
//!
//! Given a requested grant set for a vault or folder, compute what changes
//! on that node and which ancestor rows must exist so every grant stays
//! reachable from the vault root. Nothing here persists; the result is a
//! [`GrantDiff`] the caller applies in one transaction.
//!
//! Grants are never hard-deleted by a permission change. A group dropped
//! from the request is demoted to `{can_write: false, partial: true}` and
//! left for the reaper to collect once nothing below still needs it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use vaultkeeper_core::{Access, AuditChange, AuditDiff, GroupId, NodeRef, ScopeRef};

use crate::error::{PermsError, Result};
use crate::grant::GrantSet;
use crate::graph::{AccessGraph, Grants};

/// One grant row changing from `before` to `after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantUpdate {
    pub group_id: GroupId,
    pub before: Access,
    pub after: Access,
}

/// A grant row to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRow {
    pub node: NodeRef,
    pub group_id: GroupId,
    pub access: Access,
}

/// Changes to the grants of a single vault or folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePlan {
    /// New rows.
    pub add: Vec<(GroupId, Access)>,
    /// Existing rows updated in place.
    pub keep: Vec<GrantUpdate>,
    /// Existing rows demoted because the group was dropped.
    pub remove: Vec<GrantUpdate>,
}

impl NodePlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.keep.is_empty() && self.remove.is_empty()
    }

    /// The node's grants after the plan is applied.
    pub fn result(&self, current: &Grants) -> Grants {
        let mut out = current.clone();
        for (group_id, access) in &self.add {
            out.insert(*group_id, *access);
        }
        for update in self.keep.iter().chain(&self.remove) {
            out.insert(update.group_id, update.after);
        }
        out
    }

    /// Rows to upsert on `node`.
    pub fn rows(&self, node: NodeRef) -> Vec<GrantRow> {
        self.add
            .iter()
            .map(|(group_id, access)| GrantRow {
                node,
                group_id: *group_id,
                access: *access,
            })
            .chain(self.keep.iter().chain(&self.remove).map(|u| GrantRow {
                node,
                group_id: u.group_id,
                access: u.after,
            }))
            .collect()
    }

    /// Audit payload, with group names resolved now.
    pub fn audit_diff(&self, mut name_of: impl FnMut(GroupId) -> String) -> AuditDiff {
        let mut change = |group_id: GroupId, access: Access| AuditChange {
            group_id,
            group_name: name_of(group_id),
            can_write: access.can_write,
            partial: Some(access.partial),
        };
        AuditDiff {
            add: self.add.iter().map(|(g, a)| change(*g, *a)).collect(),
            remove: self.remove.iter().map(|u| change(u.group_id, u.after)).collect(),
            update: self.keep.iter().map(|u| change(u.group_id, u.after)).collect(),
        }
    }

    /// Groups demoted by this plan.
    pub fn demoted_groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.remove.iter().map(|u| u.group_id)
    }
}

/// Diff a node's current grants against a requested grant set.
///
/// - A requested group without a row gets one, unless the request is
///   partial. Without `full_write` the new row is forced to the demoted
///   state.
/// - A requested group with a row is updated in place. Without `full_write`
///   the partial flag can only be set, never cleared. `partial` always
///   forces `can_write` off.
/// - A current group absent from the request is demoted, unless it is
///   already demoted.
pub fn plan_node_grants(current: &Grants, requested: &GrantSet, full_write: bool) -> NodePlan {
    let mut plan = NodePlan::default();

    for (group_id, want) in requested.iter() {
        match current.get(&group_id) {
            Some(&before) => {
                let partial = if full_write {
                    want.partial
                } else {
                    before.partial || want.partial
                };
                let after = Access {
                    can_write: want.can_write && !partial,
                    partial,
                };
                if after != before {
                    plan.keep.push(GrantUpdate {
                        group_id,
                        before,
                        after,
                    });
                }
            }
            None if want.partial => {}
            None => {
                let access = if full_write { want } else { Access::demoted() };
                plan.add.push((group_id, access));
            }
        }
    }

    for (&group_id, &before) in current {
        if requested.get(group_id).is_none() && !before.is_demoted() {
            plan.remove.push(GrantUpdate {
                group_id,
                before,
                after: Access::demoted(),
            });
        }
    }

    plan
}

/// Ancestor rows missing for `groups` above `node`, as demoted rows.
///
/// Existing ancestor rows are never touched, whatever their state.
pub fn missing_ancestor_rows(
    graph: &AccessGraph,
    node: NodeRef,
    groups: impl IntoIterator<Item = GroupId>,
) -> Vec<GrantRow> {
    let ancestors = graph.ancestors(node);
    let mut out = Vec::new();
    for group_id in groups {
        for ancestor in &ancestors {
            let ancestor = NodeRef::from(*ancestor);
            if graph.grant(ancestor, group_id).is_none() {
                out.push(GrantRow {
                    node: ancestor,
                    group_id,
                    access: Access::demoted(),
                });
            }
        }
    }
    out
}

/// The complete effect of a permission change on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDiff {
    pub scope: ScopeRef,
    pub plan: NodePlan,

    /// Demoted rows to insert above the scope where a group has none.
    pub ancestor_rows: Vec<GrantRow>,
}

impl GrantDiff {
    pub fn is_noop(&self) -> bool {
        self.plan.is_empty() && self.ancestor_rows.is_empty()
    }

    /// Rows to upsert on the scope node.
    pub fn scope_rows(&self) -> Vec<GrantRow> {
        self.plan.rows(self.scope.into())
    }

    /// Groups demoted on the scope; their ancestors are up for cleanup.
    pub fn revoked_groups(&self) -> BTreeSet<GroupId> {
        self.plan.demoted_groups().collect()
    }

    /// Mirror the diff into an in-memory graph.
    pub fn apply(&self, graph: &mut AccessGraph) {
        for row in self.scope_rows() {
            graph.set_grant(row.node, row.group_id, row.access);
        }
        for row in &self.ancestor_rows {
            if graph.grant(row.node, row.group_id).is_none() {
                graph.set_grant(row.node, row.group_id, row.access);
            }
        }
    }

    pub fn audit_diff(&self, name_of: impl FnMut(GroupId) -> String) -> AuditDiff {
        self.plan.audit_diff(name_of)
    }
}

/// Computes grant diffs against a vault snapshot.
#[derive(Debug)]
pub struct PermissionPropagator<'a> {
    graph: &'a AccessGraph,
}

impl<'a> PermissionPropagator<'a> {
    pub fn new(graph: &'a AccessGraph) -> Self {
        Self { graph }
    }

    /// Compute the diff for setting `requested` on `scope`.
    ///
    /// `caller_groups` are the caller's current memberships. The caller
    /// needs write access on the scope; whether that access is explicit
    /// decides if partial flags may be cleared.
    pub fn diff(
        &self,
        scope: ScopeRef,
        requested: &GrantSet,
        caller_groups: &BTreeSet<GroupId>,
    ) -> Result<GrantDiff> {
        let node = NodeRef::from(scope);
        let current = self
            .graph
            .grants(node)
            .ok_or(PermsError::NodeNotFound(node))?;

        if !self.graph.has_write(node, caller_groups) {
            return Err(PermsError::AuthorizationInsufficient(format!(
                "caller cannot write {node}"
            )));
        }
        let full_write = self.graph.has_full_write(node, caller_groups);

        if let Some(owner) = self.graph.owner() {
            let foreign: Vec<GroupId> = requested
                .group_ids()
                .filter(|g| !current.contains_key(g))
                .collect();
            if !foreign.is_empty() {
                return Err(PermsError::InvariantViolation(format!(
                    "personal vault of user {owner} cannot be shared"
                )));
            }
        }

        let plan = plan_node_grants(current, requested, full_write);

        let result = plan.result(current);
        if !result.values().any(|a| a.can_write) {
            return Err(PermsError::InvariantViolation(format!(
                "{node} would be left without a writer"
            )));
        }

        let present: BTreeMap<GroupId, Access> = result
            .into_iter()
            .filter(|(_, a)| !a.is_demoted())
            .collect();
        let ancestor_rows = missing_ancestor_rows(self.graph, node, present.keys().copied());

        Ok(GrantDiff {
            scope,
            plan,
            ancestor_rows,
        })
    }
}
