//! Tree invariant checks over an access graph snapshot.

use std::fmt;

use vaultkeeper_core::{GroupId, NodeRef};
use vaultkeeper_perms::{AccessGraph, Grants};

/// A broken tree invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A node with explicit grants has no writer.
    NoWriter(NodeRef),
    /// A partial row carries write access.
    PartialWithWrite { node: NodeRef, group_id: GroupId },
    /// A group holds a secret's key but an ancestor has no row for it.
    BrokenAncestor {
        secret: NodeRef,
        group_id: GroupId,
        ancestor: NodeRef,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::NoWriter(node) => write!(f, "{node} has explicit grants but no writer"),
            Violation::PartialWithWrite { node, group_id } => {
                write!(f, "partial grant of {group_id} on {node} can write")
            }
            Violation::BrokenAncestor {
                secret,
                group_id,
                ancestor,
            } => write!(f, "{group_id} holds {secret} but has no row on {ancestor}"),
        }
    }
}

/// Every invariant violation in the graph.
pub fn violations(graph: &AccessGraph) -> Vec<Violation> {
    let mut out = Vec::new();

    let vault = NodeRef::Vault(graph.vault_id());
    let mut containers: Vec<(NodeRef, &Grants)> =
        graph.grants(vault).map(|g| (vault, g)).into_iter().collect();
    containers.extend(graph.folders().map(|(id, g)| (NodeRef::Folder(id), g)));

    for (node, grants) in containers {
        check_writer(node, grants, &mut out);
        for (group_id, access) in grants {
            if access.partial && access.can_write {
                out.push(Violation::PartialWithWrite {
                    node,
                    group_id: *group_id,
                });
            }
        }
    }

    for (id, grants) in graph.secrets() {
        let secret = NodeRef::Secret(id);
        check_writer(secret, grants, &mut out);
        let ancestors = graph.ancestors(secret);
        for group_id in grants.keys() {
            for ancestor in &ancestors {
                let ancestor = NodeRef::from(*ancestor);
                if graph.grant(ancestor, *group_id).is_none() {
                    out.push(Violation::BrokenAncestor {
                        secret,
                        group_id: *group_id,
                        ancestor,
                    });
                }
            }
        }
    }
    out
}

fn check_writer(node: NodeRef, grants: &Grants, out: &mut Vec<Violation>) {
    let explicit = grants.values().any(|a| !a.partial);
    if explicit && !grants.values().any(|a| a.can_write) {
        out.push(Violation::NoWriter(node));
    }
}
