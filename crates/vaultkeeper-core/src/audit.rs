//! Audit payloads for permission changes.
//!
//! Group names are captured when the diff is built; a group may later be
//! renamed or deleted and the audit trail must still read correctly.

use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, UserId};
use crate::model::NodeRef;

/// One group's grant in an audit diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditChange {
    pub group_id: GroupId,
    pub group_name: String,
    pub can_write: bool,
    /// Absent for secret grants.
    pub partial: Option<bool>,
}

/// The `{add, remove, update}` payload of one permission change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDiff {
    pub add: Vec<AuditChange>,
    pub remove: Vec<AuditChange>,
    pub update: Vec<AuditChange>,
}

impl AuditDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.update.is_empty()
    }
}

/// A recorded permission change on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: UserId,
    pub target: NodeRef,
    pub diff: AuditDiff,
    pub at: i64,
}
