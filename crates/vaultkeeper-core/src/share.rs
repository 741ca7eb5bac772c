//! Share processes: durable records of bulk permission changes.
//!
//! A share process is created synchronously when a permission change is
//! requested and executed asynchronously by the share engine. Its items are
//! the engine's work queue and resume point.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::ids::{FolderId, GroupId, SecretId, ShareItemId, ShareProcessId, UserId, VaultId};
use crate::model::ScopeRef;

/// Lifecycle of a share process.
///
/// ```text
/// Pending ──► Running ──► Completed
///    │            └─────► Failed
///    └──► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ShareStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareStatus::Pending => "pending",
            ShareStatus::Running => "running",
            ShareStatus::Completed => "completed",
            ShareStatus::Failed => "failed",
            ShareStatus::Canceled => "canceled",
        }
    }

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShareStatus::Completed | ShareStatus::Failed | ShareStatus::Canceled
        )
    }
}

impl FromStr for ShareStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ShareStatus::Pending),
            "running" => Ok(ShareStatus::Running),
            "completed" => Ok(ShareStatus::Completed),
            "failed" => Ok(ShareStatus::Failed),
            "canceled" => Ok(ShareStatus::Canceled),
            other => Err(CoreError::UnknownVariant {
                kind: "share status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ShareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a grant request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Principal {
    Group(GroupId),
    /// Resolved to the user's private group.
    User(UserId),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Group(id) => write!(f, "group {id}"),
            Principal::User(id) => write!(f, "user {id}"),
        }
    }
}

/// One requested grant in a permission change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    pub principal: Principal,
    pub can_write: bool,
    pub partial: bool,
}

impl GrantRequest {
    /// Explicit write for a group.
    pub fn write(group_id: GroupId) -> Self {
        Self {
            principal: Principal::Group(group_id),
            can_write: true,
            partial: false,
        }
    }

    /// Explicit read-only for a group.
    pub fn read(group_id: GroupId) -> Self {
        Self {
            principal: Principal::Group(group_id),
            can_write: false,
            partial: false,
        }
    }

    /// Inherited read-only for a group.
    pub fn partial(group_id: GroupId) -> Self {
        Self {
            principal: Principal::Group(group_id),
            can_write: false,
            partial: true,
        }
    }

    /// Explicit access for a single user, via their private group.
    pub fn user(user_id: UserId, can_write: bool) -> Self {
        Self {
            principal: Principal::User(user_id),
            can_write,
            partial: false,
        }
    }
}

/// Kind of a share item target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Secret,
    Folder,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Secret => "secret",
            ItemKind::Folder => "folder",
        }
    }
}

impl FromStr for ItemKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "secret" => Ok(ItemKind::Secret),
            "folder" => Ok(ItemKind::Folder),
            other => Err(CoreError::UnknownVariant {
                kind: "item kind",
                value: other.to_string(),
            }),
        }
    }
}

/// The node a share item re-keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemTarget {
    Secret(SecretId),
    Folder(FolderId),
}

impl ItemTarget {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemTarget::Secret(_) => ItemKind::Secret,
            ItemTarget::Folder(_) => ItemKind::Folder,
        }
    }

    pub fn id_string(&self) -> String {
        match self {
            ItemTarget::Secret(id) => id.to_string(),
            ItemTarget::Folder(id) => id.to_string(),
        }
    }

    pub fn from_parts(kind: ItemKind, id: &str) -> Result<Self, CoreError> {
        match kind {
            ItemKind::Secret => Ok(ItemTarget::Secret(id.parse()?)),
            ItemKind::Folder => Ok(ItemTarget::Folder(id.parse()?)),
        }
    }
}

/// Outcome of a single share item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    Done,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "done" => Ok(ItemStatus::Done),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(CoreError::UnknownVariant {
                kind: "item status",
                value: other.to_string(),
            }),
        }
    }
}

/// A durable bulk permission change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareProcess {
    pub id: ShareProcessId,
    pub scope: ScopeRef,

    /// Vault containing the scope; the reaper runs over it on completion.
    pub vault_id: VaultId,

    /// Apply to the whole subtree rather than direct children only.
    pub cascade: bool,

    pub requested: Vec<GrantRequest>,
    pub status: ShareStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub failed_items: u64,
    pub message: Option<String>,
    pub initiator: UserId,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl ShareProcess {
    /// A new process in the `Pending` state.
    pub fn new(
        scope: ScopeRef,
        vault_id: VaultId,
        cascade: bool,
        requested: Vec<GrantRequest>,
        initiator: UserId,
        now: i64,
    ) -> Self {
        Self {
            id: ShareProcessId::new(),
            scope,
            vault_id,
            cascade,
            requested,
            status: ShareStatus::Pending,
            total_items: 0,
            processed_items: 0,
            failed_items: 0,
            message: None,
            initiator,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Items that have reached an outcome.
    pub fn settled_items(&self) -> u64 {
        self.processed_items + self.failed_items
    }
}

/// One unit of work in a share process, unique per (process, kind, target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareItem {
    pub id: ShareItemId,
    pub process_id: ShareProcessId,
    pub target: ItemTarget,
    pub status: ItemStatus,
    pub message: Option<String>,
}
