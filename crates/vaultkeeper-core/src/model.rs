//! Users, groups and the vault/folder/secret tree.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::ids::{FolderId, GroupId, SecretId, UserId, VaultId};
use crate::material::{LockedKey, SealedBlock, WrappedKey, PUBLIC_KEY_LEN};

/// A human user.
///
/// The public key is used to wrap group private keys for this user. The
/// private key is only stored locked by a passphrase-derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub locked_private_key: LockedKey,
    pub created_at: i64,
}

/// A group of users sharing one key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub public_key: [u8; PUBLIC_KEY_LEN],

    /// A private group has exactly one member and stands for that user.
    pub private: bool,

    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

impl Group {
    /// Whether the group has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Membership of a user in a group.
///
/// Carries the group's private key wrapped for this member's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub wrapped_private_key: WrappedKey,

    /// Administrative flag, orthogonal to content access.
    pub manager: bool,
}

/// Root of a folder tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub name: String,

    /// Set for personal vaults.
    pub owner: Option<UserId>,

    /// Fields every secret in this vault must fill in, matched to the
    /// secret's payload blocks by position.
    pub mandatory_fields: Vec<String>,

    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

impl Vault {
    /// Whether this is a personal (owned) vault.
    pub fn is_personal(&self) -> bool {
        self.owner.is_some()
    }
}

/// A folder inside a vault. Folders form a tree through `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub vault_id: VaultId,
    pub parent_id: Option<FolderId>,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

/// A secret item. Its payload blocks are sealed with a per-secret content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub id: SecretId,
    pub title: String,
    pub vault_id: VaultId,
    pub folder_id: Option<FolderId>,
    pub blocks: Vec<SealedBlock>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Secret {
    /// The node directly containing this secret.
    pub fn parent(&self) -> ScopeRef {
        match self.folder_id {
            Some(folder_id) => ScopeRef::Folder(folder_id),
            None => ScopeRef::Vault(self.vault_id),
        }
    }
}

/// A group's access to a vault or folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Access {
    pub can_write: bool,

    /// Inherited, non-explicit access. Implies `!can_write`.
    pub partial: bool,
}

impl Access {
    /// Explicit write access.
    pub const fn write() -> Self {
        Self {
            can_write: true,
            partial: false,
        }
    }

    /// Explicit read-only access.
    pub const fn read() -> Self {
        Self {
            can_write: false,
            partial: false,
        }
    }

    /// Inherited read-only access, also the state of a soft-revoked grant.
    pub const fn demoted() -> Self {
        Self {
            can_write: false,
            partial: true,
        }
    }

    /// Write access that was granted explicitly.
    pub fn is_full_write(&self) -> bool {
        self.can_write && !self.partial
    }

    /// `partial && !can_write`: the only state the reaper may delete.
    pub fn is_demoted(&self) -> bool {
        self.partial && !self.can_write
    }
}

/// A group's grant on a secret, carrying the wrapped content key.
///
/// Secrets are leaves, so there is no partial flag here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretGrant {
    pub secret_id: SecretId,
    pub group_id: GroupId,
    pub can_write: bool,
    pub wrapped_key: WrappedKey,
}

/// A node that can carry grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRef {
    Vault(VaultId),
    Folder(FolderId),
    Secret(SecretId),
}

impl NodeRef {
    /// Storage discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeRef::Vault(_) => "vault",
            NodeRef::Folder(_) => "folder",
            NodeRef::Secret(_) => "secret",
        }
    }

    /// The raw id, for storage.
    pub fn id_string(&self) -> String {
        match self {
            NodeRef::Vault(id) => id.to_string(),
            NodeRef::Folder(id) => id.to_string(),
            NodeRef::Secret(id) => id.to_string(),
        }
    }

    /// Rebuild from the storage discriminator and id.
    pub fn from_parts(kind: &str, id: &str) -> Result<Self, CoreError> {
        match kind {
            "vault" => Ok(NodeRef::Vault(id.parse()?)),
            "folder" => Ok(NodeRef::Folder(id.parse()?)),
            "secret" => Ok(NodeRef::Secret(id.parse()?)),
            other => Err(CoreError::UnknownVariant {
                kind: "node kind",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id_string())
    }
}

/// A container node: the scope of a permission change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeRef {
    Vault(VaultId),
    Folder(FolderId),
}

impl ScopeRef {
    /// Storage discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            ScopeRef::Vault(_) => "vault",
            ScopeRef::Folder(_) => "folder",
        }
    }

    /// Rebuild from the storage discriminator and id.
    pub fn from_parts(kind: &str, id: &str) -> Result<Self, CoreError> {
        match NodeRef::from_parts(kind, id)? {
            NodeRef::Vault(id) => Ok(ScopeRef::Vault(id)),
            NodeRef::Folder(id) => Ok(ScopeRef::Folder(id)),
            NodeRef::Secret(_) => Err(CoreError::UnknownVariant {
                kind: "scope kind",
                value: kind.to_string(),
            }),
        }
    }
}

impl From<ScopeRef> for NodeRef {
    fn from(scope: ScopeRef) -> Self {
        match scope {
            ScopeRef::Vault(id) => NodeRef::Vault(id),
            ScopeRef::Folder(id) => NodeRef::Folder(id),
        }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        NodeRef::from(*self).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_states() {
        assert!(Access::write().is_full_write());
        assert!(!Access::read().is_full_write());
        assert!(Access::demoted().is_demoted());
        assert!(!Access::read().is_demoted());
        assert!(!Access::demoted().can_write);
    }

    #[test]
    fn test_node_ref_parts_roundtrip() {
        let node = NodeRef::Folder(FolderId::new());
        let parsed = NodeRef::from_parts(node.kind(), &node.id_string()).unwrap();
        assert_eq!(node, parsed);
    }

    #[test]
    fn test_scope_ref_rejects_secret() {
        let id = SecretId::new().to_string();
        assert!(ScopeRef::from_parts("secret", &id).is_err());
    }

    #[test]
    fn test_secret_parent() {
        let vault_id = VaultId::new();
        let folder_id = FolderId::new();
        let mut secret = Secret {
            id: SecretId::new(),
            title: "db".into(),
            vault_id,
            folder_id: None,
            blocks: vec![],
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        };
        assert_eq!(secret.parent(), ScopeRef::Vault(vault_id));

        secret.folder_id = Some(folder_id);
        assert_eq!(secret.parent(), ScopeRef::Folder(folder_id));
    }
}
