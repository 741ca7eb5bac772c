//! Strong identifier types.
//!
//! Every entity is addressed by a random UUIDv4 wrapped in its own newtype,
//! so a `FolderId` can never be passed where a `SecretId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the underlying UUID.
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| CoreError::InvalidId(format!("{}: {e}", stringify!($name))))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Identifier of a human user.
    UserId
);
define_id!(
    /// Identifier of a group (including private per-user groups).
    GroupId
);
define_id!(
    /// Identifier of a vault, the root of a folder tree.
    VaultId
);
define_id!(
    /// Identifier of a folder inside a vault.
    FolderId
);
define_id!(
    /// Identifier of a secret (password item).
    SecretId
);
define_id!(
    /// Identifier of a bulk share process.
    ShareProcessId
);
define_id!(
    /// Identifier of a single unit of work inside a share process.
    ShareItemId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_string_roundtrip() {
        let id = FolderId::new();
        let parsed: FolderId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_debug_names_type() {
        let id = GroupId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("GroupId("));
    }

    #[test]
    fn test_invalid_id_rejected() {
        let err = "not-a-uuid".parse::<SecretId>().unwrap_err();
        assert!(err.to_string().contains("SecretId"));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(VaultId::new(), VaultId::new());
    }
}
