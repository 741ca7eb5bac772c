//! Requested grant sets.
//!
//! A [`GrantSet`] is a validated permission request with every principal
//! resolved to a group: users are represented by their private group.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use vaultkeeper_core::{
    validate_grant_requests, Access, GrantRequest, GroupId, Principal, UserId, ValidationError,
};

use crate::error::{PermsError, Result};

/// The target grants of a permission change, keyed by group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSet(BTreeMap<GroupId, Access>);

impl GrantSet {
    /// Validate and resolve a request.
    ///
    /// `private_group` maps a user to their private group. Two principals
    /// resolving to the same group are rejected as duplicates.
    pub fn resolve(
        requests: &[GrantRequest],
        mut private_group: impl FnMut(UserId) -> Option<GroupId>,
    ) -> Result<Self> {
        validate_grant_requests(requests)?;

        let mut grants = BTreeMap::new();
        for request in requests {
            let group_id = match request.principal {
                Principal::Group(id) => id,
                Principal::User(user_id) => private_group(user_id).ok_or_else(|| {
                    PermsError::InvariantViolation(format!("user {user_id} has no private group"))
                })?,
            };
            let access = Access {
                can_write: request.can_write,
                partial: request.partial,
            };
            if grants.insert(group_id, access).is_some() {
                return Err(
                    ValidationError::DuplicatePrincipal(request.principal.to_string()).into(),
                );
            }
        }
        Ok(Self(grants))
    }

    /// Build from already resolved entries, without validation.
    pub fn from_groups(entries: impl IntoIterator<Item = (GroupId, Access)>) -> Self {
        Self(entries.into_iter().collect())
    }

    pub fn get(&self, group_id: GroupId) -> Option<Access> {
        self.0.get(&group_id).copied()
    }

    /// Drop a group from the request.
    pub fn remove(&mut self, group_id: GroupId) -> Option<Access> {
        self.0.remove(&group_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (GroupId, Access)> + '_ {
        self.0.iter().map(|(g, a)| (*g, *a))
    }

    pub fn group_ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries that apply to secrets: `group -> can_write`.
    ///
    /// Partial entries never produce new key material, so they are dropped.
    pub fn secret_targets(&self) -> BTreeMap<GroupId, bool> {
        self.0
            .iter()
            .filter(|(_, a)| !a.partial)
            .map(|(g, a)| (*g, a.can_write))
            .collect()
    }

    /// Whether at least one entry is an explicit writer.
    pub fn has_full_writer(&self) -> bool {
        self.0.values().any(Access::is_full_write)
    }
}
