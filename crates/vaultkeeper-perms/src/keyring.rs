//! The unlocked key set of one user for the span of one operation.
//!
//! A [`KeyRing`] is created by unlocking a user's private key once. Group
//! private keys are unwrapped lazily on first use and cached. Everything is
//! erased when the ring is dropped.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use vaultkeeper_core::{GroupId, GroupMembership, SecretGrant, User, UserId};

use crate::crypto::{ContentKey, X25519PublicKey, X25519StaticSecret};
use crate::error::{PermsError, Result};
use crate::passphrase::{unlock_private_key, UnlockProof};
use crate::wrap::KeyVault;

pub struct KeyRing {
    user_id: UserId,
    user_key: X25519StaticSecret,
    memberships: HashMap<GroupId, GroupMembership>,
    group_keys: HashMap<GroupId, X25519StaticSecret>,
}

impl KeyRing {
    /// Unlock a user's private key and load their memberships.
    ///
    /// Memberships belonging to other users are ignored.
    pub fn unlock(
        user: &User,
        proof: &UnlockProof,
        memberships: Vec<GroupMembership>,
    ) -> Result<Self> {
        let user_key = unlock_private_key(&user.locked_private_key, proof)?;
        if user_key.public_key() != X25519PublicKey::from_bytes(user.public_key) {
            return Err(PermsError::DecryptionFailed(format!(
                "unlocked key does not match public key of user {}",
                user.id
            )));
        }

        let memberships = memberships
            .into_iter()
            .filter(|m| m.user_id == user.id)
            .map(|m| (m.group_id, m))
            .collect();

        Ok(Self {
            user_id: user.id,
            user_key,
            memberships,
            group_keys: HashMap::new(),
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The user's own private key.
    pub fn user_key(&self) -> &X25519StaticSecret {
        &self.user_key
    }

    /// Groups the user belongs to.
    pub fn group_ids(&self) -> BTreeSet<GroupId> {
        self.memberships.keys().copied().collect()
    }

    pub fn is_member(&self, group_id: GroupId) -> bool {
        self.memberships.contains_key(&group_id)
    }

    pub fn membership(&self, group_id: GroupId) -> Option<&GroupMembership> {
        self.memberships.get(&group_id)
    }

    /// The private key of a group the user belongs to.
    pub fn group_key(&mut self, group_id: GroupId) -> Result<&X25519StaticSecret> {
        if !self.group_keys.contains_key(&group_id) {
            let membership = self
                .memberships
                .get(&group_id)
                .ok_or(PermsError::NotAMember(group_id))?;
            let key = KeyVault::unwrap_group_key(&membership.wrapped_private_key, &self.user_key)?;
            self.group_keys.insert(group_id, key);
        }
        self.group_keys
            .get(&group_id)
            .ok_or(PermsError::NotAMember(group_id))
    }

    /// Recover a secret's content key from any grant held by one of the
    /// user's groups.
    ///
    /// Grants are tried in order; a grant that fails to unwrap is skipped in
    /// favour of the next one, and the last failure is reported if none
    /// succeeds.
    pub fn recover_content_key(&mut self, grants: &[SecretGrant]) -> Result<ContentKey> {
        let mut last_err = None;
        for grant in grants {
            if !self.is_member(grant.group_id) {
                continue;
            }
            let attempt = self
                .group_key(grant.group_id)
                .and_then(|key| KeyVault::unwrap_content_key(&grant.wrapped_key, key));
            match attempt {
                Ok(content_key) => return Ok(content_key),
                Err(e) => {
                    tracing::warn!(
                        secret_id = %grant.secret_id,
                        group_id = %grant.group_id,
                        error = %e,
                        "failed to unwrap content key"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            PermsError::DecryptionFailed("no grant reachable through the user's groups".into())
        }))
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("user_id", &self.user_id)
            .field("groups", &self.memberships.len())
            .field("unwrapped", &self.group_keys.len())
            .finish()
    }
}

impl Drop for KeyRing {
    fn drop(&mut self) {
        // Each StaticSecret zeroizes itself as it is dropped.
        self.group_keys.clear();
        tracing::trace!(user_id = %self.user_id, "key ring erased");
    }
}
