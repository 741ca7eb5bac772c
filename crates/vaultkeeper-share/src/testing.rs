//! Store-backed fixtures for the engine and worker tests.

use std::sync::Arc;

use vaultkeeper_core::{
    now_millis, Access, Folder, FolderId, Group, GroupId, GroupMembership, NodeRef, Secret,
    SecretGrant, SecretId, User, UserId, Vault, VaultId, WrappedKey,
};
use vaultkeeper_perms::{
    derive_unlock_proof, lock_private_key, open_payload, seal_payload, GrantRow, KdfParams,
    KeyRing, KeyVault, UnlockProof, X25519PublicKey,
};
use vaultkeeper_store::{SqliteStore, Store};

pub(crate) struct Member {
    pub user: User,
    /// The member's private group.
    pub group: GroupId,
    pub group_public: X25519PublicKey,
    passphrase: String,
}

impl Member {
    pub fn proof(&self) -> UnlockProof {
        derive_unlock_proof(
            self.passphrase.as_bytes(),
            &self.user.locked_private_key,
            &KdfParams::fast_insecure(),
        )
        .unwrap()
    }
}

pub(crate) struct Fixture {
    pub store: Arc<SqliteStore>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self {
            store: Arc::new(SqliteStore::open_memory().unwrap()),
        }
    }

    /// A user with their private group.
    pub async fn member(&self, name: &str) -> Member {
        let now = now_millis();
        let passphrase = format!("{name}-passphrase");
        let (user_secret, user_public) = KeyVault::generate_key_pair();
        let (group_secret, group_public) = KeyVault::generate_key_pair();

        let user = User {
            id: UserId::new(),
            name: name.to_string(),
            public_key: user_public.0,
            locked_private_key: lock_private_key(
                &user_secret,
                passphrase.as_bytes(),
                &KdfParams::fast_insecure(),
            )
            .unwrap(),
            created_at: now,
        };
        let group = Group {
            id: GroupId::new(),
            name: name.to_string(),
            public_key: group_public.0,
            private: true,
            created_at: now,
            deleted_at: None,
        };
        let membership = GroupMembership {
            group_id: group.id,
            user_id: user.id,
            wrapped_private_key: KeyVault::wrap_for_user(
                group_secret.to_bytes().as_slice(),
                &user_public,
            )
            .unwrap(),
            manager: true,
        };
        self.store.insert_user(&user, &group, &membership).await.unwrap();

        Member {
            user,
            group: group.id,
            group_public,
            passphrase,
        }
    }

    /// A vault written by `owner`.
    pub async fn vault(&self, owner: &Member) -> VaultId {
        self.vault_with(&[(owner, Access::write())]).await
    }

    pub async fn vault_with(&self, grants: &[(&Member, Access)]) -> VaultId {
        let vault = Vault {
            id: VaultId::new(),
            name: "vault".into(),
            owner: None,
            mandatory_fields: Vec::new(),
            created_at: now_millis(),
            deleted_at: None,
        };
        let rows: Vec<GrantRow> = grants
            .iter()
            .map(|(m, access)| GrantRow {
                node: NodeRef::Vault(vault.id),
                group_id: m.group,
                access: *access,
            })
            .collect();
        self.store.insert_vault(&vault, &rows).await.unwrap();
        vault.id
    }

    /// A folder written by `owner`, who must already hold the ancestors.
    pub async fn folder(
        &self,
        owner: &Member,
        vault_id: VaultId,
        parent: Option<FolderId>,
    ) -> FolderId {
        let now = now_millis();
        let folder = Folder {
            id: FolderId::new(),
            name: "folder".into(),
            vault_id,
            parent_id: parent,
            created_at: now,
            deleted_at: None,
        };
        let row = GrantRow {
            node: NodeRef::Folder(folder.id),
            group_id: owner.group,
            access: Access::write(),
        };
        self.store.insert_folder(&folder, &[row], &[]).await.unwrap();
        folder.id
    }

    /// A secret sealed and granted to `owner` only.
    pub async fn secret(
        &self,
        owner: &Member,
        vault_id: VaultId,
        folder_id: Option<FolderId>,
        plaintext: &[u8],
    ) -> SecretId {
        let content_key = KeyVault::generate_content_key();
        let blocks = seal_payload(&content_key, &[plaintext]).unwrap();
        let id = SecretId::new();
        let grant = SecretGrant {
            secret_id: id,
            group_id: owner.group,
            can_write: true,
            wrapped_key: KeyVault::wrap_for_group(content_key.as_bytes(), &owner.group_public)
                .unwrap(),
        };
        self.insert_secret(id, vault_id, folder_id, blocks, grant).await;
        id
    }

    /// A secret whose only key is garbage, writable by `owner`.
    pub async fn broken_secret(&self, owner: &Member, vault_id: VaultId) -> SecretId {
        let id = SecretId::new();
        let grant = SecretGrant {
            secret_id: id,
            group_id: owner.group,
            can_write: true,
            wrapped_key: WrappedKey {
                ciphertext: vec![7; 48],
                ephemeral_public: owner.group_public.0,
                nonce: [0; 12],
            },
        };
        self.insert_secret(id, vault_id, None, Vec::new(), grant).await;
        id
    }

    async fn insert_secret(
        &self,
        id: SecretId,
        vault_id: VaultId,
        folder_id: Option<FolderId>,
        blocks: Vec<vaultkeeper_core::SealedBlock>,
        grant: SecretGrant,
    ) {
        let now = now_millis();
        let secret = Secret {
            id,
            title: "secret".into(),
            vault_id,
            folder_id,
            blocks,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.store.insert_secret(&secret, &[grant], &[]).await.unwrap();
    }

    /// Decrypt a secret as `member`.
    pub async fn read(&self, member: &Member, id: SecretId) -> Vec<u8> {
        let secret = self.store.get_secret(id).await.unwrap().unwrap();
        let grants = self.store.secret_grants(&[id]).await.unwrap();
        let memberships = self.store.memberships_for_user(member.user.id).await.unwrap();
        let mut ring = KeyRing::unlock(&member.user, &member.proof(), memberships).unwrap();
        let content_key = ring.recover_content_key(&grants).unwrap();
        open_payload(&content_key, &secret.blocks)
            .unwrap()
            .iter()
            .flat_map(|b| b.as_bytes().to_vec())
            .collect()
    }
}

