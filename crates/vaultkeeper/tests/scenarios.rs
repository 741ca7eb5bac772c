//! End-to-end scenarios through the Keeper API.

use anyhow::{Context, Result};

use vaultkeeper::core::{ItemStatus, Secret, SecretGrant, WrappedKey};
use vaultkeeper::{
    ErrorKind, GrantRequest, KeeperConfig, NodeRef, ScopeRef, ShareStatus, Store,
};
use vaultkeeper_testkit::{TestKeeper, TestUser};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write(user: &TestUser) -> GrantRequest {
    GrantRequest::write(user.private_group)
}

fn read(user: &TestUser) -> GrantRequest {
    GrantRequest::read(user.private_group)
}

#[tokio::test]
async fn secret_shared_directly_under_vault_opens_partial_vault_row() -> Result<()> {
    init_tracing();
    let keeper = TestKeeper::new();
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;

    // Alice's group writes the vault and nothing else carries grants.
    let vault = keeper.create_vault(alice.id(), "infra", false).await?;
    let secret = keeper
        .create_secret(alice.id(), vault.id, None, "root", &[b"hunter2"])
        .await?;
    let vault_node = NodeRef::Vault(vault.id);
    assert_eq!(keeper.grant(vault.id, vault_node, bob.private_group).await, None);

    let share = keeper
        .share_secret(alice.id(), &alice.passphrase, secret.id, vec![write(&alice), read(&bob)])
        .await?;
    assert_eq!(share.plan.add, vec![(bob.private_group, false)]);
    assert_eq!(share.ancestor_rows.len(), 1);

    // The secret grant is immediate; the vault only gains a partial row.
    let grants = keeper.store().secret_grants(&[secret.id]).await?;
    let bobs = grants
        .iter()
        .find(|g| g.group_id == bob.private_group)
        .context("secret grant for bob")?;
    assert!(!bobs.can_write);
    assert_eq!(
        keeper.grant(vault.id, vault_node, bob.private_group).await,
        Some(vaultkeeper::Access::demoted())
    );
    assert_eq!(keeper.read_text(&bob, secret.id).await, "hunter2");
    assert!(!keeper.has_write(bob.id(), vault_node).await?);
    assert!(keeper.violations(vault.id).await.is_empty());
    assert_eq!(keeper.audit_entries(NodeRef::Secret(secret.id)).await?.len(), 1);

    // Bob reads but cannot pass the secret on.
    let err = keeper
        .share_secret(bob.id(), &bob.passphrase, secret.id, vec![write(&bob)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationInsufficient);

    // Taking the key back lets the reaper collect the partial vault row.
    let share = keeper
        .share_secret(alice.id(), &alice.passphrase, secret.id, vec![write(&alice)])
        .await?;
    assert_eq!(share.plan.remove, vec![(bob.private_group, false)]);
    keeper.settle().await;
    assert!(keeper.read_secret(bob.id(), &bob.passphrase, secret.id).await.is_err());
    assert_eq!(keeper.grant(vault.id, vault_node, bob.private_group).await, None);
    assert!(keeper.violations(vault.id).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn secret_in_personal_vault_cannot_be_shared() -> Result<()> {
    init_tracing();
    let keeper = TestKeeper::new();
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;

    let vault = keeper.create_vault(alice.id(), "mine", true).await?;
    let secret = keeper
        .create_secret(alice.id(), vault.id, None, "pin", &[b"1234"])
        .await?;
    let err = keeper
        .share_secret(alice.id(), &alice.passphrase, secret.id, vec![write(&alice), read(&bob)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    assert_eq!(keeper.store().secret_grants(&[secret.id]).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn vault_mandatory_fields_gate_new_secrets() -> Result<()> {
    init_tracing();
    let keeper = TestKeeper::new();
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;
    let vault = keeper.create_vault(alice.id(), "logins", false).await?;

    let err = keeper
        .set_mandatory_fields(bob.id(), vault.id, vec!["username".into()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationInsufficient);

    let updated = keeper
        .set_mandatory_fields(alice.id(), vault.id, vec!["username".into(), "password".into()])
        .await?;
    assert_eq!(updated.mandatory_fields, ["username", "password"]);

    for blocks in [vec![&b"root"[..]], vec![&b""[..], &b"pw"[..]]] {
        let err = keeper
            .create_secret(alice.id(), vault.id, None, "db", blocks.as_slice())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{err}");
    }
    let secret = keeper
        .create_secret(alice.id(), vault.id, None, "db", &[&b"root"[..], &b"pw"[..]])
        .await?;
    let blocks = keeper.read_secret(alice.id(), &alice.passphrase, secret.id).await?;
    assert_eq!(blocks[1].as_bytes(), b"pw");
    Ok(())
}

#[tokio::test]
async fn folder_shared_below_vault_opens_partial_vault_row() -> Result<()> {
    init_tracing();
    let keeper = TestKeeper::new();
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;

    let vault = keeper.create_vault(alice.id(), "infra", false).await?;
    let folder = keeper.create_folder(alice.id(), vault.id, None, "db").await?;
    let secret = keeper
        .create_secret(alice.id(), vault.id, Some(folder.id), "root", &[b"hunter2"])
        .await?;
    assert!(keeper.read_secret(bob.id(), &bob.passphrase, secret.id).await.is_err());

    keeper
        .update_permissions(
            alice.id(),
            &alice.passphrase,
            ScopeRef::Folder(folder.id),
            vec![write(&alice), read(&bob)],
            true,
        )
        .await?;

    // Bob had nothing on the vault: he gets a demoted row only.
    let vault_row = keeper.grant(vault.id, NodeRef::Vault(vault.id), bob.private_group).await;
    assert_eq!(vault_row, Some(vaultkeeper::Access::demoted()));
    assert!(!keeper.has_write(bob.id(), NodeRef::Vault(vault.id)).await?);

    keeper.settle().await;
    assert_eq!(keeper.read_text(&bob, secret.id).await, "hunter2");
    assert!(!keeper.has_write(bob.id(), NodeRef::Secret(secret.id)).await?);

    let grants = keeper.store().secret_grants(&[secret.id]).await?;
    let bobs = grants
        .iter()
        .find(|g| g.group_id == bob.private_group)
        .context("secret grant for bob")?;
    assert!(!bobs.can_write);

    // The vault row survives cleanup: it leads to bob's folder.
    keeper.clean_up(Some(vault.id), &[]).await?;
    let vault_row = keeper.grant(vault.id, NodeRef::Vault(vault.id), bob.private_group).await;
    assert_eq!(vault_row, Some(vaultkeeper::Access::demoted()));
    assert!(keeper.violations(vault.id).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn dropped_group_is_demoted_not_deleted() -> Result<()> {
    init_tracing();
    let keeper = TestKeeper::new();
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;

    let vault = keeper.create_vault(alice.id(), "infra", false).await?;
    let folder = keeper.create_folder(alice.id(), vault.id, None, "shared").await?;
    let secret = keeper
        .create_secret(alice.id(), vault.id, Some(folder.id), "token", &[b"abc"])
        .await?;
    let scope = ScopeRef::Folder(folder.id);

    keeper
        .update_permissions(
            alice.id(),
            &alice.passphrase,
            scope,
            vec![write(&alice), write(&bob)],
            true,
        )
        .await?;
    keeper.settle().await;
    assert_eq!(keeper.read_text(&bob, secret.id).await, "abc");

    let change = keeper
        .update_permissions(alice.id(), &alice.passphrase, scope, vec![write(&alice)], true)
        .await?;
    assert!(change.diff.revoked_groups().contains(&bob.private_group));

    // Before the share process runs, bob keeps his secret key.
    let folder_row = keeper.grant(vault.id, NodeRef::Folder(folder.id), bob.private_group).await;
    assert_eq!(folder_row, Some(vaultkeeper::Access::demoted()));
    assert_eq!(keeper.read_text(&bob, secret.id).await, "abc");
    assert!(keeper.violations(vault.id).await.is_empty());

    let audit = keeper.audit_entries(NodeRef::Folder(folder.id)).await?;
    assert_eq!(audit.len(), 2);
    Ok(())
}

#[tokio::test]
async fn reaper_follows_secret_keys() -> Result<()> {
    init_tracing();
    let keeper = TestKeeper::new();
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;

    let vault = keeper.create_vault(alice.id(), "infra", false).await?;
    let folder = keeper.create_folder(alice.id(), vault.id, None, "shared").await?;
    let secret = keeper
        .create_secret(alice.id(), vault.id, Some(folder.id), "token", &[b"abc"])
        .await?;
    let scope = ScopeRef::Folder(folder.id);
    let folder_node = NodeRef::Folder(folder.id);

    keeper
        .update_permissions(
            alice.id(),
            &alice.passphrase,
            scope,
            vec![write(&alice), write(&bob)],
            true,
        )
        .await?;
    keeper.settle().await;

    // Demote bob but stop the re-keying: the secret is still his.
    let change = keeper
        .update_permissions(alice.id(), &alice.passphrase, scope, vec![write(&alice)], true)
        .await?;
    keeper.cancel_share_process(alice.id(), change.process.id).await?;
    let report = keeper.clean_up(Some(vault.id), &[bob.private_group]).await?;
    assert_eq!(report.deleted, 0);
    assert_eq!(
        keeper.grant(vault.id, folder_node, bob.private_group).await,
        Some(vaultkeeper::Access::demoted())
    );
    assert_eq!(keeper.read_text(&bob, secret.id).await, "abc");

    // Once the secret is re-keyed without bob, his rows are collected.
    keeper
        .update_permissions(alice.id(), &alice.passphrase, scope, vec![write(&alice)], true)
        .await?;
    keeper.settle().await;
    assert!(keeper.read_secret(bob.id(), &bob.passphrase, secret.id).await.is_err());
    assert_eq!(keeper.grant(vault.id, folder_node, bob.private_group).await, None);
    assert_eq!(keeper.grant(vault.id, NodeRef::Vault(vault.id), bob.private_group).await, None);
    assert!(!keeper.has_read(bob.id(), folder_node).await?);
    assert!(keeper.violations(vault.id).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn large_scope_completes_in_batches_despite_failures() -> Result<()> {
    init_tracing();
    let mut config = KeeperConfig::insecure_for_tests();
    config.engine.batch_size = 500;
    let keeper = TestKeeper::with_config(config);
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;
    let team = keeper.create_group(alice.id(), "team", &[bob.id()]).await?;

    let vault = keeper.create_vault(alice.id(), "fleet", false).await?;
    let mut folders = Vec::with_capacity(40);
    for f in 0..40 {
        folders.push(keeper.create_folder(alice.id(), vault.id, None, &format!("host-{f}")).await?);
    }
    // 1197 healthy secrets spread over the folders, plus 3 unreadable ones.
    let mut sample = None;
    for s in 0..1197 {
        let folder = &folders[s % folders.len()];
        let body = format!("key-{s}");
        let secret = keeper
            .create_secret(alice.id(), vault.id, Some(folder.id), &body, &[body.as_bytes()])
            .await?;
        sample.get_or_insert(secret.id);
    }
    let group = keeper
        .store()
        .get_group(alice.private_group)
        .await?
        .context("alice's private group")?;
    for _ in 0..3 {
        let secret = Secret {
            id: vaultkeeper::SecretId::new(),
            title: "corrupt".into(),
            vault_id: vault.id,
            folder_id: None,
            blocks: Vec::new(),
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        };
        let grant = SecretGrant {
            secret_id: secret.id,
            group_id: alice.private_group,
            can_write: true,
            wrapped_key: WrappedKey {
                ciphertext: vec![7; 48],
                ephemeral_public: group.public_key,
                nonce: [0; 12],
            },
        };
        keeper.store().insert_secret(&secret, &[grant], &[]).await?;
    }

    let change = keeper
        .update_permissions(
            alice.id(),
            &alice.passphrase,
            ScopeRef::Vault(vault.id),
            vec![write(&alice), GrantRequest::read(team.id)],
            true,
        )
        .await?;
    keeper.settle().await;

    let process = keeper.share_process(change.process.id).await?;
    assert_eq!(process.status, ShareStatus::Completed);
    assert_eq!(process.total_items, 1240);
    assert_eq!(process.processed_items + process.failed_items, 1240);
    assert_eq!(process.failed_items, 3);

    let items = keeper.share_items(process.id).await?;
    assert_eq!(items.len(), 1240);
    assert!(items.iter().all(|i| i.status != ItemStatus::Pending));

    let sample = sample.context("at least one secret")?;
    assert_eq!(keeper.read_text(&bob, sample).await, "key-0");
    assert!(keeper.violations(vault.id).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn canceled_process_never_mutates() -> Result<()> {
    init_tracing();
    let keeper = TestKeeper::new();
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;
    let carol = keeper.user("carol").await;

    let vault = keeper.create_vault(alice.id(), "infra", false).await?;
    let secret = keeper
        .create_secret(alice.id(), vault.id, None, "token", &[b"abc"])
        .await?;

    let change = keeper
        .update_permissions(
            alice.id(),
            &alice.passphrase,
            ScopeRef::Vault(vault.id),
            vec![write(&alice), read(&bob)],
            true,
        )
        .await?;

    // Only the initiator may cancel.
    let err = keeper
        .cancel_share_process(carol.id(), change.process.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationInsufficient);

    let canceled = keeper.cancel_share_process(alice.id(), change.process.id).await?;
    assert_eq!(canceled.status, ShareStatus::Canceled);

    keeper.settle().await;
    let process = keeper.share_process(change.process.id).await?;
    assert_eq!(process.status, ShareStatus::Canceled);
    assert_eq!(process.processed_items, 0);
    assert_eq!(keeper.store().secret_grants(&[secret.id]).await?.len(), 1);
    assert!(keeper.read_secret(bob.id(), &bob.passphrase, secret.id).await.is_err());

    // Canceling twice reports the terminal state.
    let err = keeper
        .cancel_share_process(alice.id(), change.process.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProcessAlreadyTerminal);
    let err = keeper
        .resume_share_process(alice.id(), &alice.passphrase, change.process.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProcessAlreadyTerminal);
    Ok(())
}

#[tokio::test]
async fn personal_vault_cannot_be_shared() -> Result<()> {
    init_tracing();
    let keeper = TestKeeper::new();
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;

    let vault = keeper.create_vault(alice.id(), "mine", true).await?;
    let err = keeper
        .update_permissions(
            alice.id(),
            &alice.passphrase,
            ScopeRef::Vault(vault.id),
            vec![write(&alice), read(&bob)],
            true,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    Ok(())
}

#[tokio::test]
async fn invalid_requests_and_wrong_passphrase_are_rejected() -> Result<()> {
    init_tracing();
    let keeper = TestKeeper::new();
    let alice = keeper.user("alice").await;
    let bob = keeper.user("bob").await;
    let vault = keeper.create_vault(alice.id(), "infra", false).await?;
    let scope = ScopeRef::Vault(vault.id);

    let cases = [
        vec![],
        vec![read(&alice)],
        vec![write(&alice), write(&alice)],
        vec![write(&alice), GrantRequest { partial: true, ..write(&bob) }],
    ];
    for requests in cases {
        let err = keeper
            .update_permissions(alice.id(), &alice.passphrase, scope, requests, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{err}");
    }

    let err = keeper
        .update_permissions(alice.id(), "wrong", scope, vec![write(&alice)], true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecryptionFailed);

    // Bob cannot touch a vault he does not write.
    let err = keeper
        .update_permissions(bob.id(), &bob.passphrase, scope, vec![write(&bob)], true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationInsufficient);
    Ok(())
}

#[tokio::test]
async fn restart_leaves_process_pending_until_resumed() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("vaultkeeper.db");

    let (alice, bob, secret_id, process_id) = {
        let keeper = vaultkeeper::Keeper::open(&path, KeeperConfig::insecure_for_tests())?;
        let alice = keeper.register_user("alice", "pw-a").await?;
        let bob = keeper.register_user("bob", "pw-b").await?;
        let vault = keeper.create_vault(alice.id, "infra", false).await?;
        let secret = keeper
            .create_secret(alice.id, vault.id, None, "token", &[b"abc"])
            .await?;
        let change = keeper
            .update_permissions(
                alice.id,
                "pw-a",
                ScopeRef::Vault(vault.id),
                vec![GrantRequest::user(alice.id, true), GrantRequest::user(bob.id, false)],
                true,
            )
            .await?;
        (alice, bob, secret.id, change.process.id)
    };

    // The unlock proof was lost with the process; the job is still queued.
    let keeper = vaultkeeper::Keeper::open(&path, KeeperConfig::insecure_for_tests())?;
    keeper.worker().run_until_idle().await?;
    assert_eq!(keeper.share_process(process_id).await?.status, ShareStatus::Pending);

    keeper.resume_share_process(alice.id, "pw-a", process_id).await?;
    keeper.worker().run_until_idle().await?;
    assert_eq!(keeper.share_process(process_id).await?.status, ShareStatus::Completed);

    let blocks = keeper.read_secret(bob.id, "pw-b", secret_id).await?;
    assert_eq!(blocks[0].as_bytes(), b"abc");
    Ok(())
}
