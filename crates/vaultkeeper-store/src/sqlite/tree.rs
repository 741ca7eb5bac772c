//! Users, groups, and the vault/folder/secret tree with its grants.

use std::collections::{BTreeSet, HashMap};

use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior,
};

use vaultkeeper_core::{
    Access, AuditEntry, Folder, FolderId, Group, GroupId, GroupMembership, LockedKey, NodeRef,
    Secret, SecretGrant, SecretId, User, UserId, Vault, VaultId,
};
use vaultkeeper_perms::{plan_cleanup, AccessGraph, GrantDiff, GrantRow, ReapPlan};

use super::codec::{self, array, parsed, parsed_opt, wrapped_key};
use super::jobs;
use crate::error::{Result, StoreError};

/// Bound on the number of host parameters in one `IN (...)` list.
const IN_CHUNK: usize = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Row mappers
// ─────────────────────────────────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, name, public_key, locked_salt, locked_nonce, locked_key, created_at";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parsed(row, 0)?,
        name: row.get(1)?,
        public_key: array(row, 2)?,
        locked_private_key: LockedKey {
            salt: array(row, 3)?,
            nonce: array(row, 4)?,
            ciphertext: row.get(5)?,
        },
        created_at: row.get(6)?,
    })
}

const GROUP_COLUMNS: &str = "id, name, public_key, private, created_at, deleted_at";

fn row_to_group(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: parsed(row, 0)?,
        name: row.get(1)?,
        public_key: array(row, 2)?,
        private: row.get(3)?,
        created_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

fn row_to_membership(row: &Row<'_>) -> rusqlite::Result<GroupMembership> {
    Ok(GroupMembership {
        group_id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        wrapped_private_key: wrapped_key(row, 2)?,
        manager: row.get(5)?,
    })
}

fn row_to_vault(row: &Row<'_>) -> rusqlite::Result<Vault> {
    Ok(Vault {
        id: parsed(row, 0)?,
        name: row.get(1)?,
        owner: parsed_opt(row, 2)?,
        mandatory_fields: codec::json(row, 3)?,
        created_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

fn row_to_folder(row: &Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: parsed(row, 0)?,
        name: row.get(1)?,
        vault_id: parsed(row, 2)?,
        parent_id: parsed_opt(row, 3)?,
        created_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

fn row_to_secret(row: &Row<'_>) -> rusqlite::Result<Secret> {
    Ok(Secret {
        id: parsed(row, 0)?,
        title: row.get(1)?,
        vault_id: parsed(row, 2)?,
        folder_id: parsed_opt(row, 3)?,
        blocks: codec::blocks(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

fn row_to_secret_grant(row: &Row<'_>) -> rusqlite::Result<SecretGrant> {
    Ok(SecretGrant {
        secret_id: parsed(row, 0)?,
        group_id: parsed(row, 1)?,
        can_write: row.get(2)?,
        wrapped_key: wrapped_key(row, 3)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Users and groups
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn insert_user(
    conn: &mut Connection,
    user: &User,
    private_group: &Group,
    membership: &GroupMembership,
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO users (id, name, public_key, locked_salt, locked_nonce, locked_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.id.to_string(),
            user.name,
            &user.public_key[..],
            &user.locked_private_key.salt[..],
            &user.locked_private_key.nonce[..],
            user.locked_private_key.ciphertext,
            user.created_at,
        ],
    )?;
    write_group(&tx, private_group)?;
    write_membership(&tx, membership)?;
    tx.commit()?;
    Ok(())
}

pub(crate) fn get_user(conn: &Connection, id: UserId) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn
        .query_row(&sql, [id.to_string()], row_to_user)
        .optional()?)
}

fn write_group(conn: &Connection, group: &Group) -> Result<()> {
    conn.execute(
        "INSERT INTO user_groups (id, name, public_key, private, created_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            group.id.to_string(),
            group.name,
            &group.public_key[..],
            group.private,
            group.created_at,
            group.deleted_at,
        ],
    )?;
    Ok(())
}

fn write_membership(conn: &Connection, m: &GroupMembership) -> Result<()> {
    conn.execute(
        "INSERT INTO group_members (group_id, user_id, wrapped_key, wrapped_ephemeral, wrapped_nonce, manager)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(group_id, user_id) DO UPDATE SET
            wrapped_key = excluded.wrapped_key,
            wrapped_ephemeral = excluded.wrapped_ephemeral,
            wrapped_nonce = excluded.wrapped_nonce,
            manager = excluded.manager",
        params![
            m.group_id.to_string(),
            m.user_id.to_string(),
            m.wrapped_private_key.ciphertext,
            &m.wrapped_private_key.ephemeral_public[..],
            &m.wrapped_private_key.nonce[..],
            m.manager,
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_group(
    conn: &mut Connection,
    group: &Group,
    memberships: &[GroupMembership],
) -> Result<()> {
    let tx = conn.transaction()?;
    write_group(&tx, group)?;
    for m in memberships {
        write_membership(&tx, m)?;
    }
    tx.commit()?;
    Ok(())
}

pub(crate) fn get_group(conn: &Connection, id: GroupId) -> Result<Option<Group>> {
    let sql = format!("SELECT {GROUP_COLUMNS} FROM user_groups WHERE id = ?1");
    Ok(conn
        .query_row(&sql, [id.to_string()], row_to_group)
        .optional()?)
}

pub(crate) fn soft_delete_group(conn: &Connection, id: GroupId, at: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE user_groups SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![id.to_string(), at],
    )?;
    Ok(changed > 0)
}

pub(crate) fn group_names(conn: &Connection, ids: &[GroupId]) -> Result<HashMap<GroupId, String>> {
    let mut names = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT id, name FROM user_groups WHERE deleted_at IS NULL AND id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter().map(|g| g.to_string())), |row| {
            Ok((parsed::<GroupId>(row, 0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, name) = row?;
            names.insert(id, name);
        }
    }
    Ok(names)
}

pub(crate) fn upsert_membership(conn: &Connection, membership: &GroupMembership) -> Result<()> {
    write_membership(conn, membership)
}

const MEMBERSHIP_SELECT: &str = "SELECT m.group_id, m.user_id, m.wrapped_key, m.wrapped_ephemeral, m.wrapped_nonce, m.manager
     FROM group_members m JOIN user_groups g ON g.id = m.group_id";

pub(crate) fn get_membership(
    conn: &Connection,
    group_id: GroupId,
    user_id: UserId,
) -> Result<Option<GroupMembership>> {
    let sql = format!("{MEMBERSHIP_SELECT} WHERE m.group_id = ?1 AND m.user_id = ?2 AND g.deleted_at IS NULL");
    Ok(conn
        .query_row(
            &sql,
            params![group_id.to_string(), user_id.to_string()],
            row_to_membership,
        )
        .optional()?)
}

pub(crate) fn memberships_for_user(
    conn: &Connection,
    user_id: UserId,
) -> Result<Vec<GroupMembership>> {
    let sql = format!("{MEMBERSHIP_SELECT} WHERE m.user_id = ?1 AND g.deleted_at IS NULL ORDER BY m.group_id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([user_id.to_string()], row_to_membership)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn private_group_for_user(
    conn: &Connection,
    user_id: UserId,
) -> Result<Option<GroupId>> {
    Ok(conn
        .query_row(
            "SELECT g.id FROM user_groups g JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?1 AND g.private = 1 AND g.deleted_at IS NULL
             LIMIT 1",
            [user_id.to_string()],
            |row| parsed(row, 0),
        )
        .optional()?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Vault tree
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn insert_vault(
    conn: &mut Connection,
    vault: &Vault,
    grants: &[GrantRow],
) -> Result<()> {
    let mandatory = codec::to_json(&vault.mandatory_fields)?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO vaults (id, name, owner_id, mandatory_fields, created_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            vault.id.to_string(),
            vault.name,
            vault.owner.map(|u| u.to_string()),
            mandatory,
            vault.created_at,
            vault.deleted_at,
        ],
    )?;
    for row in grants {
        upsert_grant(&tx, row)?;
    }
    tx.commit()?;
    Ok(())
}

pub(crate) fn get_vault(conn: &Connection, id: VaultId) -> Result<Option<Vault>> {
    Ok(conn
        .query_row(
            "SELECT id, name, owner_id, mandatory_fields, created_at, deleted_at
             FROM vaults WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            row_to_vault,
        )
        .optional()?)
}

pub(crate) fn set_mandatory_fields(
    conn: &Connection,
    id: VaultId,
    fields: &[String],
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE vaults SET mandatory_fields = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![id.to_string(), codec::to_json(fields)?],
    )?;
    Ok(changed > 0)
}

pub(crate) fn list_vault_ids(conn: &Connection) -> Result<Vec<VaultId>> {
    let mut stmt =
        conn.prepare("SELECT id FROM vaults WHERE deleted_at IS NULL ORDER BY created_at, id")?;
    let rows = stmt.query_map([], |row| parsed(row, 0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn insert_folder(
    conn: &mut Connection,
    folder: &Folder,
    grants: &[GrantRow],
    ancestor_rows: &[GrantRow],
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO folders (id, name, vault_id, parent_id, created_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            folder.id.to_string(),
            folder.name,
            folder.vault_id.to_string(),
            folder.parent_id.map(|p| p.to_string()),
            folder.created_at,
            folder.deleted_at,
        ],
    )?;
    for row in grants {
        upsert_grant(&tx, row)?;
    }
    for row in ancestor_rows {
        ensure_grant(&tx, row)?;
    }
    tx.commit()?;
    Ok(())
}

pub(crate) fn get_folder(conn: &Connection, id: FolderId) -> Result<Option<Folder>> {
    Ok(conn
        .query_row(
            "SELECT id, name, vault_id, parent_id, created_at, deleted_at
             FROM folders WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            row_to_folder,
        )
        .optional()?)
}

/// Live folders of the subtree rooted at `?1`, the root included.
const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS (
        SELECT id FROM folders WHERE id = ?1 AND deleted_at IS NULL
        UNION
        SELECT f.id FROM folders f JOIN subtree s ON f.parent_id = s.id
        WHERE f.deleted_at IS NULL
    )";

pub(crate) fn soft_delete_folder(conn: &mut Connection, id: FolderId, at: i64) -> Result<u64> {
    let tx = conn.transaction()?;
    let secrets = tx.execute(
        &format!(
            "{SUBTREE_CTE}
             UPDATE secrets SET deleted_at = ?2, updated_at = ?2
             WHERE deleted_at IS NULL AND folder_id IN (SELECT id FROM subtree)"
        ),
        params![id.to_string(), at],
    )?;
    let folders = tx.execute(
        &format!(
            "{SUBTREE_CTE}
             UPDATE folders SET deleted_at = ?2 WHERE id IN (SELECT id FROM subtree)"
        ),
        params![id.to_string(), at],
    )?;
    tx.commit()?;

    tracing::debug!(folder = %id, folders, secrets, "folder subtree deleted");
    Ok(folders as u64)
}

pub(crate) fn insert_secret(
    conn: &mut Connection,
    secret: &Secret,
    grants: &[SecretGrant],
    ancestor_rows: &[GrantRow],
) -> Result<()> {
    let blocks = codec::encode_blocks(&secret.blocks)?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO secrets (id, title, vault_id, folder_id, blocks, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            secret.id.to_string(),
            secret.title,
            secret.vault_id.to_string(),
            secret.folder_id.map(|f| f.to_string()),
            blocks,
            secret.created_at,
            secret.updated_at,
            secret.deleted_at,
        ],
    )?;
    for grant in grants {
        put_secret_grant(&tx, grant)?;
    }
    for row in ancestor_rows {
        ensure_grant(&tx, row)?;
    }
    tx.commit()?;
    Ok(())
}

pub(crate) fn get_secret(conn: &Connection, id: SecretId) -> Result<Option<Secret>> {
    Ok(conn
        .query_row(
            "SELECT id, title, vault_id, folder_id, blocks, created_at, updated_at, deleted_at
             FROM secrets WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            row_to_secret,
        )
        .optional()?)
}

pub(crate) fn soft_delete_secret(conn: &Connection, id: SecretId, at: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE secrets SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![id.to_string(), at],
    )?;
    Ok(changed > 0)
}

pub(crate) fn secret_grants(conn: &Connection, ids: &[SecretId]) -> Result<Vec<SecretGrant>> {
    let mut grants = Vec::new();
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT sg.secret_id, sg.group_id, sg.can_write, sg.wrapped_key, sg.wrapped_ephemeral, sg.wrapped_nonce
             FROM secret_grants sg
             JOIN secrets s ON s.id = sg.secret_id
             JOIN user_groups g ON g.id = sg.group_id
             WHERE s.deleted_at IS NULL AND g.deleted_at IS NULL AND sg.secret_id IN ({})
             ORDER BY sg.secret_id, sg.group_id",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(chunk.iter().map(|s| s.to_string())),
            row_to_secret_grant,
        )?;
        for row in rows {
            grants.push(row?);
        }
    }
    Ok(grants)
}

// ─────────────────────────────────────────────────────────────────────────────
// Grants
// ─────────────────────────────────────────────────────────────────────────────

fn grant_node(row: &GrantRow) -> Result<(&'static str, String)> {
    match row.node {
        NodeRef::Vault(_) | NodeRef::Folder(_) => Ok((row.node.kind(), row.node.id_string())),
        NodeRef::Secret(id) => Err(StoreError::InvalidData(format!(
            "secret {id} cannot carry a node grant"
        ))),
    }
}

/// Insert or overwrite a vault/folder grant row.
pub(crate) fn upsert_grant(conn: &Connection, row: &GrantRow) -> Result<()> {
    let (kind, id) = grant_node(row)?;
    conn.execute(
        "INSERT INTO node_grants (node_kind, node_id, group_id, can_write, partial)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(node_kind, node_id, group_id) DO UPDATE SET
            can_write = excluded.can_write,
            partial = excluded.partial",
        params![
            kind,
            id,
            row.group_id.to_string(),
            row.access.can_write,
            row.access.partial
        ],
    )?;
    Ok(())
}

/// Insert a vault/folder grant row unless the group already has one.
pub(crate) fn ensure_grant(conn: &Connection, row: &GrantRow) -> Result<()> {
    let (kind, id) = grant_node(row)?;
    conn.execute(
        "INSERT INTO node_grants (node_kind, node_id, group_id, can_write, partial)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(node_kind, node_id, group_id) DO NOTHING",
        params![
            kind,
            id,
            row.group_id.to_string(),
            row.access.can_write,
            row.access.partial
        ],
    )?;
    Ok(())
}

pub(crate) fn put_secret_grant(conn: &Connection, grant: &SecretGrant) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO secret_grants
            (secret_id, group_id, can_write, wrapped_key, wrapped_ephemeral, wrapped_nonce)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            grant.secret_id.to_string(),
            grant.group_id.to_string(),
            grant.can_write,
            grant.wrapped_key.ciphertext,
            &grant.wrapped_key.ephemeral_public[..],
            &grant.wrapped_key.nonce[..],
        ],
    )?;
    Ok(())
}

pub(crate) fn update_secret_grant(
    conn: &Connection,
    secret_id: SecretId,
    group_id: GroupId,
    can_write: bool,
) -> Result<()> {
    conn.execute(
        "UPDATE secret_grants SET can_write = ?3 WHERE secret_id = ?1 AND group_id = ?2",
        params![secret_id.to_string(), group_id.to_string(), can_write],
    )?;
    Ok(())
}

pub(crate) fn delete_secret_grant(
    conn: &Connection,
    secret_id: SecretId,
    group_id: GroupId,
) -> Result<()> {
    conn.execute(
        "DELETE FROM secret_grants WHERE secret_id = ?1 AND group_id = ?2",
        params![secret_id.to_string(), group_id.to_string()],
    )?;
    Ok(())
}

pub(crate) fn load_graph(conn: &Connection, vault_id: VaultId) -> Result<Option<AccessGraph>> {
    let Some(vault) = get_vault(conn, vault_id)? else {
        return Ok(None);
    };
    let vault_key = vault_id.to_string();
    let mut graph = AccessGraph::new(vault_id, vault.owner);

    let mut stmt = conn.prepare(
        "SELECT id, parent_id FROM folders WHERE vault_id = ?1 AND deleted_at IS NULL",
    )?;
    let folders = stmt.query_map([&vault_key], |row| {
        Ok((parsed::<FolderId>(row, 0)?, parsed_opt::<FolderId>(row, 1)?))
    })?;
    for folder in folders {
        let (id, parent) = folder?;
        graph.add_folder(id, parent);
    }

    let mut stmt = conn.prepare(
        "SELECT id, folder_id FROM secrets WHERE vault_id = ?1 AND deleted_at IS NULL",
    )?;
    let secrets = stmt.query_map([&vault_key], |row| {
        Ok((parsed::<SecretId>(row, 0)?, parsed_opt::<FolderId>(row, 1)?))
    })?;
    for secret in secrets {
        let (id, folder) = secret?;
        graph.add_secret(id, folder);
    }

    let mut stmt = conn.prepare(
        "SELECT ng.group_id, ng.can_write, ng.partial
         FROM node_grants ng JOIN user_groups g ON g.id = ng.group_id
         WHERE ng.node_kind = 'vault' AND ng.node_id = ?1 AND g.deleted_at IS NULL",
    )?;
    let rows = stmt.query_map([&vault_key], |row| {
        Ok((
            parsed::<GroupId>(row, 0)?,
            Access {
                can_write: row.get(1)?,
                partial: row.get(2)?,
            },
        ))
    })?;
    for row in rows {
        let (group_id, access) = row?;
        graph.set_grant(NodeRef::Vault(vault_id), group_id, access);
    }

    let mut stmt = conn.prepare(
        "SELECT ng.node_id, ng.group_id, ng.can_write, ng.partial
         FROM node_grants ng
         JOIN folders f ON f.id = ng.node_id
         JOIN user_groups g ON g.id = ng.group_id
         WHERE ng.node_kind = 'folder' AND f.vault_id = ?1
           AND f.deleted_at IS NULL AND g.deleted_at IS NULL",
    )?;
    let rows = stmt.query_map([&vault_key], |row| {
        Ok((
            parsed::<FolderId>(row, 0)?,
            parsed::<GroupId>(row, 1)?,
            Access {
                can_write: row.get(2)?,
                partial: row.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (folder_id, group_id, access) = row?;
        graph.set_grant(NodeRef::Folder(folder_id), group_id, access);
    }

    let mut stmt = conn.prepare(
        "SELECT sg.secret_id, sg.group_id, sg.can_write
         FROM secret_grants sg
         JOIN secrets s ON s.id = sg.secret_id
         JOIN user_groups g ON g.id = sg.group_id
         WHERE s.vault_id = ?1 AND s.deleted_at IS NULL AND g.deleted_at IS NULL",
    )?;
    let rows = stmt.query_map([&vault_key], |row| {
        Ok((
            parsed::<SecretId>(row, 0)?,
            parsed::<GroupId>(row, 1)?,
            row.get::<_, bool>(2)?,
        ))
    })?;
    for row in rows {
        let (secret_id, group_id, can_write) = row?;
        let access = Access {
            can_write,
            partial: false,
        };
        graph.set_grant(NodeRef::Secret(secret_id), group_id, access);
    }

    Ok(Some(graph))
}

pub(crate) fn apply_grant_diff(
    conn: &mut Connection,
    diff: &GrantDiff,
    audit: Option<&AuditEntry>,
) -> Result<()> {
    let tx = conn.transaction()?;
    for row in diff.scope_rows() {
        upsert_grant(&tx, &row)?;
    }
    for row in &diff.ancestor_rows {
        ensure_grant(&tx, row)?;
    }
    if let Some(entry) = audit {
        jobs::insert_audit(&tx, entry)?;
    }
    tx.commit()?;
    Ok(())
}

/// Plan and delete a vault's unjustified demoted rows in one transaction.
///
/// The graph is read under the same write lock the delete runs under, so a
/// grant committed concurrently is either seen by the plan or waits for the
/// delete to finish. Returns `None` if the vault does not exist.
pub(crate) fn reap_vault(
    conn: &mut Connection,
    vault_id: VaultId,
    groups: Option<&BTreeSet<GroupId>>,
) -> Result<Option<u64>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let Some(graph) = load_graph(&tx, vault_id)? else {
        return Ok(None);
    };
    let plan = plan_cleanup(&graph, groups);
    let deleted = if plan.is_empty() {
        0
    } else {
        delete_planned(&tx, &plan)?
    };
    tx.commit()?;
    Ok(Some(deleted))
}

fn delete_planned(conn: &Connection, plan: &ReapPlan) -> Result<u64> {
    let mut deleted = 0u64;
    let mut stmt = conn.prepare(
        "DELETE FROM node_grants
         WHERE node_kind = ?1 AND node_id = ?2 AND group_id = ?3
           AND partial = 1 AND can_write = 0",
    )?;
    for (folder_id, group_id) in &plan.folder_rows {
        deleted += stmt.execute(params![
            "folder",
            folder_id.to_string(),
            group_id.to_string()
        ])? as u64;
    }
    if let Some(vault_id) = plan.vault_id {
        for group_id in &plan.vault_rows {
            deleted += stmt.execute(params![
                "vault",
                vault_id.to_string(),
                group_id.to_string()
            ])? as u64;
        }
    }
    Ok(deleted)
}

fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}
