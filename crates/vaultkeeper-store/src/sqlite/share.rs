//! Share processes, their items, and batch commits.

use rusqlite::{params, Connection, OptionalExtension, Row};

use vaultkeeper_core::{
    ItemKind, ItemStatus, ItemTarget, ScopeRef, ShareItem, ShareItemId, ShareProcess,
    ShareProcessId, ShareStatus,
};

use super::codec::{self, parsed};
use super::{jobs, tree};
use crate::error::Result;
use crate::traits::BatchCommit;

const PROCESS_COLUMNS: &str = "id, scope_kind, scope_id, vault_id, cascade_subtree, requested, status,
     total_items, processed_items, failed_items, message, initiator_id,
     created_at, updated_at, started_at, finished_at";

fn row_to_process(row: &Row<'_>) -> rusqlite::Result<ShareProcess> {
    let scope_kind: String = row.get(1)?;
    let scope_id: String = row.get(2)?;
    let scope = ScopeRef::from_parts(&scope_kind, &scope_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ShareProcess {
        id: parsed(row, 0)?,
        scope,
        vault_id: parsed(row, 3)?,
        cascade: row.get(4)?,
        requested: codec::json(row, 5)?,
        status: parsed(row, 6)?,
        total_items: row.get::<_, i64>(7)? as u64,
        processed_items: row.get::<_, i64>(8)? as u64,
        failed_items: row.get::<_, i64>(9)? as u64,
        message: row.get(10)?,
        initiator: parsed(row, 11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        started_at: row.get(14)?,
        finished_at: row.get(15)?,
    })
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ShareItem> {
    let kind: ItemKind = parsed(row, 2)?;
    let target_id: String = row.get(3)?;
    let target = ItemTarget::from_parts(kind, &target_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ShareItem {
        id: parsed(row, 0)?,
        process_id: parsed(row, 1)?,
        target,
        status: parsed(row, 4)?,
        message: row.get(5)?,
    })
}

pub(crate) fn insert_share_process(conn: &Connection, p: &ShareProcess) -> Result<()> {
    let requested = codec::to_json(&p.requested)?;
    let scope_id = match p.scope {
        ScopeRef::Vault(id) => id.to_string(),
        ScopeRef::Folder(id) => id.to_string(),
    };
    conn.execute(
        "INSERT INTO share_processes
            (id, scope_kind, scope_id, vault_id, cascade_subtree, requested, status,
             total_items, processed_items, failed_items, message, initiator_id,
             created_at, updated_at, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            p.id.to_string(),
            p.scope.kind(),
            scope_id,
            p.vault_id.to_string(),
            p.cascade,
            requested,
            p.status.as_str(),
            p.total_items as i64,
            p.processed_items as i64,
            p.failed_items as i64,
            p.message,
            p.initiator.to_string(),
            p.created_at,
            p.updated_at,
            p.started_at,
            p.finished_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn get_share_process(
    conn: &Connection,
    id: ShareProcessId,
) -> Result<Option<ShareProcess>> {
    let sql = format!("SELECT {PROCESS_COLUMNS} FROM share_processes WHERE id = ?1");
    Ok(conn
        .query_row(&sql, [id.to_string()], row_to_process)
        .optional()?)
}

pub(crate) fn share_processes_with_status(
    conn: &Connection,
    status: ShareStatus,
) -> Result<Vec<ShareProcess>> {
    let sql = format!(
        "SELECT {PROCESS_COLUMNS} FROM share_processes WHERE status = ?1 ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([status.as_str()], row_to_process)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn transition_share_process(
    conn: &Connection,
    id: ShareProcessId,
    from: ShareStatus,
    to: ShareStatus,
    message: Option<&str>,
    at: i64,
) -> Result<bool> {
    let started = (to == ShareStatus::Running).then_some(at);
    let finished = to.is_terminal().then_some(at);
    let changed = conn.execute(
        "UPDATE share_processes SET
            status = ?3,
            message = COALESCE(?4, message),
            updated_at = ?5,
            started_at = COALESCE(started_at, ?6),
            finished_at = COALESCE(?7, finished_at)
         WHERE id = ?1 AND status = ?2",
        params![
            id.to_string(),
            from.as_str(),
            to.as_str(),
            message,
            at,
            started,
            finished
        ],
    )?;
    if changed > 0 {
        tracing::debug!(process = %id, %from, %to, "share process transition");
    }
    Ok(changed > 0)
}

pub(crate) fn insert_share_items(
    conn: &mut Connection,
    id: ShareProcessId,
    targets: &[ItemTarget],
    at: i64,
) -> Result<u64> {
    let process_key = id.to_string();
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO share_items (id, process_id, target_kind, target_id, status)
             VALUES (?1, ?2, ?3, ?4, 'pending')",
        )?;
        for target in targets {
            stmt.execute(params![
                ShareItemId::new().to_string(),
                process_key,
                target.kind().as_str(),
                target.id_string(),
            ])?;
        }
    }
    let total: i64 = tx.query_row(
        "SELECT COUNT(*) FROM share_items WHERE process_id = ?1",
        [&process_key],
        |row| row.get(0),
    )?;
    tx.execute(
        "UPDATE share_processes SET total_items = ?2, updated_at = ?3 WHERE id = ?1",
        params![process_key, total, at],
    )?;
    tx.commit()?;
    Ok(total as u64)
}

const ITEM_COLUMNS: &str = "id, process_id, target_kind, target_id, status, message";

pub(crate) fn pending_share_items(
    conn: &Connection,
    id: ShareProcessId,
    kind: ItemKind,
    limit: usize,
) -> Result<Vec<ShareItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM share_items
         WHERE process_id = ?1 AND target_kind = ?2 AND status = 'pending'
         ORDER BY target_id LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![id.to_string(), kind.as_str(), limit as i64],
        row_to_item,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn share_items(conn: &Connection, id: ShareProcessId) -> Result<Vec<ShareItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM share_items WHERE process_id = ?1 ORDER BY target_kind, target_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([id.to_string()], row_to_item)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Commit one batch atomically.
///
/// Counters only move for items that were still pending, so replaying a
/// batch after a crash cannot double count.
pub(crate) fn commit_batch(
    conn: &mut Connection,
    id: ShareProcessId,
    batch: &BatchCommit,
    at: i64,
) -> Result<()> {
    let tx = conn.transaction()?;
    write_grants(&tx, batch)?;

    let (mut done, mut failed) = (0i64, 0i64);
    {
        let mut stmt = tx.prepare(
            "UPDATE share_items SET status = ?2, message = ?3 WHERE id = ?1 AND status = 'pending'",
        )?;
        for outcome in &batch.outcomes {
            let changed = stmt.execute(params![
                outcome.item_id.to_string(),
                outcome.status.as_str(),
                outcome.message,
            ])?;
            if changed > 0 {
                match outcome.status {
                    ItemStatus::Done => done += 1,
                    ItemStatus::Failed => failed += 1,
                    ItemStatus::Pending => {}
                }
            }
        }
    }

    for entry in &batch.audit {
        jobs::insert_audit(&tx, entry)?;
    }

    tx.execute(
        "UPDATE share_processes SET
            processed_items = processed_items + ?2,
            failed_items = failed_items + ?3,
            updated_at = ?4
         WHERE id = ?1",
        params![id.to_string(), done, failed, at],
    )?;
    tx.commit()?;
    Ok(())
}

/// Write the grant rows and audit entries of a batch that belongs to no
/// share process. Outcomes are ignored.
pub(crate) fn apply_grant_batch(conn: &mut Connection, batch: &BatchCommit) -> Result<()> {
    let tx = conn.transaction()?;
    write_grants(&tx, batch)?;
    for entry in &batch.audit {
        jobs::insert_audit(&tx, entry)?;
    }
    tx.commit()?;
    Ok(())
}

fn write_grants(conn: &Connection, batch: &BatchCommit) -> Result<()> {
    for (secret_id, group_id) in &batch.secret_grant_deletes {
        tree::delete_secret_grant(conn, *secret_id, *group_id)?;
    }
    for grant in &batch.secret_grant_puts {
        tree::put_secret_grant(conn, grant)?;
    }
    for (secret_id, group_id, can_write) in &batch.secret_grant_updates {
        tree::update_secret_grant(conn, *secret_id, *group_id, *can_write)?;
    }
    for row in &batch.grant_upserts {
        tree::upsert_grant(conn, row)?;
    }
    for row in &batch.grant_ensures {
        tree::ensure_grant(conn, row)?;
    }
    Ok(())
}

pub(crate) fn requeue_stalled(
    conn: &mut Connection,
    older_than: i64,
    at: i64,
    live: &[ShareProcessId],
) -> Result<Vec<ShareProcessId>> {
    let tx = conn.transaction()?;
    let stalled: Vec<ShareProcessId> = {
        let mut stmt = tx.prepare(
            "SELECT id FROM share_processes WHERE status = 'running' AND updated_at < ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([older_than], |row| parsed(row, 0))?;
        rows.filter(|id| !matches!(id, Ok(id) if live.contains(id)))
            .collect::<rusqlite::Result<Vec<_>>>()?
    };
    for id in &stalled {
        tx.execute(
            "UPDATE share_processes SET status = 'pending', updated_at = ?2
             WHERE id = ?1 AND status = 'running'",
            params![id.to_string(), at],
        )?;
    }
    tx.commit()?;

    if !stalled.is_empty() {
        tracing::warn!(count = stalled.len(), "stalled share processes requeued");
    }
    Ok(stalled)
}
