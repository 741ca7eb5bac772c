//! The durable job queue and the audit log.

use rusqlite::{params, Connection, OptionalExtension};

use vaultkeeper_core::{AuditEntry, Job, NodeRef};

use super::codec;
use crate::error::{Result, StoreError};
use crate::traits::ClaimedJob;

pub(crate) fn enqueue_job(conn: &Connection, job: &Job, at: i64) -> Result<i64> {
    let payload = job.to_json()?;
    conn.execute(
        "INSERT INTO jobs (kind, payload, status, enqueued_at) VALUES (?1, ?2, 'queued', ?3)",
        params![job.kind(), payload, at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Claim the oldest queued job.
///
/// A payload that no longer decodes is parked as `dead` so it cannot block
/// the queue.
pub(crate) fn claim_job(conn: &mut Connection, at: i64) -> Result<Option<ClaimedJob>> {
    let tx = conn.transaction()?;
    let claimed = loop {
        let next: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, payload FROM jobs WHERE status = 'queued' ORDER BY id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((id, payload)) = next else {
            break None;
        };

        match Job::from_json(&payload) {
            Ok(job) => {
                tx.execute(
                    "UPDATE jobs SET status = 'claimed', claimed_at = ?2 WHERE id = ?1",
                    params![id, at],
                )?;
                break Some(ClaimedJob {
                    id,
                    job,
                    claimed_at: at,
                });
            }
            Err(e) => {
                tracing::warn!(job = id, error = %e, "undecodable job parked");
                tx.execute(
                    "UPDATE jobs SET status = 'dead', completed_at = ?2 WHERE id = ?1",
                    params![id, at],
                )?;
            }
        }
    };
    tx.commit()?;
    Ok(claimed)
}

pub(crate) fn complete_job(conn: &Connection, id: i64, at: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'done', completed_at = ?2 WHERE id = ?1 AND status = 'claimed'",
        params![id, at],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("claimed job", id));
    }
    Ok(())
}

pub(crate) fn requeue_claimed_jobs(conn: &Connection, older_than: i64) -> Result<u64> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'queued', claimed_at = NULL
         WHERE status = 'claimed' AND claimed_at < ?1",
        [older_than],
    )?;
    Ok(changed as u64)
}

pub(crate) fn open_job_count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'claimed')",
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn insert_audit(conn: &Connection, entry: &AuditEntry) -> Result<()> {
    let diff = codec::to_json(&entry.diff)?;
    conn.execute(
        "INSERT INTO audit_log (actor_id, target_kind, target_id, diff, at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.actor.to_string(),
            entry.target.kind(),
            entry.target.id_string(),
            diff,
            entry.at,
        ],
    )?;
    Ok(())
}

pub(crate) fn audit_entries_for(conn: &Connection, target: NodeRef) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT actor_id, diff, at FROM audit_log
         WHERE target_kind = ?1 AND target_id = ?2
         ORDER BY id",
    )?;
    let rows = stmt.query_map(params![target.kind(), target.id_string()], |row| {
        Ok(AuditEntry {
            actor: codec::parsed(row, 0)?,
            target,
            diff: codec::json(row, 1)?,
            at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
