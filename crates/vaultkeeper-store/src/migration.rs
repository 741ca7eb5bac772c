//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration is a SQL batch that
//! transforms the schema from version N to N+1.

use rusqlite::Connection;

use vaultkeeper_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "schema migrated");
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Ids are UUIDv4 text; times are Unix milliseconds.

        CREATE TABLE users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            public_key BLOB NOT NULL,          -- 32 bytes, X25519
            locked_salt BLOB NOT NULL,         -- 16 bytes, Argon2id salt
            locked_nonce BLOB NOT NULL,        -- 12 bytes
            locked_key BLOB NOT NULL,          -- private key sealed by the passphrase key
            created_at INTEGER NOT NULL
        );

        CREATE TABLE user_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            public_key BLOB NOT NULL,
            private INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE group_members (
            group_id TEXT NOT NULL REFERENCES user_groups(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            wrapped_key BLOB NOT NULL,         -- group private key wrapped for the member
            wrapped_ephemeral BLOB NOT NULL,
            wrapped_nonce BLOB NOT NULL,
            manager INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (group_id, user_id)
        );

        CREATE TABLE vaults (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            owner_id TEXT REFERENCES users(id), -- set for personal vaults
            mandatory_fields TEXT NOT NULL,     -- JSON array
            created_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE folders (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            vault_id TEXT NOT NULL REFERENCES vaults(id),
            parent_id TEXT REFERENCES folders(id),
            created_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE secrets (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            vault_id TEXT NOT NULL REFERENCES vaults(id),
            folder_id TEXT REFERENCES folders(id),
            blocks BLOB NOT NULL,              -- CBOR array of sealed blocks
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        -- Grants on vaults and folders.
        CREATE TABLE node_grants (
            node_kind TEXT NOT NULL CHECK (node_kind IN ('vault', 'folder')),
            node_id TEXT NOT NULL,
            group_id TEXT NOT NULL REFERENCES user_groups(id),
            can_write INTEGER NOT NULL,
            partial INTEGER NOT NULL,
            CHECK (NOT (partial = 1 AND can_write = 1)),
            PRIMARY KEY (node_kind, node_id, group_id)
        );

        -- Grants on secrets, each carrying the content key wrapped for the group.
        CREATE TABLE secret_grants (
            secret_id TEXT NOT NULL REFERENCES secrets(id),
            group_id TEXT NOT NULL REFERENCES user_groups(id),
            can_write INTEGER NOT NULL,
            wrapped_key BLOB NOT NULL,
            wrapped_ephemeral BLOB NOT NULL,
            wrapped_nonce BLOB NOT NULL,
            PRIMARY KEY (secret_id, group_id)
        );

        CREATE TABLE share_processes (
            id TEXT PRIMARY KEY,
            scope_kind TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            vault_id TEXT NOT NULL,
            cascade_subtree INTEGER NOT NULL,
            requested TEXT NOT NULL,           -- JSON array of grant requests
            status TEXT NOT NULL,
            total_items INTEGER NOT NULL DEFAULT 0,
            processed_items INTEGER NOT NULL DEFAULT 0,
            failed_items INTEGER NOT NULL DEFAULT 0,
            message TEXT,
            initiator_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER
        );

        CREATE TABLE share_items (
            id TEXT PRIMARY KEY,
            process_id TEXT NOT NULL REFERENCES share_processes(id),
            target_kind TEXT NOT NULL,
            target_id TEXT NOT NULL,
            status TEXT NOT NULL,
            message TEXT,
            UNIQUE (process_id, target_kind, target_id)
        );

        CREATE TABLE jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,             -- JSON
            status TEXT NOT NULL,              -- queued | claimed | done
            enqueued_at INTEGER NOT NULL,
            claimed_at INTEGER,
            completed_at INTEGER
        );

        CREATE TABLE audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            actor_id TEXT NOT NULL,
            target_kind TEXT NOT NULL,
            target_id TEXT NOT NULL,
            diff TEXT NOT NULL,                -- JSON {add, remove, update}
            at INTEGER NOT NULL
        );

        CREATE INDEX idx_group_members_user ON group_members(user_id);
        CREATE INDEX idx_folders_vault ON folders(vault_id);
        CREATE INDEX idx_folders_parent ON folders(parent_id);
        CREATE INDEX idx_secrets_vault ON secrets(vault_id);
        CREATE INDEX idx_secrets_folder ON secrets(folder_id);
        CREATE INDEX idx_node_grants_group ON node_grants(group_id);
        CREATE INDEX idx_secret_grants_group ON secret_grants(group_id);
        CREATE INDEX idx_share_processes_status ON share_processes(status, updated_at);
        CREATE INDEX idx_share_items_pending ON share_items(process_id, target_kind, status);
        CREATE INDEX idx_jobs_status ON jobs(status, id);
        CREATE INDEX idx_audit_target ON audit_log(target_kind, target_id);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "users",
            "user_groups",
            "group_members",
            "vaults",
            "folders",
            "secrets",
            "node_grants",
            "secret_grants",
            "share_processes",
            "share_items",
            "jobs",
            "audit_log",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_partial_write_rows_rejected_by_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let result = conn.execute(
            "INSERT INTO node_grants (node_kind, node_id, group_id, can_write, partial)
             VALUES ('folder', 'f', 'g', 1, 1)",
            [],
        );
        assert!(result.is_err());
    }
}
