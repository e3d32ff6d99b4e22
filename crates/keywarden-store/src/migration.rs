//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration transforms the schema
//! from version N to N+1 and is recorded in `schema_migrations`.

use rusqlite::Connection;

use keywarden_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
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

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

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
        CREATE TABLE users (
            user_id BLOB PRIMARY KEY,           -- 16 bytes, UUID
            email TEXT NOT NULL UNIQUE,
            public_key BLOB,                    -- 32 bytes, NULL until verified
            sealed_private_key BLOB,            -- CBOR PasswordSealedKey
            private_group_id BLOB
        );

        CREATE TABLE access_groups (
            group_id BLOB PRIMARY KEY,
            name TEXT NOT NULL,
            private INTEGER NOT NULL,
            public_key BLOB NOT NULL
        );

        CREATE TABLE group_members (
            group_id BLOB NOT NULL REFERENCES access_groups(group_id),
            user_id BLOB NOT NULL REFERENCES users(user_id),
            wrapped_group_key BLOB NOT NULL,    -- CBOR WrappedSecret
            is_manager INTEGER NOT NULL,
            PRIMARY KEY (group_id, user_id)
        );

        CREATE TABLE resources (
            resource_id BLOB PRIMARY KEY,
            kind TEXT NOT NULL,                 -- vault | folder | password
            vault_id BLOB,
            folder_id BLOB,
            grants_version INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE grants (
            resource_id BLOB NOT NULL REFERENCES resources(resource_id),
            group_id BLOB NOT NULL REFERENCES access_groups(group_id),
            can_write INTEGER NOT NULL,
            partial INTEGER NOT NULL,
            PRIMARY KEY (resource_id, group_id)
        );

        CREATE TABLE resource_keys (
            resource_id BLOB NOT NULL REFERENCES resources(resource_id),
            group_id BLOB NOT NULL REFERENCES access_groups(group_id),
            wrapped BLOB NOT NULL,              -- CBOR WrappedSecret
            PRIMARY KEY (resource_id, group_id)
        );

        CREATE TABLE share_processes (
            process_id BLOB PRIMARY KEY,
            target_id BLOB NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            record BLOB NOT NULL                -- CBOR ShareProcess
        );

        CREATE INDEX idx_members_user ON group_members(user_id);
        CREATE INDEX idx_resources_vault ON resources(vault_id);
        CREATE INDEX idx_resources_folder ON resources(folder_id);
        CREATE INDEX idx_share_status ON share_processes(status);
        CREATE INDEX idx_share_target ON share_processes(target_id);
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
            "access_groups",
            "group_members",
            "resources",
            "grants",
            "resource_keys",
            "share_processes",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }
}
