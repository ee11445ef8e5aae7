//! Schema migration runner for the directory database.
//!
//! Migrations are embedded with [`include_str!`] and applied in version order,
//! each in its own transaction. The `schema_version` table records what has
//! been applied, so running the migrator again is a no-op.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Users, team membership, team channels, direct conversations",
    sql: include_str!("v001_schema.sql"),
}];

/// Apply every pending migration. Returns how many were applied.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied, skipping");
            continue;
        }
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply_migration(conn, migration)?;
        applied += 1;
    }

    Ok(applied)
}

/// Highest applied version, or 0.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| migration_error(format!("failed to read schema_version: {e}")))
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| migration_error(format!("failed to create schema_version table: {e}")))
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| migration_error(format!("v{}: begin failed: {e}", migration.version)))?;

    tx.execute_batch(migration.sql).map_err(|e| {
        migration_error(format!(
            "v{} ({}) failed: {e}",
            migration.version, migration.description
        ))
    })?;

    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description) \
             VALUES (?1, datetime('now'), ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(|e| migration_error(format!("v{}: record failed: {e}", migration.version)))?;

    tx.commit()
        .map_err(|e| migration_error(format!("v{}: commit failed: {e}", migration.version)))
}

fn migration_error(message: String) -> StoreError {
    StoreError::Migration { message }
}
