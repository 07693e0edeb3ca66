//! Versioned schema migrations.
//!
//! Each migration is an SQL script applied exactly once, tracked in the
//! `_migrations` table. Migrations run inside a transaction so a failed
//! script leaves the schema untouched.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_documents",
        sql: include_str!("sql/001_create_documents.sql"),
    },
    Migration {
        version: 2,
        name: "create_jobs",
        sql: include_str!("sql/002_create_jobs.sql"),
    },
];

pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.name, super::now_timestamp()],
        )?;
        tx.commit()?;
        log::debug!(
            "Applied migration {:03}_{}",
            migration.version,
            migration.name
        );
    }

    Ok(())
}
