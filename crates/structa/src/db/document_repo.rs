//! Document rows and their status transitions.
//!
//! Status changes are compare-and-set updates keyed on the current status,
//! returning whether the transition applied. Callers decide what a lost
//! race means.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_timestamp, Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub owner_id: String,
    pub status: String,
    pub page_count: i64,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            status: row.get("status")?,
            page_count: row.get("page_count")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert(
    db: &Database,
    id: &str,
    owner_id: &str,
    page_count: i64,
) -> Result<DocumentRow, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO documents (id, owner_id, status, page_count, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?4, ?4)",
            params![id, owner_id, page_count, now],
        )?;
        Ok(())
    })?;
    find_by_id(db, id)?.ok_or_else(|| DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id],
                DocumentRow::from_row,
            )
            .optional()?)
    })
}

/// Delete a document. Jobs go with it via `ON DELETE CASCADE`.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    })
}

pub fn set_page_count(db: &Database, id: &str, page_count: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE documents SET page_count = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, page_count, now_timestamp()],
        )?;
        Ok(())
    })
}

/// pending -> processing. Returns false if the document was not pending.
pub fn mark_processing(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE documents SET status = 'processing', error = NULL, updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now_timestamp()],
        )?;
        Ok(affected > 0)
    })
}

/// processing -> completed. Returns false if the document was not processing.
pub fn mark_completed(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE documents SET status = 'completed', updated_at = ?2
             WHERE id = ?1 AND status = 'processing'",
            params![id, now_timestamp()],
        )?;
        Ok(affected > 0)
    })
}

/// processing -> failed with a terminal error message.
pub fn mark_failed(db: &Database, id: &str, error: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE documents SET status = 'failed', error = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![id, error, now_timestamp()],
        )?;
        Ok(affected > 0)
    })
}
