//! Job rows and the claim/complete/retry lifecycle.
//!
//! A job moves pending -> processing -> completed | failed | cancelled, with
//! processing -> pending on a retryable failure. Every transition is a
//! compare-and-set on the current status so concurrent workers and
//! cancellation cannot double-apply an outcome. `run_after` delays a retried
//! job until its backoff expires; dispatch order is priority first, then age.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_timestamp, Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub document_id: String,
    pub kind: String,
    pub status: String,
    pub priority: i64,
    pub payload: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub attempts: i64,
    pub max_attempts: i64,
    pub run_after: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            kind: row.get("kind")?,
            status: row.get("status")?,
            priority: row.get("priority")?,
            payload: row.get("payload")?,
            result: row.get("result")?,
            error: row.get("error")?,
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            run_after: row.get("run_after")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

pub fn insert(
    db: &Database,
    id: &str,
    document_id: &str,
    kind: &str,
    priority: i64,
    payload: Option<&str>,
    max_attempts: i64,
) -> Result<JobRow, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, document_id, kind, status, priority, payload, max_attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?7)",
            params![id, document_id, kind, priority, payload, max_attempts, now],
        )?;
        Ok(())
    })?;
    find_by_id(db, id)?.ok_or_else(|| DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?)
    })
}

pub fn list_by_document(db: &Database, document_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE document_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![document_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// (total, completed) job counts for retrospective progress.
pub fn counts_for_document(db: &Database, document_id: &str) -> Result<(i64, i64), DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0)
             FROM jobs WHERE document_id = ?1",
            params![document_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
    })
}

/// pending -> processing. Returns the claimed row, or `None` if another
/// worker (or a cancellation) got there first.
pub fn claim(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let now = now_timestamp();
    let claimed = db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE jobs SET status = 'processing', started_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now],
        )?;
        Ok(affected > 0)
    })?;
    if claimed {
        find_by_id(db, id)
    } else {
        Ok(None)
    }
}

/// processing -> completed with the stage result.
pub fn complete(db: &Database, id: &str, result: &str) -> Result<bool, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE jobs SET status = 'completed', result = ?2, error = NULL,
                    completed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![id, result, now],
        )?;
        Ok(affected > 0)
    })
}

/// processing -> failed once attempts are exhausted.
pub fn mark_failed(
    db: &Database,
    id: &str,
    error: &str,
    attempts: i64,
) -> Result<bool, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE jobs SET status = 'failed', error = ?2, attempts = ?3,
                    completed_at = ?4, updated_at = ?4
             WHERE id = ?1 AND status = 'processing'",
            params![id, error, attempts, now],
        )?;
        Ok(affected > 0)
    })
}

/// processing -> pending for a retry, recording the attempt and the earliest
/// time the job may run again.
pub fn reset_for_retry(
    db: &Database,
    id: &str,
    error: &str,
    attempts: i64,
    run_after: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE jobs SET status = 'pending', error = ?2, attempts = ?3,
                    run_after = ?4, started_at = NULL, updated_at = ?5
             WHERE id = ?1 AND status = 'processing'",
            params![id, error, attempts, run_after, now_timestamp()],
        )?;
        Ok(affected > 0)
    })
}

/// Requeue jobs left processing by a previous run. The interrupted attempt
/// does not count against the job.
pub fn reset_interrupted(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE jobs SET status = 'pending', started_at = NULL, updated_at = ?1
             WHERE status = 'processing'",
            params![now_timestamp()],
        )?;
        Ok(affected as u64)
    })
}

/// Cancel every pending and processing job of a document.
pub fn cancel_active_for_document(
    db: &Database,
    document_id: &str,
) -> Result<u64, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?2, updated_at = ?2
             WHERE document_id = ?1 AND status IN ('pending', 'processing')",
            params![document_id, now],
        )?;
        Ok(affected as u64)
    })
}

/// The next job eligible for dispatch: pending, past its backoff, highest
/// priority first, oldest first within a priority.
pub fn next_runnable(db: &Database, now: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM jobs
                 WHERE status = 'pending' AND (run_after IS NULL OR run_after <= ?1)
                 ORDER BY priority DESC, created_at ASC, rowid ASC
                 LIMIT 1",
                params![now],
                JobRow::from_row,
            )
            .optional()?)
    })
}

pub fn has_active_for_document(db: &Database, document_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs
             WHERE document_id = ?1 AND status IN ('pending', 'processing')",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Whether a pending or processing job of `kind` exists for the document.
pub fn has_active_stage(
    db: &Database,
    document_id: &str,
    kind: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs
             WHERE document_id = ?1 AND kind = ?2 AND status IN ('pending', 'processing')",
            params![document_id, kind],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Enqueue the successor stage of a completed job, unless a non-cancelled
/// job of that kind already exists for the document. Returns whether a row
/// was inserted.
pub fn insert_next_stage(
    db: &Database,
    id: &str,
    document_id: &str,
    kind: &str,
    priority: i64,
    payload: Option<&str>,
    max_attempts: i64,
) -> Result<bool, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        let affected = conn.execute(
            "INSERT INTO jobs (id, document_id, kind, status, priority, payload, max_attempts, created_at, updated_at)
             SELECT ?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?7
             WHERE NOT EXISTS (
                 SELECT 1 FROM jobs
                 WHERE document_id = ?2 AND kind = ?3 AND status != 'cancelled'
             )",
            params![id, document_id, kind, priority, payload, max_attempts, now],
        )?;
        Ok(affected > 0)
    })
}

/// The oldest pending job of a document, backoff ignored. Used by the inline
/// dispatcher to walk the chain without sleeping.
pub fn next_pending_for_document(
    db: &Database,
    document_id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM jobs
                 WHERE document_id = ?1 AND status = 'pending'
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT 1",
                params![document_id],
                JobRow::from_row,
            )
            .optional()?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::document_repo;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        document_repo::insert(&db, "doc-1", "user-1", 2).unwrap();
        db
    }

    #[test]
    fn test_claim_is_exclusive() {
        let db = test_db();
        insert(&db, "job-1", "doc-1", "preprocess", 0, None, 3).unwrap();

        let claimed = claim(&db, "job-1").unwrap().unwrap();
        assert_eq!(claimed.status, "processing");
        assert!(claimed.started_at.is_some());

        // Already claimed, second claim returns nothing.
        assert!(claim(&db, "job-1").unwrap().is_none());
    }

    #[test]
    fn test_complete_requires_processing() {
        let db = test_db();
        insert(&db, "job-1", "doc-1", "preprocess", 0, None, 3).unwrap();

        assert!(!complete(&db, "job-1", "{}").unwrap());
        claim(&db, "job-1").unwrap();
        assert!(complete(&db, "job-1", r#"{"pages":2}"#).unwrap());

        let job = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.result.as_deref(), Some(r#"{"pages":2}"#));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_retry_resets_to_pending_with_backoff() {
        let db = test_db();
        insert(&db, "job-1", "doc-1", "ocr", 0, None, 3).unwrap();
        claim(&db, "job-1").unwrap();

        let future = "2999-01-01T00:00:00.000Z";
        assert!(reset_for_retry(&db, "job-1", "timeout", 1, future).unwrap());

        let job = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(job.status, "pending");
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_none());

        // Backoff hides it from dispatch until run_after passes.
        assert!(next_runnable(&db, &now_timestamp()).unwrap().is_none());
        assert!(next_runnable(&db, "2999-06-01T00:00:00.000Z")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_next_runnable_orders_by_priority_then_age() {
        let db = test_db();
        document_repo::insert(&db, "doc-2", "user-1", 1).unwrap();
        document_repo::insert(&db, "doc-3", "user-1", 1).unwrap();
        insert(&db, "job-old", "doc-1", "preprocess", 0, None, 3).unwrap();
        insert(&db, "job-new", "doc-2", "preprocess", 0, None, 3).unwrap();
        insert(&db, "job-hot", "doc-3", "preprocess", 5, None, 3).unwrap();

        let now = now_timestamp();
        let first = next_runnable(&db, &now).unwrap().unwrap();
        assert_eq!(first.id, "job-hot");

        claim(&db, "job-hot").unwrap();
        let second = next_runnable(&db, &now).unwrap().unwrap();
        assert_eq!(second.id, "job-old");
    }

    #[test]
    fn test_same_timestamp_jobs_keep_insertion_order() {
        let db = test_db();
        document_repo::insert(&db, "doc-2", "user-1", 1).unwrap();
        document_repo::insert(&db, "doc-3", "user-1", 1).unwrap();
        // Ids sort against insertion order on purpose; all three land in
        // the same millisecond.
        insert(&db, "zzz-first", "doc-1", "preprocess", 0, None, 3).unwrap();
        insert(&db, "mmm-second", "doc-2", "preprocess", 0, None, 3).unwrap();
        insert(&db, "aaa-third", "doc-3", "preprocess", 0, None, 3).unwrap();

        let now = now_timestamp();
        let mut dispatched = Vec::new();
        while let Some(job) = next_runnable(&db, &now).unwrap() {
            claim(&db, &job.id).unwrap();
            dispatched.push(job.id);
        }
        assert_eq!(dispatched, ["zzz-first", "mmm-second", "aaa-third"]);
    }

    #[test]
    fn test_list_by_document_keeps_insertion_order() {
        let db = test_db();
        insert(&db, "zz-1", "doc-1", "preprocess", 0, None, 3).unwrap();
        insert(&db, "aa-2", "doc-1", "ocr", 0, None, 3).unwrap();

        let kinds: Vec<String> = list_by_document(&db, "doc-1")
            .unwrap()
            .into_iter()
            .map(|j| j.kind)
            .collect();
        assert_eq!(kinds, ["preprocess", "ocr"]);
    }

    #[test]
    fn test_insert_next_stage_skips_existing_kind() {
        let db = test_db();
        insert(&db, "job-1", "doc-1", "ocr", 0, None, 3).unwrap();

        assert!(!insert_next_stage(&db, "job-2", "doc-1", "ocr", 0, None, 3).unwrap());
        assert!(insert_next_stage(&db, "job-3", "doc-1", "layout_detection", 0, None, 3).unwrap());

        // A cancelled job does not block re-enqueueing its kind.
        cancel_active_for_document(&db, "doc-1").unwrap();
        assert!(insert_next_stage(&db, "job-4", "doc-1", "ocr", 0, None, 3).unwrap());
    }

    #[test]
    fn test_cancel_active_leaves_finished_jobs() {
        let db = test_db();
        insert(&db, "job-1", "doc-1", "preprocess", 0, None, 3).unwrap();
        insert(&db, "job-2", "doc-1", "ocr", 0, None, 3).unwrap();
        claim(&db, "job-1").unwrap();
        complete(&db, "job-1", "{}").unwrap();
        claim(&db, "job-2").unwrap();

        assert_eq!(cancel_active_for_document(&db, "doc-1").unwrap(), 1);
        let job1 = find_by_id(&db, "job-1").unwrap().unwrap();
        let job2 = find_by_id(&db, "job-2").unwrap().unwrap();
        assert_eq!(job1.status, "completed");
        assert_eq!(job2.status, "cancelled");

        // The cancelled job cannot be completed by a late worker.
        assert!(!complete(&db, "job-2", "{}").unwrap());
    }

    #[test]
    fn test_reset_interrupted_requeues_processing_jobs() {
        let db = test_db();
        insert(&db, "job-1", "doc-1", "preprocess", 0, None, 3).unwrap();
        insert(&db, "job-2", "doc-1", "ocr", 0, None, 3).unwrap();
        claim(&db, "job-1").unwrap();

        assert_eq!(reset_interrupted(&db).unwrap(), 1);
        let job = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(job.status, "pending");
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_counts_for_document() {
        let db = test_db();
        insert(&db, "job-1", "doc-1", "preprocess", 0, None, 3).unwrap();
        insert(&db, "job-2", "doc-1", "ocr", 0, None, 3).unwrap();
        claim(&db, "job-1").unwrap();
        complete(&db, "job-1", "{}").unwrap();

        assert_eq!(counts_for_document(&db, "doc-1").unwrap(), (2, 1));
        assert_eq!(counts_for_document(&db, "doc-none").unwrap(), (0, 0));
    }
}
