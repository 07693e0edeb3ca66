//! Document-level status, derived from the document row and its jobs.

use serde::Serialize;

use crate::db::{document_repo, job_repo, Database};
use crate::error::{DocumentError, Result, StructaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn parse(s: &str) -> Option<DocumentStatus> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub document_id: String,
    pub status: DocumentStatus,
    /// Share of this document's jobs that have completed, 0-100.
    pub progress: u8,
    pub page_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Owns the document status transitions and the progress calculation.
#[derive(Clone)]
pub struct StatusAggregator {
    db: Database,
}

impl StatusAggregator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn status(&self, document_id: &str) -> Result<StatusReport> {
        let doc = document_repo::find_by_id(&self.db, document_id)?
            .ok_or_else(|| DocumentError::NotFound(document_id.to_string()))?;

        let status = DocumentStatus::parse(&doc.status).ok_or_else(|| {
            StructaError::Document(DocumentError::NotReady {
                document_id: document_id.to_string(),
                status: doc.status.clone(),
                expected: "a known status".to_string(),
            })
        })?;

        let (total, completed) = job_repo::counts_for_document(&self.db, document_id)?;
        let progress = if total == 0 {
            0
        } else {
            ((completed * 100) / total) as u8
        };

        Ok(StatusReport {
            document_id: doc.id,
            status,
            progress,
            page_count: doc.page_count,
            error: doc.error,
        })
    }

    /// Start processing: the document must exist, have pages, and still be
    /// pending.
    pub fn mark_processing(&self, document_id: &str) -> Result<()> {
        let doc = document_repo::find_by_id(&self.db, document_id)?
            .ok_or_else(|| DocumentError::NotFound(document_id.to_string()))?;
        if doc.page_count <= 0 {
            return Err(DocumentError::EmptyDocument(document_id.to_string()).into());
        }
        if !document_repo::mark_processing(&self.db, document_id)? {
            return Err(DocumentError::AlreadyStarted(document_id.to_string()).into());
        }
        Ok(())
    }

    /// Final automatic stage finished. Idempotent: a lost race means the
    /// document already left processing.
    pub fn mark_completed(&self, document_id: &str) -> Result<bool> {
        let applied = document_repo::mark_completed(&self.db, document_id)?;
        if applied {
            tracing::info!(document_id, "document completed");
        }
        Ok(applied)
    }

    /// A job exhausted its attempts. Idempotent like `mark_completed`.
    pub fn mark_failed(&self, document_id: &str, error: &str) -> Result<bool> {
        let applied = document_repo::mark_failed(&self.db, document_id, error)?;
        if applied {
            tracing::warn!(document_id, error, "document failed");
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{document_repo, job_repo};

    fn setup() -> (Database, StatusAggregator) {
        let db = Database::open_in_memory().unwrap();
        let aggregator = StatusAggregator::new(db.clone());
        (db, aggregator)
    }

    #[test]
    fn test_progress_counts_completed_jobs() {
        let (db, aggregator) = setup();
        document_repo::insert(&db, "doc-1", "user-1", 2).unwrap();
        for (id, kind) in [("j1", "preprocess"), ("j2", "ocr"), ("j3", "layout_detection")] {
            job_repo::insert(&db, id, "doc-1", kind, 0, None, 3).unwrap();
        }
        job_repo::claim(&db, "j1").unwrap();
        job_repo::complete(&db, "j1", "{}").unwrap();

        let report = aggregator.status("doc-1").unwrap();
        assert_eq!(report.progress, 33);
        assert_eq!(report.status, DocumentStatus::Pending);
    }

    #[test]
    fn test_progress_is_zero_without_jobs() {
        let (db, aggregator) = setup();
        document_repo::insert(&db, "doc-1", "user-1", 2).unwrap();
        assert_eq!(aggregator.status("doc-1").unwrap().progress, 0);
    }

    #[test]
    fn test_status_unknown_document() {
        let (_db, aggregator) = setup();
        let err = aggregator.status("missing").unwrap_err();
        assert!(matches!(
            err,
            StructaError::Document(DocumentError::NotFound(_))
        ));
    }

    #[test]
    fn test_mark_processing_guards() {
        let (db, aggregator) = setup();
        document_repo::insert(&db, "doc-empty", "user-1", 0).unwrap();
        assert!(matches!(
            aggregator.mark_processing("doc-empty").unwrap_err(),
            StructaError::Document(DocumentError::EmptyDocument(_))
        ));

        document_repo::insert(&db, "doc-1", "user-1", 2).unwrap();
        aggregator.mark_processing("doc-1").unwrap();
        assert!(matches!(
            aggregator.mark_processing("doc-1").unwrap_err(),
            StructaError::Document(DocumentError::AlreadyStarted(_))
        ));
    }

    #[test]
    fn test_completion_and_failure_are_idempotent() {
        let (db, aggregator) = setup();
        document_repo::insert(&db, "doc-1", "user-1", 1).unwrap();
        aggregator.mark_processing("doc-1").unwrap();

        assert!(aggregator.mark_completed("doc-1").unwrap());
        assert!(!aggregator.mark_completed("doc-1").unwrap());
        assert!(!aggregator.mark_failed("doc-1", "late failure").unwrap());
    }
}
