//! Inline dispatch for tests and single-shot tooling.
//!
//! Runs a document's pending jobs on the caller's task, one at a time,
//! until the queue is empty or a job fails for good. Retries happen
//! immediately; the backoff delay is skipped on purpose so callers are
//! not left sleeping.

use std::sync::Arc;

use crate::db::{job_repo, Database};
use crate::error::Result;

use super::executor::{ExecutionOutcome, StageExecutor};

pub struct InlineDispatcher {
    db: Database,
    executor: Arc<StageExecutor>,
}

impl InlineDispatcher {
    pub fn new(db: Database, executor: Arc<StageExecutor>) -> Self {
        Self { db, executor }
    }

    /// Drive the document's job queue to quiescence. Returns the number of
    /// completed executions.
    pub async fn run_document(&self, document_id: &str) -> Result<u64> {
        let mut completed = 0;
        while let Some(job) = job_repo::next_pending_for_document(&self.db, document_id)? {
            let Some(claimed) = job_repo::claim(&self.db, &job.id)? else {
                continue;
            };
            match self.executor.run_claimed(claimed).await? {
                ExecutionOutcome::Completed => completed += 1,
                ExecutionOutcome::Retrying { attempts, .. } => {
                    tracing::debug!(job_id = %job.id, attempts, "retrying inline without delay");
                }
                ExecutionOutcome::Failed | ExecutionOutcome::Discarded => break,
            }
        }
        Ok(completed)
    }
}
