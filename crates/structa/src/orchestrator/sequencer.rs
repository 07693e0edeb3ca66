//! Stage sequencing.
//!
//! When an automatic stage completes, the sequencer enqueues its successor
//! with the completed stage's output as payload. Completing the final
//! automatic stage completes the document instead. Export jobs sequence
//! nothing.

use std::sync::Arc;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::db::{job_repo, Database};
use crate::db::job_repo::JobRow;
use crate::error::Result;
use crate::events::{EventBus, JobEvent, JobStatus};
use crate::stage::StageKind;

use super::status::StatusAggregator;

#[derive(Clone)]
pub struct Sequencer {
    db: Database,
    events: EventBus,
    aggregator: StatusAggregator,
    wake: Arc<Notify>,
}

impl Sequencer {
    pub fn new(
        db: Database,
        events: EventBus,
        aggregator: StatusAggregator,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            db,
            events,
            aggregator,
            wake,
        }
    }

    /// React to a completed job: enqueue the next stage or finish the
    /// document.
    pub fn on_stage_completed(&self, job: &JobRow) -> Result<()> {
        let Some(kind) = StageKind::parse(&job.kind) else {
            tracing::warn!(job_id = %job.id, kind = %job.kind, "completed job has unknown kind, nothing to sequence");
            return Ok(());
        };

        if let Some(next) = kind.successor() {
            let next_id = Uuid::new_v4().to_string();
            let inserted = job_repo::insert_next_stage(
                &self.db,
                &next_id,
                &job.document_id,
                next.as_str(),
                job.priority,
                job.result.as_deref(),
                job.max_attempts,
            )?;
            if inserted {
                tracing::debug!(
                    document_id = %job.document_id,
                    stage = %next,
                    job_id = %next_id,
                    "enqueued next stage"
                );
                self.events.publish(JobEvent::new(
                    &job.document_id,
                    &next_id,
                    next,
                    JobStatus::Pending,
                ));
                self.wake.notify_one();
            } else {
                tracing::debug!(
                    document_id = %job.document_id,
                    stage = %next,
                    "next stage already queued, skipping"
                );
            }
        } else if kind.is_final_automatic() {
            self.aggregator.mark_completed(&job.document_id)?;
        }

        Ok(())
    }
}
