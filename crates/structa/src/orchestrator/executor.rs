//! Single-job execution.
//!
//! The executor takes a claimed job, runs its processor under the stage
//! timeout, and applies exactly one outcome. Outcomes are compare-and-set
//! updates, so a job cancelled mid-flight keeps its cancelled status and the
//! late worker result is discarded.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::config::OrchestratorConfig;
use crate::db::{format_timestamp, job_repo, Database};
use crate::db::job_repo::JobRow;
use crate::error::{DispatchError, Result};
use crate::events::{EventBus, JobEvent, JobStatus};
use crate::stage::StageKind;

use super::sequencer::Sequencer;
use super::status::StatusAggregator;
use crate::processor::ProcessorRegistry;

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    /// The job failed and went back to pending with a backoff.
    Retrying { attempts: i64, delay: Duration },
    /// Attempts exhausted, job and document are failed.
    Failed,
    /// The outcome was discarded because the job left processing while the
    /// worker ran (cancellation, typically).
    Discarded,
}

pub struct StageExecutor {
    db: Database,
    registry: ProcessorRegistry,
    config: OrchestratorConfig,
    events: EventBus,
    aggregator: StatusAggregator,
    sequencer: Sequencer,
}

impl StageExecutor {
    pub fn new(
        db: Database,
        registry: ProcessorRegistry,
        config: OrchestratorConfig,
        events: EventBus,
        aggregator: StatusAggregator,
        sequencer: Sequencer,
    ) -> Self {
        Self {
            db,
            registry,
            config,
            events,
            aggregator,
            sequencer,
        }
    }

    /// Claim and run a pending job by id.
    pub async fn execute(&self, job_id: &str) -> Result<ExecutionOutcome> {
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;
        if job.status != "pending" {
            return Err(DispatchError::NotPending {
                job_id: job_id.to_string(),
                status: job.status,
            }
            .into());
        }
        match job_repo::claim(&self.db, job_id)? {
            Some(claimed) => self.run_claimed(claimed).await,
            None => Ok(ExecutionOutcome::Discarded),
        }
    }

    /// Run a job already claimed (status `processing`).
    pub async fn run_claimed(&self, job: JobRow) -> Result<ExecutionOutcome> {
        let Some(kind) = StageKind::parse(&job.kind) else {
            let reason = format!("unrecognized stage kind '{}'", job.kind);
            return self.fail_terminally(&job, job.attempts + 1, &reason);
        };
        let Some(processor) = self.registry.get(kind) else {
            let reason = format!("no processor registered for stage '{kind}'");
            return self.fail_terminally(&job, job.attempts + 1, &reason);
        };

        self.events.publish(
            JobEvent::new(&job.document_id, &job.id, kind, JobStatus::Processing)
                .with_attempts(job.attempts + 1),
        );

        let payload: Value = match &job.payload {
            Some(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
            None => Value::Null,
        };

        let timeout = self.config.stage_timeout(kind);
        let started = std::time::Instant::now();
        let outcome =
            tokio::time::timeout(timeout, processor.process(&job.document_id, &payload)).await;

        match outcome {
            Ok(Ok(result)) => {
                let raw = result.to_string();
                if !job_repo::complete(&self.db, &job.id, &raw)? {
                    tracing::warn!(
                        job_id = %job.id,
                        stage = %kind,
                        "job left processing during execution, discarding result"
                    );
                    return Ok(ExecutionOutcome::Discarded);
                }
                tracing::info!(
                    document_id = %job.document_id,
                    job_id = %job.id,
                    stage = %kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "stage completed"
                );
                self.events.publish(
                    JobEvent::new(&job.document_id, &job.id, kind, JobStatus::Completed)
                        .with_attempts(job.attempts + 1),
                );
                let completed = job_repo::find_by_id(&self.db, &job.id)?
                    .ok_or_else(|| DispatchError::JobNotFound(job.id.clone()))?;
                self.sequencer.on_stage_completed(&completed)?;
                Ok(ExecutionOutcome::Completed)
            }
            Ok(Err(err)) => self.handle_failure(&job, kind, &err.to_string()),
            Err(_) => {
                let reason = format!("stage '{kind}' timed out after {}s", timeout.as_secs());
                self.handle_failure(&job, kind, &reason)
            }
        }
    }

    fn handle_failure(
        &self,
        job: &JobRow,
        kind: StageKind,
        reason: &str,
    ) -> Result<ExecutionOutcome> {
        let attempts = job.attempts + 1;
        if attempts >= job.max_attempts {
            return self.fail_terminally(job, attempts, reason);
        }

        let delay = self.config.retry_delay(attempts);
        let run_after = format_timestamp(
            Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64),
        );
        if !job_repo::reset_for_retry(&self.db, &job.id, reason, attempts, &run_after)? {
            return Ok(ExecutionOutcome::Discarded);
        }

        tracing::warn!(
            document_id = %job.document_id,
            job_id = %job.id,
            stage = %kind,
            attempts,
            max_attempts = job.max_attempts,
            delay_ms = delay.as_millis() as u64,
            reason,
            "stage failed, retrying"
        );
        self.events.publish(
            JobEvent::new(&job.document_id, &job.id, kind, JobStatus::Pending)
                .with_attempts(attempts)
                .with_error(reason),
        );
        Ok(ExecutionOutcome::Retrying { attempts, delay })
    }

    fn fail_terminally(
        &self,
        job: &JobRow,
        attempts: i64,
        reason: &str,
    ) -> Result<ExecutionOutcome> {
        if !job_repo::mark_failed(&self.db, &job.id, reason, attempts)? {
            return Ok(ExecutionOutcome::Discarded);
        }

        tracing::error!(
            document_id = %job.document_id,
            job_id = %job.id,
            kind = %job.kind,
            attempts,
            reason,
            "stage failed permanently"
        );
        if let Some(kind) = StageKind::parse(&job.kind) {
            self.events.publish(
                JobEvent::new(&job.document_id, &job.id, kind, JobStatus::Failed)
                    .with_attempts(attempts)
                    .with_error(reason),
            );
        }
        let doc_error = format!("stage '{}' failed: {reason}", job.kind);
        self.aggregator.mark_failed(&job.document_id, &doc_error)?;
        Ok(ExecutionOutcome::Failed)
    }
}
