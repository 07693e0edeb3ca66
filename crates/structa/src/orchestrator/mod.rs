//! The orchestration facade.
//!
//! [`Orchestrator`] wires the executor, dispatcher, sequencer and status
//! aggregator together and exposes the operations the outer surfaces call:
//! create and delete documents, start processing, request exports, cancel,
//! and report status.

mod dispatcher;
mod executor;
mod inline;
mod sequencer;
mod status;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::db::{document_repo, job_repo, Database};
use crate::error::{DocumentError, Result};
use crate::events::EventBus;
use crate::processor::ProcessorRegistry;
use crate::stage::StageKind;

pub use dispatcher::Dispatcher;
pub use executor::{ExecutionOutcome, StageExecutor};
pub use inline::InlineDispatcher;
pub use sequencer::Sequencer;
pub use status::{DocumentStatus, StatusAggregator, StatusReport};

/// Priority for on-demand export jobs. Exports jump the automatic chain.
const EXPORT_PRIORITY: i64 = 10;

enum Dispatch {
    Pooled(Arc<Dispatcher>),
    Inline(InlineDispatcher),
}

pub struct Orchestrator {
    db: Database,
    config: OrchestratorConfig,
    events: EventBus,
    aggregator: StatusAggregator,
    wake: Arc<Notify>,
    dispatch: Dispatch,
}

impl Orchestrator {
    /// Pooled orchestrator: jobs run on background tasks, bounded by
    /// `workerCount`. Call [`run`](Self::run) to start the loop.
    pub fn new(db: Database, config: OrchestratorConfig, registry: ProcessorRegistry) -> Self {
        let (events, aggregator, wake, executor) = Self::wire(&db, &config, registry);
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            executor,
            config.worker_count,
            config.poll_interval(),
            wake.clone(),
        ));
        Self {
            db,
            config,
            events,
            aggregator,
            wake,
            dispatch: Dispatch::Pooled(dispatcher),
        }
    }

    /// Inline orchestrator: `start_processing` and `request_export` drive
    /// the whole chain on the caller's task before returning.
    pub fn new_inline(
        db: Database,
        config: OrchestratorConfig,
        registry: ProcessorRegistry,
    ) -> Self {
        let (events, aggregator, wake, executor) = Self::wire(&db, &config, registry);
        let inline = InlineDispatcher::new(db.clone(), executor);
        Self {
            db,
            config,
            events,
            aggregator,
            wake,
            dispatch: Dispatch::Inline(inline),
        }
    }

    fn wire(
        db: &Database,
        config: &OrchestratorConfig,
        registry: ProcessorRegistry,
    ) -> (EventBus, StatusAggregator, Arc<Notify>, Arc<StageExecutor>) {
        let events = EventBus::new(config.event_capacity);
        let aggregator = StatusAggregator::new(db.clone());
        let wake = Arc::new(Notify::new());
        let sequencer = Sequencer::new(db.clone(), events.clone(), aggregator.clone(), wake.clone());
        let executor = Arc::new(StageExecutor::new(
            db.clone(),
            registry,
            config.clone(),
            events.clone(),
            aggregator.clone(),
            sequencer,
        ));
        (events, aggregator, wake, executor)
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Run the pooled dispatch loop. No-op for an inline orchestrator.
    pub async fn run(&self) -> Result<()> {
        match &self.dispatch {
            Dispatch::Pooled(dispatcher) => Arc::clone(dispatcher).run().await,
            Dispatch::Inline(_) => Ok(()),
        }
    }

    pub fn shutdown(&self) {
        if let Dispatch::Pooled(dispatcher) = &self.dispatch {
            dispatcher.shutdown();
        }
    }

    /// Requeue jobs stranded in `processing` by an unclean shutdown. Run
    /// this once before the dispatch loop starts.
    pub fn recover_interrupted(&self) -> Result<u64> {
        let requeued = job_repo::reset_interrupted(&self.db)?;
        if requeued > 0 {
            tracing::info!(requeued, "requeued jobs interrupted by previous run");
            self.wake.notify_one();
        }
        Ok(requeued)
    }

    pub fn create_document(&self, owner_id: &str, page_count: i64) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        document_repo::insert(&self.db, &id, owner_id, page_count)?;
        tracing::info!(document_id = %id, owner_id, page_count, "document created");
        Ok(id)
    }

    /// Kick off the automatic chain for a pending document.
    pub async fn start_processing(&self, document_id: &str) -> Result<String> {
        self.aggregator.mark_processing(document_id)?;

        let job_id = Uuid::new_v4().to_string();
        job_repo::insert(
            &self.db,
            &job_id,
            document_id,
            StageKind::Preprocess.as_str(),
            0,
            None,
            self.config.max_attempts,
        )?;
        tracing::info!(document_id, job_id = %job_id, "processing started");
        self.kick(document_id).await?;
        Ok(job_id)
    }

    /// Enqueue an export for a completed document.
    pub async fn request_export(&self, document_id: &str) -> Result<String> {
        let doc = document_repo::find_by_id(&self.db, document_id)?
            .ok_or_else(|| DocumentError::NotFound(document_id.to_string()))?;
        if doc.status != "completed" {
            return Err(DocumentError::NotReady {
                document_id: document_id.to_string(),
                status: doc.status,
                expected: "completed".to_string(),
            }
            .into());
        }

        // A finished export can be re-requested, a live one cannot.
        if job_repo::has_active_stage(&self.db, document_id, StageKind::Export.as_str())? {
            return Err(DocumentError::AlreadyStarted(document_id.to_string()).into());
        }

        let job_id = Uuid::new_v4().to_string();
        job_repo::insert(
            &self.db,
            &job_id,
            document_id,
            StageKind::Export.as_str(),
            EXPORT_PRIORITY,
            None,
            self.config.max_attempts,
        )?;
        tracing::info!(document_id, job_id = %job_id, "export requested");
        self.kick(document_id).await?;
        Ok(job_id)
    }

    async fn kick(&self, document_id: &str) -> Result<()> {
        match &self.dispatch {
            Dispatch::Pooled(_) => {
                self.wake.notify_one();
            }
            Dispatch::Inline(inline) => {
                inline.run_document(document_id).await?;
            }
        }
        Ok(())
    }

    /// Cancel all live jobs of a document. A document caught mid-processing
    /// is failed with a cancellation note.
    pub fn cancel_document(&self, document_id: &str) -> Result<u64> {
        document_repo::find_by_id(&self.db, document_id)?
            .ok_or_else(|| DocumentError::NotFound(document_id.to_string()))?;

        let cancelled = job_repo::cancel_active_for_document(&self.db, document_id)?;
        self.aggregator
            .mark_failed(document_id, "processing cancelled")?;
        tracing::info!(document_id, cancelled, "document processing cancelled");
        Ok(cancelled)
    }

    /// Delete a document and all its jobs. Live jobs are cancelled first so
    /// in-flight results land on cancelled rows and get discarded.
    pub fn delete_document(&self, document_id: &str) -> Result<()> {
        job_repo::cancel_active_for_document(&self.db, document_id)?;
        if !document_repo::delete(&self.db, document_id)? {
            return Err(DocumentError::NotFound(document_id.to_string()).into());
        }
        tracing::info!(document_id, "document deleted");
        Ok(())
    }

    pub fn status(&self, document_id: &str) -> Result<StatusReport> {
        self.aggregator.status(document_id)
    }

    pub fn jobs(&self, document_id: &str) -> Result<Vec<JobView>> {
        document_repo::find_by_id(&self.db, document_id)?
            .ok_or_else(|| DocumentError::NotFound(document_id.to_string()))?;
        let rows = job_repo::list_by_document(&self.db, document_id)?;
        Ok(rows.into_iter().map(JobView::from_row).collect())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Job row shaped for API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl JobView {
    fn from_row(row: job_repo::JobRow) -> Self {
        let result = row
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            id: row.id,
            kind: row.kind,
            status: row.status,
            priority: row.priority,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            error: row.error,
            result,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProcessError, StructaError};
    use crate::processor::StageProcessor;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Ok200;

    #[async_trait]
    impl StageProcessor for Ok200 {
        fn name(&self) -> &'static str {
            "ok"
        }

        async fn process(&self, _: &str, _: &Value) -> std::result::Result<Value, ProcessError> {
            Ok(json!({"ok": true}))
        }
    }

    fn orchestrator() -> Orchestrator {
        let db = Database::open_in_memory().unwrap();
        let mut registry = ProcessorRegistry::new();
        for kind in StageKind::AUTO_CHAIN {
            registry.register(kind, Arc::new(Ok200));
        }
        registry.register(StageKind::Export, Arc::new(Ok200));
        Orchestrator::new_inline(db, OrchestratorConfig::default(), registry)
    }

    #[tokio::test]
    async fn test_full_document_lifecycle() {
        let orch = orchestrator();
        let doc_id = orch.create_document("user-1", 3).unwrap();

        assert_eq!(orch.status(&doc_id).unwrap().status, DocumentStatus::Pending);
        orch.start_processing(&doc_id).await.unwrap();

        let report = orch.status(&doc_id).unwrap();
        assert_eq!(report.status, DocumentStatus::Completed);
        assert_eq!(report.progress, 100);

        let jobs = orch.jobs(&doc_id).unwrap();
        assert_eq!(jobs.len(), 5);
        assert!(jobs.iter().all(|j| j.status == "completed"));
    }

    #[tokio::test]
    async fn test_export_requires_completed_document() {
        let orch = orchestrator();
        let doc_id = orch.create_document("user-1", 1).unwrap();

        assert!(matches!(
            orch.request_export(&doc_id).await.unwrap_err(),
            StructaError::Document(DocumentError::NotReady { .. })
        ));

        orch.start_processing(&doc_id).await.unwrap();
        let export_job = orch.request_export(&doc_id).await.unwrap();

        let jobs = orch.jobs(&doc_id).unwrap();
        let export = jobs.iter().find(|j| j.id == export_job).unwrap();
        assert_eq!(export.kind, "export");
        assert_eq!(export.status, "completed");
        assert_eq!(export.priority, EXPORT_PRIORITY);
        // Document stays completed; export never re-runs the chain.
        assert_eq!(
            orch.status(&doc_id).unwrap().status,
            DocumentStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_start_processing_twice_is_rejected() {
        let orch = orchestrator();
        let doc_id = orch.create_document("user-1", 1).unwrap();
        orch.start_processing(&doc_id).await.unwrap();

        assert!(matches!(
            orch.start_processing(&doc_id).await.unwrap_err(),
            StructaError::Document(DocumentError::AlreadyStarted(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_document_removes_jobs() {
        let orch = orchestrator();
        let doc_id = orch.create_document("user-1", 1).unwrap();
        orch.start_processing(&doc_id).await.unwrap();

        orch.delete_document(&doc_id).unwrap();
        assert!(matches!(
            orch.status(&doc_id).unwrap_err(),
            StructaError::Document(DocumentError::NotFound(_))
        ));
        assert!(matches!(
            orch.delete_document(&doc_id).unwrap_err(),
            StructaError::Document(DocumentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_marks_document_failed() {
        let db = Database::open_in_memory().unwrap();
        let orch = Orchestrator::new_inline(
            db.clone(),
            OrchestratorConfig::default(),
            ProcessorRegistry::new(),
        );
        let doc_id = orch.create_document("user-1", 1).unwrap();
        document_repo::mark_processing(&db, &doc_id).unwrap();
        job_repo::insert(&db, "j1", &doc_id, "ocr", 0, None, 3).unwrap();

        assert_eq!(orch.cancel_document(&doc_id).unwrap(), 1);
        let report = orch.status(&doc_id).unwrap();
        assert_eq!(report.status, DocumentStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("processing cancelled"));
    }
}
