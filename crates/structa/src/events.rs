//! Broadcast channel for job lifecycle events.
//!
//! Every status change a job goes through is published here so UIs and
//! log sinks can follow processing live. Subscribers that fall behind
//! lose the oldest events, never block the pipeline.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::stage::StageKind;

pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub document_id: String,
    pub job_id: String,
    pub kind: StageKind,
    pub status: JobStatus,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl JobEvent {
    pub fn new(document_id: &str, job_id: &str, kind: StageKind, status: JobStatus) -> Self {
        Self {
            document_id: document_id.to_string(),
            job_id: job_id.to_string(),
            kind,
            status,
            attempts: 0,
            message: None,
            error: None,
            timestamp: crate::db::now_timestamp(),
        }
    }

    pub fn with_attempts(mut self, attempts: i64) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Nobody listening is fine.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(
            JobEvent::new("doc-1", "job-1", StageKind::Ocr, JobStatus::Processing)
                .with_attempts(1),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.document_id, "doc-1");
        assert_eq!(event.kind, StageKind::Ocr);
        assert_eq!(event.status, JobStatus::Processing);
        assert_eq!(event.attempts, 1);
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(8);
        bus.publish(JobEvent::new(
            "doc-1",
            "job-1",
            StageKind::Preprocess,
            JobStatus::Completed,
        ));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = JobEvent::new("doc-1", "job-1", StageKind::TableExtraction, JobStatus::Failed)
            .with_error("worker unreachable");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["documentId"], "doc-1");
        assert_eq!(json["kind"], "table_extraction");
        assert_eq!(json["error"], "worker unreachable");
        assert!(json.get("message").is_none());
    }
}
