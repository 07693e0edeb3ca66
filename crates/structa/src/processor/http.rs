//! HTTP client for the AI worker service.
//!
//! Each stage maps to one POST endpoint. The worker answers with an
//! envelope: `{"success": bool, "data": ..., "error": ...}`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ProcessError;
use crate::stage::StageKind;

use super::StageProcessor;

pub struct HttpStageProcessor {
    client: reqwest::Client,
    url: String,
    kind: StageKind,
}

fn endpoint(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Preprocess => "/preprocess",
        StageKind::Ocr => "/ocr",
        StageKind::LayoutDetection => "/layout",
        StageKind::TableExtraction => "/tables",
        StageKind::Structuring => "/structure",
        StageKind::Export => "/export",
    }
}

#[derive(Deserialize)]
struct WorkerResponse {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    processing_time_ms: Option<u64>,
}

impl HttpStageProcessor {
    pub fn new(base_url: &str, kind: StageKind) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}{}", base_url.trim_end_matches('/'), endpoint(kind)),
            kind,
        }
    }
}

#[async_trait]
impl StageProcessor for HttpStageProcessor {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    async fn process(&self, document_id: &str, payload: &Value) -> Result<Value, ProcessError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "documentId": document_id, "payload": payload }))
            .send()
            .await
            .map_err(|e| ProcessError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProcessError::Http(format!(
                "{} returned {}",
                self.url, status
            )));
        }

        let body: WorkerResponse = response
            .json()
            .await
            .map_err(|e| ProcessError::InvalidResponse(e.to_string()))?;

        if let Some(ms) = body.processing_time_ms {
            tracing::debug!(stage = %self.kind, document_id, elapsed_ms = ms, "worker finished");
        }

        if body.success {
            Ok(body.data.unwrap_or(Value::Null))
        } else {
            Err(ProcessError::Failed {
                stage: self.kind.as_str().to_string(),
                reason: body
                    .error
                    .unwrap_or_else(|| "worker reported failure without detail".to_string()),
            })
        }
    }
}
