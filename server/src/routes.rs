//! HTTP routes for the orchestrator.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use structa::{DocumentError, Orchestrator, StructaError};

type AppState = Arc<Orchestrator>;

pub fn router(orchestrator: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/documents", post(create_document))
        .route("/documents/:id", delete(delete_document))
        .route("/documents/:id/process", post(start_processing))
        .route("/documents/:id/status", get(document_status))
        .route("/documents/:id/jobs", get(document_jobs))
        .route("/documents/:id/export", post(request_export))
        .with_state(orchestrator)
}

/// Orchestrator errors mapped to HTTP statuses.
struct ApiError(StructaError);

impl From<StructaError> for ApiError {
    fn from(err: StructaError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StructaError::Document(DocumentError::NotFound(_)) => StatusCode::NOT_FOUND,
            StructaError::Document(DocumentError::EmptyDocument(_)) => StatusCode::BAD_REQUEST,
            StructaError::Document(DocumentError::AlreadyStarted(_))
            | StructaError::Document(DocumentError::NotReady { .. }) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = json!({ "success": false, "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDocumentRequest {
    owner_id: String,
    #[serde(default)]
    page_count: i64,
}

async fn create_document(
    State(orchestrator): State<AppState>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let document_id = orchestrator.create_document(&req.owner_id, req.page_count)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "documentId": document_id })),
    ))
}

async fn start_processing(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = orchestrator.start_processing(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "jobId": job_id })),
    ))
}

async fn document_status(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = orchestrator.status(&id)?;
    Ok(Json(json!({ "success": true, "document": report })))
}

async fn document_jobs(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = orchestrator.jobs(&id)?;
    Ok(Json(json!({ "success": true, "jobs": jobs })))
}

async fn request_export(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = orchestrator.request_export(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "jobId": job_id })),
    ))
}

async fn delete_document(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    orchestrator.delete_document(&id)?;
    Ok(Json(json!({ "success": true })))
}
