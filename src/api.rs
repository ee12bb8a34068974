//! HTTP surface for the knowledge engine.
//!
//! The router exposes a small set of endpoints:
//!
//! - `POST /ingest` – Queue a document on shared storage for asynchronous ingestion. Returns
//!   `202 Accepted` with the task id; `503` when the broker is unavailable.
//! - `POST /search` – Routed, schema-filtered retrieval returning scored snippets.
//! - `POST /ask` – Grounded question answering over retrieved context.
//! - `GET /collections` / `DELETE /collections/{name}` – Inspect and remove collections.
//! - `GET /metrics` – Pipeline counters persisted by the ingestion workers.
//! - `GET /status` – Liveness and configuration summary.
//!
//! Ingestion is fire-and-forget with respect to processing: `202` means the task is durably
//! queued, not that the document has been stored.

use crate::config::get_config;
use crate::service::{EngineApi, ServiceError};
use crate::vector::RetrievedChunk;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Build the HTTP router over an engine service.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: EngineApi + 'static,
{
    Router::new()
        .route("/ingest", post(ingest::<S>))
        .route("/search", post(search::<S>))
        .route("/ask", post(ask::<S>))
        .route("/collections", get(list_collections::<S>))
        .route("/collections/:name", delete(delete_collection::<S>))
        .route("/metrics", get(metrics::<S>))
        .route("/status", get(status))
        .with_state(service)
}

/// Request body for `POST /ingest`.
#[derive(Deserialize)]
struct IngestRequest {
    /// Path of the document on storage shared with the workers.
    file_path: String,
    /// Original filename; defaults to the path's final component.
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Serialize)]
struct IngestResponse {
    task_id: String,
    status: &'static str,
}

async fn ingest<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError>
where
    S: EngineApi,
{
    let filename = request.filename.unwrap_or_else(|| {
        std::path::Path::new(&request.file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.file_path.clone())
    });

    let task_id = service
        .enqueue_ingestion(request.file_path, filename)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            task_id,
            status: "queued",
        }),
    ))
}

/// Request body shared by `POST /search` and `POST /ask`.
#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    /// Result count override for `/search`; ignored by `/ask`.
    #[serde(default)]
    k: Option<usize>,
}

/// One scored snippet in a search or ask response.
#[derive(Serialize)]
struct ChunkResult {
    id: String,
    score: f32,
    text: String,
    metadata: Map<String, Value>,
}

impl From<RetrievedChunk> for ChunkResult {
    fn from(chunk: RetrievedChunk) -> Self {
        Self {
            id: chunk.id,
            score: chunk.score,
            text: chunk.text,
            metadata: chunk.metadata,
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    results: Vec<ChunkResult>,
}

async fn search<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: EngineApi,
{
    let outcome = service.search(&request.query, request.k).await?;
    Ok(Json(SearchResponse {
        collection: outcome.collection,
        filter: outcome.filter,
        results: outcome.results.into_iter().map(ChunkResult::from).collect(),
    }))
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    collection: String,
    sources: Vec<ChunkResult>,
}

async fn ask<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<AskResponse>, AppError>
where
    S: EngineApi,
{
    let outcome = service.ask(&request.query).await?;
    Ok(Json(AskResponse {
        answer: outcome.answer,
        collection: outcome.collection,
        sources: outcome.sources.into_iter().map(ChunkResult::from).collect(),
    }))
}

#[derive(Serialize)]
struct CollectionsResponse {
    collections: Vec<String>,
}

async fn list_collections<S>(
    State(service): State<Arc<S>>,
) -> Result<Json<CollectionsResponse>, AppError>
where
    S: EngineApi,
{
    let collections = service.list_collections().await?;
    Ok(Json(CollectionsResponse { collections }))
}

async fn delete_collection<S>(
    State(service): State<Arc<S>>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError>
where
    S: EngineApi,
{
    service.delete_collection(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn metrics<S>(
    State(service): State<Arc<S>>,
) -> Result<Json<crate::metrics::MetricsSnapshot>, AppError>
where
    S: EngineApi,
{
    Ok(Json(service.metrics_snapshot().await?))
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    queue: String,
    fallback_collection: String,
}

async fn status() -> Json<StatusResponse> {
    let config = get_config();
    Json(StatusResponse {
        status: "ok",
        queue: config.ingestion_queue.clone(),
        fallback_collection: config.fallback_collection.clone(),
    })
}

struct AppError(ServiceError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.is_retryable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else if matches!(self.0, ServiceError::Timeout(_)) {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, self.0.to_string()).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}
