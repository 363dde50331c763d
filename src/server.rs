//! HTTP API over [`ReportService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload` | Multipart `user_id` + `file` (PDF); builds the index |
//! | `POST` | `/api/query` | `{user_id, query}` → agent answer |
//! | `DELETE` | `/api/delete_index` | `{user_id}` → removes that user's index |
//! | `DELETE` | `/api/delete/all` | Removes every index |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/` | Welcome message |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unsupported_format", "message": "Invalid file type. Only PDF allowed." } }
//! ```
//!
//! Pipeline errors use [`PipelineError::code`]; caller mistakes are 400,
//! everything else 500. A query always returns 200 and reports its
//! outcome in `status`, including `not_found`.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::AgentOutcome;
use crate::error::PipelineError;
use crate::models::UserIdentity;
use crate::service::{QueryStatus, ReportService};

#[derive(Clone)]
struct AppState {
    service: Arc<ReportService>,
}

/// Serve the API on `bind` until the process exits.
pub async fn run_server(
    service: Arc<ReportService>,
    bind: &str,
    max_upload_bytes: usize,
) -> anyhow::Result<()> {
    let app = router(service.clone(), max_upload_bytes);

    tracing::info!(
        root = %service.indexes().root().display(),
        "report agent listening on http://{}",
        bind
    );

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router. Separate from [`run_server`] so tests can serve it on
/// an ephemeral listener.
pub fn router(service: Arc<ReportService>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/upload", post(handle_upload))
        .route("/api/query", post(handle_query))
        .route("/api/delete_index", delete(handle_delete_index))
        .route("/api/delete/all", delete(handle_delete_all))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: code.to_string(),
        message: message.into(),
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        let status = if e.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            tracing::error!(code = e.code(), error = %e, "request failed");
        }
        AppError {
            status,
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

fn parse_identity(raw: &str) -> Result<UserIdentity, AppError> {
    Ok(UserIdentity::parse(raw)?)
}

// ============ Handlers ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Welcome to the health report agent API. POST a PDF to /api/upload, then ask questions at /api/query."
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Serialize)]
struct UploadResponse {
    user_id: String,
    filename: String,
    message: String,
    pages: usize,
    chunks: usize,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut user_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request("bad_request", e.body_text()))?
    {
        match field.name() {
            Some("user_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request("bad_request", e.body_text()))?;
                user_id = Some(text);
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request("bad_request", e.body_text()))?;
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let identity = parse_identity(
        user_id
            .as_deref()
            .ok_or_else(|| bad_request("bad_request", "missing form field: user_id"))?,
    )?;
    let (filename, bytes) =
        file.ok_or_else(|| bad_request("bad_request", "missing form field: file"))?;

    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(bad_request(
            "unsupported_format",
            "Invalid file type. Only PDF allowed.",
        ));
    }

    tracing::info!(%identity, filename = %filename, bytes = bytes.len(), "processing upload");
    let summary = state.service.create_index(&identity, &bytes).await?;

    Ok(Json(UploadResponse {
        user_id: identity.to_string(),
        filename,
        message: "Report processed and indexed successfully.".to_string(),
        pages: summary.pages,
        chunks: summary.chunks,
    }))
}

#[derive(Deserialize)]
struct QueryRequest {
    user_id: String,
    query: String,
}

#[derive(Serialize)]
struct QueryResponseBody {
    user_id: String,
    query: String,
    response: String,
    status: QueryStatus,
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<AgentOutcome>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponseBody>, AppError> {
    let identity = parse_identity(&req.user_id)?;
    if req.query.trim().is_empty() {
        return Err(bad_request("bad_request", "query must not be empty"));
    }

    let answer = state.service.answer_query(&identity, &req.query).await;

    Ok(Json(QueryResponseBody {
        user_id: identity.to_string(),
        query: req.query,
        response: answer.answer,
        status: answer.status,
        found: answer.found,
        outcome: answer.outcome,
    }))
}

#[derive(Deserialize)]
struct DeleteRequest {
    user_id: String,
}

#[derive(Serialize)]
struct DeleteResponse {
    user_id: String,
    message: String,
    deleted: bool,
}

async fn handle_delete_index(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    let identity = parse_identity(&req.user_id)?;
    let deleted = state.service.delete_index(&identity).await?;

    let message = if deleted {
        "User index deleted successfully."
    } else {
        "User index not found, nothing to delete."
    };
    Ok(Json(DeleteResponse {
        user_id: identity.to_string(),
        message: message.to_string(),
        deleted,
    }))
}

#[derive(Serialize)]
struct DeleteAllResponse {
    message: String,
    path_cleared: String,
}

async fn handle_delete_all(
    State(state): State<AppState>,
) -> Result<Json<DeleteAllResponse>, AppError> {
    let existed = state.service.wipe_all().await?;
    let message = if existed {
        "All user indices have been deleted successfully."
    } else {
        "Base index directory not found. Nothing to delete."
    };
    Ok(Json(DeleteAllResponse {
        message: message.to_string(),
        path_cleared: state.service.indexes().root().display().to_string(),
    }))
}
