//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload` | Multipart upload (field `file`); streams progress as SSE |
//! | `GET`  | `/api/documents` | List the caller's documents, newest first |
//! | `DELETE` | `/api/documents` | Delete a document, `{"id": "..."}` body |
//! | `DELETE` | `/api/documents/{id}` | Same, with the id in the path |
//! | `DELETE` | `/api/user/data` | Delete all of the caller's documents and uploads |
//! | `POST` | `/api/search` | Semantic search over the caller's chunks (errors yield no results) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Identity
//!
//! Authentication happens upstream. The authenticated user id arrives in the
//! `x-user-id` header; requests without it get `401 Unauthorized`.
//!
//! # Error Contract
//!
//! ```json
//! { "success": false, "error": "Invalid file format" }
//! ```
//!
//! Once an upload stream has started, failures are reported in-band as the
//! final `{"error": ...}` event instead.

use std::convert::Infallible;

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State},
    http::{request::Parts, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use docrag_core::file_type::ValidationError;
use docrag_core::models::{Document, SearchHit};
use docrag_core::search::semantic_search;

use crate::app::AppContext;
use crate::documents::{self, DeleteOutcome};
use crate::ingest::UploadRequest;
use crate::progress::IngestEvent;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Multipart framing overhead allowed on top of the upload size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    ctx: AppContext,
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "docrag server listening");
    println!("docrag server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(ctx: AppContext) -> Router {
    // Bodies past the upload limit still reach the handler so it can answer
    // with the size error; far larger ones are cut off by the body limit.
    let body_limit = ctx.config.upload.max_bytes.saturating_mul(2) + MULTIPART_OVERHEAD;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/upload", post(handle_upload))
        .route(
            "/api/documents",
            get(handle_list_documents).delete(handle_delete_document),
        )
        .route("/api/documents/{id}", delete(handle_delete_document_by_path))
        .route("/api/user/data", delete(handle_delete_user_data))
        .route("/api/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(AppState { ctx })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

/// Error that renders as `{success: false, error}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!(error = %err, "{context}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, context)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ Identity ============

/// The authenticated caller, from the `x-user-id` header.
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| AuthUser(v.to_string()))
            .ok_or_else(ApiError::unauthorized)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/upload ============

/// Handler for `POST /api/upload`.
///
/// Validation runs before the stream opens, so rejected uploads get a plain
/// JSON error and leave no state behind. Accepted uploads are processed on a
/// background task; a client that disconnects mid-stream does not abort it.
async fn handle_upload(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let request = read_upload(multipart, user_id, state.ctx.pipeline.max_bytes()).await?;
    let category = state.ctx.pipeline.validate(&request).map_err(|e| {
        warn!(user_id = %request.user_id, file = %request.file_name, error = %e, "upload rejected");
        ApiError::from(e)
    })?;

    info!(
        user_id = %request.user_id,
        file = %request.file_name,
        bytes = request.bytes.len(),
        "upload accepted"
    );
    let events = state.ctx.pipeline.spawn(request, category);
    Ok(Sse::new(event_stream(events))
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Pull the `file` field out of the multipart body.
async fn read_upload(
    mut multipart: Multipart,
    user_id: String,
    max_bytes: usize,
) -> Result<UploadRequest, ApiError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(ValidationError::NoFile.into()),
            Err(e) => return Err(multipart_error(e, max_bytes)),
        };
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, max_bytes))?;
        if file_name.is_empty() && bytes.is_empty() {
            return Err(ValidationError::NoFile.into());
        }

        return Ok(UploadRequest {
            user_id,
            file_name,
            mime_type,
            bytes: bytes.to_vec(),
        });
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError, max_bytes: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ValidationError::TooLarge {
            size: max_bytes + 1,
            max_bytes,
        }
        .into();
    }
    ApiError::new(StatusCode::BAD_REQUEST, err.body_text())
}

fn event_stream(
    events: mpsc::Receiver<IngestEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        let sse = Event::default()
            .json_data(&event)
            .unwrap_or_else(|e| Event::default().data(format!(r#"{{"error":"{}"}}"#, e)));
        Some((Ok(sse), events))
    })
}

// ============ /api/documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<Document>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<DocumentListResponse>, ApiError> {
    let documents = documents::list_documents(state.ctx.store.as_ref(), &user_id)
        .await
        .map_err(|e| ApiError::internal("Failed to list documents", e))?;
    Ok(Json(DocumentListResponse { documents }))
}

#[derive(Deserialize)]
struct DeleteRequest {
    id: Option<String>,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Option<Json<DeleteRequest>>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let id = body.and_then(|Json(req)| req.id).unwrap_or_default();
    delete_for_user(&state, &user_id, &id).await
}

async fn handle_delete_document_by_path(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    delete_for_user(&state, &user_id, &id).await
}

async fn delete_for_user(
    state: &AppState,
    user_id: &str,
    id: &str,
) -> Result<Json<SuccessResponse>, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Document ID is required"));
    }
    let outcome = documents::delete_document(
        state.ctx.store.as_ref(),
        state.ctx.blobs.as_ref(),
        user_id,
        id,
    )
    .await
    .map_err(|e| ApiError::internal("Failed to delete document", e))?;

    match outcome {
        DeleteOutcome::Deleted => Ok(Json(SuccessResponse { success: true })),
        DeleteOutcome::NotFound => Err(ApiError::new(StatusCode::NOT_FOUND, "Document not found")),
    }
}

async fn handle_delete_user_data(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<SuccessResponse>, ApiError> {
    documents::delete_all_for_user(state.ctx.store.as_ref(), state.ctx.blobs.as_ref(), &user_id)
        .await
        .map_err(|e| ApiError::internal("Failed to delete user data", e))?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============ POST /api/search ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    min_score: Option<f64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let opts = state
        .ctx
        .search_options(&user_id, &req.query, req.limit, req.min_score);
    // A failed search reads as "nothing found", never as a hard error.
    let results = match semantic_search(state.ctx.store.as_ref(), state.ctx.embedder.as_ref(), &opts).await {
        Ok(results) => results,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "search failed; returning no results");
            Vec::new()
        }
    };
    Ok(Json(SearchResponse { results }))
}
