
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::ForgeError;
use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::NewLead;
use crate::ingest::Ingestor;
use crate::llm::ChatMessage;
use crate::query::HybridQueryEngine;

/// Shared handles behind every route.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub engine: Arc<HybridQueryEngine>,
    pub database: Database,
}

/// API-facing error: carries the status code the handler decided on and a
/// message safe to show the caller.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<ForgeError> for ApiError {
    fn from(error: ForgeError) -> Self {
        let status = match &error {
            ForgeError::Validation(_) => StatusCode::BAD_REQUEST,
            ForgeError::Crawler(_) | ForgeError::Embedding(_) | ForgeError::Llm(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {error}");
        }
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// The widget and dashboard speak camelCase JSON, so every request body is
// renamed on the way in.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    tenant_id: String,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    session_id: Option<String>,
    /// Where the conversation came from, e.g. "widget" or "dashboard".
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebsiteIngestRequest {
    tenant_id: String,
    url: String,
    #[serde(default)]
    source_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextIngestRequest {
    tenant_id: String,
    #[serde(default)]
    title: String,
    text: String,
    #[serde(default)]
    source_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileIngestRequest {
    tenant_id: String,
    file_name: String,
    /// File bytes, base64-encoded by the uploading client.
    content_base64: String,
    #[serde(default)]
    source_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsvIngestRequest {
    tenant_id: String,
    file_name: String,
    csv: String,
    #[serde(default)]
    source_id: Option<String>,
}

/// Build the full application router.
#[inline]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat).options(preflight))
        .route("/api/leads", post(create_lead).options(preflight))
        .route("/api/ingest/website", post(ingest_website).options(preflight))
        .route("/api/ingest/text", post(ingest_text).options(preflight))
        .route("/api/ingest/file", post(ingest_file).options(preflight))
        .route("/api/ingest/csv", post(ingest_csv).options(preflight))
        .route("/api/sources/{tenant_id}", get(list_sources).options(preflight))
        .route(
            "/api/sources/{tenant_id}/{source_id}",
            delete(delete_source).options(preflight),
        )
        .layer(middleware::from_fn(apply_cors))
        .with_state(state)
}

/// Serve the API until the process is stopped.
#[inline]
pub async fn serve(config: &Config, state: AppState) -> crate::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ForgeError::Network(format!("Failed to bind {addr}: {e}")))?;

    info!("Listening on {}", addr);

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| ForgeError::Network(format!("Server error: {e}")))?;
    Ok(())
}

/// The widget is embedded on arbitrary customer sites, so every response
/// carries permissive CORS headers and preflights are answered inline.
async fn apply_cors(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Streamed chat answer: plain text chunks as the model produces them.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Response> {
    debug!(
        "Chat request for tenant {} from {}",
        request.tenant_id,
        request.source.as_deref().unwrap_or("unknown")
    );

    let stream = state
        .engine
        .respond(&request.tenant_id, request.messages, request.session_id)
        .await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::from(ForgeError::Network(format!("Failed to build response: {e}"))))?;

    Ok(response)
}

async fn create_lead(
    State(state): State<AppState>,
    Json(lead): Json<NewLead>,
) -> ApiResult<Response> {
    if lead.email.trim().is_empty() || !lead.email.contains('@') {
        return Err(ForgeError::Validation("A valid email is required".to_string()).into());
    }

    let stored = state
        .database
        .create_lead(&lead)
        .await
        .map_err(ForgeError::from)?;

    Ok((StatusCode::CREATED, Json(json!({ "success": true, "lead": stored }))).into_response())
}

/// Ingestion routes always answer 200 with a `success` flag so the dashboard
/// can surface failures without special-casing status codes.
fn ingest_outcome(result: crate::Result<crate::ingest::IngestReport>) -> Json<serde_json::Value> {
    match result {
        Ok(report) => Json(json!({
            "success": true,
            "sourceId": report.source_id,
            "pages": report.pages,
            "chunks": report.chunks,
        })),
        Err(error) => {
            info!("Ingestion rejected: {error}");
            Json(json!({ "success": false, "error": error.to_string() }))
        }
    }
}

async fn ingest_website(
    State(state): State<AppState>,
    Json(request): Json<WebsiteIngestRequest>,
) -> Json<serde_json::Value> {
    ingest_outcome(
        state
            .ingestor
            .ingest_website(&request.tenant_id, &request.url, request.source_id.as_deref())
            .await,
    )
}

async fn ingest_text(
    State(state): State<AppState>,
    Json(request): Json<TextIngestRequest>,
) -> Json<serde_json::Value> {
    ingest_outcome(
        state
            .ingestor
            .ingest_text(
                &request.tenant_id,
                &request.title,
                &request.text,
                request.source_id.as_deref(),
            )
            .await,
    )
}

async fn ingest_file(
    State(state): State<AppState>,
    Json(request): Json<FileIngestRequest>,
) -> Json<serde_json::Value> {
    let bytes = match base64::engine::general_purpose::STANDARD.decode(&request.content_base64) {
        Ok(bytes) => bytes,
        Err(e) => {
            return ingest_outcome(Err(ForgeError::Validation(format!(
                "Invalid base64 file content: {e}"
            ))));
        }
    };

    ingest_outcome(
        state
            .ingestor
            .ingest_file(
                &request.tenant_id,
                &request.file_name,
                &bytes,
                request.source_id.as_deref(),
            )
            .await,
    )
}

async fn ingest_csv(
    State(state): State<AppState>,
    Json(request): Json<CsvIngestRequest>,
) -> Json<serde_json::Value> {
    ingest_outcome(
        state
            .ingestor
            .ingest_csv(
                &request.tenant_id,
                &request.file_name,
                &request.csv,
                request.source_id.as_deref(),
            )
            .await,
    )
}

async fn list_sources(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let sources = state.ingestor.list_sources(&tenant_id).await?;
    Ok(Json(json!({ "success": true, "sources": sources })))
}

async fn delete_source(
    State(state): State<AppState>,
    Path((tenant_id, source_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let removed = state.ingestor.remove_source(&tenant_id, &source_id).await?;
    if removed {
        Ok(Json(json!({ "success": true })).into_response())
    } else {
        Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "Source not found" })),
        )
            .into_response())
    }
}
