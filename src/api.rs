//! HTTP surface of the front-end process.
//!
//! The router exposes the document endpoints used by the web client:
//!
//! - `GET /stream?text=&uuid=` – Initialise the namespace and stream the answer as it is produced.
//! - `GET /query?text=&uuid=[&doc_id=]` – Answer in one response (`{"text": ...}`).
//! - `GET /getDocuments` – Metadata of every indexed document.
//! - `POST /uploadFile` – Store an uploaded deck, index it, and render a PDF preview when a
//!   conversion service is configured. Returns `{"uuid": ..., "previewUrls": [...]}`.
//! - `GET /metrics` – Streaming counters.
//! - `GET /commands` – Machine-readable route catalog.
//!
//! All index work is delegated to the worker process through [`IndexApi`].

use crate::conversion::{ConversionClient, ConversionError};
use crate::engine::DocumentSummary;
use crate::metrics::{StreamMetrics, StreamMetricsSnapshot};
use crate::rpc::{IndexApi, RpcError};
use crate::streaming::{StreamFraming, stream_response};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const MISSING_TEXT: &str = "No text found, please include a ?text=blah parameter in the URL";
const MISSING_FILE: &str = "Please send a POST request with a file";

/// Where uploads and previews are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    /// Directory receiving uploaded decks.
    pub documents_dir: PathBuf,
    /// Directory receiving converted previews.
    pub preview_dir: PathBuf,
}

/// Shared state handed to every handler.
pub struct AppState<S> {
    service: Arc<S>,
    uploads: Arc<UploadSettings>,
    converter: Option<Arc<ConversionClient>>,
    framing: StreamFraming,
    metrics: Arc<StreamMetrics>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            uploads: Arc::clone(&self.uploads),
            converter: self.converter.clone(),
            framing: self.framing,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S> AppState<S> {
    /// State with raw stream framing and no conversion service.
    pub fn new(service: Arc<S>, uploads: UploadSettings) -> Self {
        Self {
            service,
            uploads: Arc::new(uploads),
            converter: None,
            framing: StreamFraming::default(),
            metrics: Arc::new(StreamMetrics::new()),
        }
    }

    /// Render previews through `converter`.
    pub fn with_converter(mut self, converter: ConversionClient) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    /// Use `framing` for streamed bodies.
    pub fn with_framing(mut self, framing: StreamFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Streaming counters shared with the router.
    pub fn metrics(&self) -> Arc<StreamMetrics> {
        Arc::clone(&self.metrics)
    }
}

/// Build the HTTP router.
pub fn create_router<S>(state: AppState<S>) -> Router
where
    S: IndexApi + 'static,
{
    Router::new()
        .route("/stream", get(stream::<S>))
        .route("/query", get(query::<S>))
        .route("/getDocuments", get(get_documents::<S>))
        .route(
            "/uploadFile",
            post(upload_file::<S>).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Query string shared by `/stream` and `/query`.
#[derive(Debug, Deserialize)]
struct QueryParams {
    text: Option<String>,
    uuid: Option<String>,
    doc_id: Option<String>,
}

/// Stream the answer to `text` over the namespace `uuid`.
async fn stream<S>(
    State(state): State<AppState<S>>,
    Query(params): Query<QueryParams>,
) -> Result<Response, AppError>
where
    S: IndexApi,
{
    let text = params.text.ok_or(AppError::BadRequest(MISSING_TEXT.into()))?;
    let uuid = params.uuid.ok_or(AppError::BadRequest(
        "No UUID found, please include a ?uuid=blah parameter in the URL".into(),
    ))?;

    state.service.initialize_index(&uuid).await?;
    let receiver = state.service.start_worker(&text, &uuid).await?;
    tracing::info!(namespace = %uuid, "Streaming answer");
    Ok(stream_response(
        receiver,
        state.framing,
        Arc::clone(&state.metrics),
    ))
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    text: String,
}

/// Answer `text` in one response. Kept for older clients; `/stream` supersedes it.
async fn query<S>(
    State(state): State<AppState<S>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<QueryResponse>, AppError>
where
    S: IndexApi,
{
    let text = params.text.ok_or(AppError::BadRequest(MISSING_TEXT.into()))?;
    let uuid = params.uuid.ok_or(AppError::BadRequest(
        "No UUID found, please include a uuid in the URL".into(),
    ))?;

    state.service.initialize_index(&uuid).await?;
    let doc_id = params.doc_id.unwrap_or_else(|| uuid.clone());
    let answer = state.service.query_index(&text, &doc_id).await?;
    Ok(Json(QueryResponse { text: answer }))
}

async fn get_documents<S>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<DocumentSummary>>, AppError>
where
    S: IndexApi,
{
    Ok(Json(state.service.get_documents_list().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    uuid: String,
    preview_urls: Vec<String>,
}

/// Store, index, and preview an uploaded deck.
///
/// The worker indexes whatever its `DocumentLoader` extracts from the stored file. The default
/// `PlainTextLoader` does not unpack `.pptx` archives, so deployments serving real decks must
/// inject a slide text extractor into the worker's `IndexManager`.
async fn upload_file<S>(
    State(state): State<AppState<S>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError>
where
    S: IndexApi,
{
    let mut file = None;
    let mut use_filename = false;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => file = Some(field.bytes().await?),
            Some("filename_as_doc_id") => use_filename = true,
            _ => {}
        }
    }
    let file = file.ok_or(AppError::BadRequest(MISSING_FILE.into()))?;

    let generated_uuid = Uuid::new_v4().to_string();
    let filename = format!("{}.pptx", Uuid::new_v4());
    tokio::fs::create_dir_all(&state.uploads.documents_dir).await?;
    let filepath = state.uploads.documents_dir.join(&filename);
    tokio::fs::write(&filepath, &file).await?;
    tracing::info!(path = %filepath.display(), size = file.len(), "Saved upload");

    let doc_id = if use_filename {
        filename.clone()
    } else {
        generated_uuid.clone()
    };
    match process_upload(&state, &filepath, doc_id, &generated_uuid).await {
        Ok(preview_urls) => Ok(Json(UploadResponse {
            uuid: generated_uuid,
            preview_urls,
        })),
        Err(err) => {
            if let Err(cleanup) = tokio::fs::remove_file(&filepath).await {
                tracing::warn!(
                    path = %filepath.display(),
                    error = %cleanup,
                    "Failed to remove upload after error"
                );
            }
            Err(err)
        }
    }
}

async fn process_upload<S>(
    state: &AppState<S>,
    filepath: &Path,
    doc_id: String,
    preview_stem: &str,
) -> Result<Vec<String>, AppError>
where
    S: IndexApi,
{
    // The worker resolves paths against its own working directory.
    let absolute = tokio::fs::canonicalize(filepath).await?;
    state
        .service
        .insert_into_index(&absolute.to_string_lossy(), Some(doc_id))
        .await?;

    let Some(converter) = state.converter.as_ref() else {
        return Ok(Vec::new());
    };
    let target = state
        .uploads
        .preview_dir
        .join(format!("{preview_stem}.pdf"));
    converter.convert_to_pdf(filepath, &target).await?;
    Ok(vec![target.to_string_lossy().into_owned()])
}

async fn get_metrics<S>(State(state): State<AppState<S>>) -> Json<StreamMetricsSnapshot>
where
    S: IndexApi,
{
    Json(state.metrics.snapshot())
}

/// Descriptor for a single route in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
}

#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "stream",
                method: "GET",
                path: "/stream?text=&uuid=",
                description: "Stream the answer to a question about one document as it is generated.",
            },
            CommandDescriptor {
                name: "query",
                method: "GET",
                path: "/query?text=&uuid=",
                description: "Answer a question in a single JSON response { \"text\": string }.",
            },
            CommandDescriptor {
                name: "get_documents",
                method: "GET",
                path: "/getDocuments",
                description: "List indexed documents with id, title, preview, length, and filename.",
            },
            CommandDescriptor {
                name: "upload_file",
                method: "POST",
                path: "/uploadFile",
                description: "Upload a deck as multipart field `file`; add `filename_as_doc_id` to index it under its stored filename.",
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return streaming counters.",
            },
        ],
    })
}

/// Failures surfaced by HTTP handlers.
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Internal(message) => {
                tracing::error!(error = %message, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {message}")).into_response()
            }
        }
    }
}

impl From<RpcError> for AppError {
    fn from(inner: RpcError) -> Self {
        Self::Internal(inner.to_string())
    }
}

impl From<ConversionError> for AppError {
    fn from(inner: ConversionError) -> Self {
        Self::Internal(inner.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(inner: std::io::Error) -> Self {
        Self::Internal(inner.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(inner: MultipartError) -> Self {
        Self::BadRequest(inner.body_text())
    }
}
