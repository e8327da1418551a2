//! HTTP API over a shared [`RagPipeline`].
//!
//! Pipeline work is blocking (model inference, file parsing, the completion
//! call), so every handler that touches the pipeline runs it on the blocking
//! pool behind one mutex. Syncs and chats are therefore serialised.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use axum::{
    Json,
    Router,
    extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    pipeline::RagPipeline,
    walker::{discover_files, is_supported},
};

/// Largest accepted request body; uploads carry whole documents.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Mutex<RagPipeline>>,
    documents_dir: PathBuf,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Mutex<RagPipeline>>,
        documents_dir: PathBuf,
    ) -> Self {
        Self {
            pipeline,
            documents_dir,
        }
    }
}

/// [`Error`] rendered as `{"detail": "..."}` with a matching status code.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            e => {
                error!("request failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Run `f` against the pipeline on the blocking pool.
async fn with_pipeline<T, F>(
    state: &AppState,
    f: F,
) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut RagPipeline) -> Result<T> + Send + 'static,
{
    let pipeline = Arc::clone(&state.pipeline);
    let outcome = tokio::task::spawn_blocking(move || {
        let mut guard = pipeline
            .lock()
            .map_err(|_| Error::Config("pipeline lock poisoned".to_string()))?;
        f(&mut guard)
    })
    .await
    .map_err(|e| Error::Config(format!("pipeline task failed: {e}")))?;
    Ok(outcome?)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/sync", post(sync))
        .route("/upload", post(upload))
        .route("/chat", post(chat))
        .route("/documents", get(list_documents))
        .route("/documents/{filename}", delete(delete_document))
        .route("/vectorstore", delete(clear_vectorstore))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        // Browser frontends are served from other origins.
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "status": "online",
        "message": "RAG chat API is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub document_count: usize,
    pub message: String,
}

async fn status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let count = with_pipeline(&state, |p| Ok(p.document_count())).await?;
    let (status, message) = if count > 0 {
        ("ready", format!("System ready with {count} document chunks"))
    } else {
        ("no_documents", "No documents uploaded yet".to_string())
    };
    Ok(Json(StatusResponse {
        status: status.to_string(),
        document_count: count,
        message,
    }))
}

async fn sync(State(state): State<AppState>) -> ApiResult<Value> {
    let result = with_pipeline(&state, |p| p.sync_folder()).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!(
            "Sync complete. Total document chunks: {}",
            result.chunk_count
        ),
        "chunks": result.chunk_count,
    })))
}

fn invalid_name(name: &str) -> Error {
    Error::InvalidRequest(format!("invalid file name: {name}"))
}

fn malformed_upload(e: impl std::fmt::Display) -> Error {
    Error::InvalidRequest(format!("malformed upload: {e}"))
}

/// Reduce an uploaded file name to a bare, supported file name.
fn upload_name(raw: &str) -> Result<String> {
    let name = Path::new(raw)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.starts_with('.'))
        .ok_or_else(|| invalid_name(raw))?;
    if !is_supported(Path::new(&name)) {
        return Err(Error::UnsupportedFile(raw.to_string()));
    }
    Ok(name)
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Value> {
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) =
        multipart.next_field().await.map_err(malformed_upload)?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            debug!(field = ?field.name(), "ignoring non-file form field");
            continue;
        };
        // Every name is checked before anything is written.
        let name = upload_name(&raw_name)?;
        let data = field.bytes().await.map_err(malformed_upload)?;
        files.push((name, data.to_vec()));
    }

    if files.is_empty() {
        let err = Error::InvalidRequest("no files uploaded".to_string());
        return Err(err.into());
    }

    let names: Vec<String> = files.iter().map(|(n, _)| n.clone()).collect();
    let documents_dir = state.documents_dir.clone();
    let result = with_pipeline(&state, move |p| {
        std::fs::create_dir_all(&documents_dir)?;
        for (name, data) in &files {
            std::fs::write(documents_dir.join(name), data)?;
            info!(file = %name, bytes = data.len(), "saved upload");
        }
        p.sync_folder()
    })
    .await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!(
            "Processed {} files. Total chunks: {}",
            names.len(),
            result.chunk_count
        ),
        "files": names,
        "chunks": result.chunk_count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    /// Accepted for client compatibility; answers do not depend on it.
    #[serde(default)]
    pub chat_history: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<String>,
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    debug!(history = request.chat_history.len(), "chat request");
    let question = request.question;
    let result = with_pipeline(&state, move |p| p.chat(&question)).await?;
    Ok(Json(ChatResponse {
        sources: result.sources(),
        answer: result.answer,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub name: String,
    pub rel_path: String,
    pub size: u64,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentList {
    pub documents: Vec<DocumentEntry>,
    pub count: usize,
}

fn list_folder(root: &Path) -> Result<DocumentList> {
    if !root.is_dir() {
        return Ok(DocumentList {
            documents: Vec::new(),
            count: 0,
        });
    }

    let documents: Vec<DocumentEntry> = discover_files(root)?
        .into_iter()
        .map(|f| DocumentEntry {
            name: f.file_name(),
            rel_path: f.relative_path.to_string_lossy().to_string(),
            size: f.size,
            path: f.absolute_path.to_string_lossy().to_string(),
        })
        .collect();
    let count = documents.len();
    Ok(DocumentList { documents, count })
}

async fn list_documents(
    State(state): State<AppState>,
) -> ApiResult<DocumentList> {
    let root = state.documents_dir.clone();
    let list = tokio::task::spawn_blocking(move || list_folder(&root))
        .await
        .map_err(|e| Error::Config(format!("listing task failed: {e}")))??;
    Ok(Json(list))
}

async fn delete_document(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> ApiResult<Value> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\'])
    {
        return Err(invalid_name(&filename).into());
    }

    let path = state.documents_dir.join(&filename);
    if !path.is_file() {
        return Err(Error::NotFound {
            kind: "file",
            name: filename,
        }
        .into());
    }

    std::fs::remove_file(&path).map_err(Error::from)?;
    info!(file = %filename, "deleted document");
    Ok(Json(json!({
        "status": "success",
        "message": format!("Deleted {filename}"),
    })))
}

async fn clear_vectorstore(State(state): State<AppState>) -> ApiResult<Value> {
    with_pipeline(&state, |p| {
        p.clear_index();
        Ok(())
    })
    .await?;
    Ok(Json(json!({
        "status": "success",
        "message": "Vector store cleared",
    })))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Sync the documents folder once, then serve the API on `bind` until
/// interrupted.
pub fn serve(pipeline: RagPipeline, bind: &str) -> Result<()> {
    let documents_dir = pipeline.settings().documents_dir.clone();
    let shared = Arc::new(Mutex::new(pipeline));

    {
        let mut guard = shared
            .lock()
            .map_err(|_| Error::Config("pipeline lock poisoned".to_string()))?;
        match guard.sync_folder() {
            Ok(result) => {
                info!(chunks = result.chunk_count, "initial sync complete")
            }
            Err(e) => warn!("initial sync failed: {e}"),
        }
    }

    let state = AppState::new(Arc::clone(&shared), documents_dir);
    let bind = bind.to_string();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    let served = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind).await?;
        info!("listening on http://{}", listener.local_addr()?);
        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok::<(), Error>(())
    });

    // The pipeline owns a blocking HTTP client, which must be dropped
    // outside the async runtime.
    drop(runtime);
    drop(shared);
    served
}
