//! HTTP API over the document store, chat provider and session store.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::chat::{ChatMessage, ChatProvider};
use crate::document_store::DocumentStore;
use crate::embedder::Embedder;
use crate::embeddings::{SearchHit, SourceSummary};
use crate::loader;
use crate::session::{SessionInfo, SessionStore};

/// Store type served by the API.
pub type SharedStore = Arc<DocumentStore<Arc<dyn Embedder>>>;

/// Number of results returned by search when the request omits `n_results`.
pub const DEFAULT_SEARCH_RESULTS: usize = 5;

/// Request body cap: the largest accepted file, doubled for JSON escaping,
/// plus room for the envelope. Oversize files still reach the loader and get 400.
pub const MAX_REQUEST_BODY: usize = 2 * loader::MAX_FILE_SIZE as usize + 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Document store backing upload, list, delete and search.
    pub store: SharedStore,
    /// Chat backend used by the conversational routes.
    pub chat: Arc<dyn ChatProvider>,
    /// Conversation histories.
    pub sessions: Arc<SessionStore>,
    /// Messages of history sent to the chat backend per turn.
    pub history_limit: usize,
    /// Whether `POST /documents/reset` is permitted.
    pub allow_reset: bool,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    session_id: String,
    reply: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    Session { session_id: String },
    Chunk { content: String },
    Done,
    Error { message: String },
}

impl StreamEvent {
    fn into_sse(self) -> Event {
        let data = serde_json::to_string(&self)
            .unwrap_or_else(|_| r#"{"type":"error","message":"serialization failed"}"#.into());
        Event::default().data(data)
    }
}

#[derive(Debug, Serialize)]
struct SessionDeleted {
    message: String,
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    filename: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    status: &'static str,
    message: String,
    chunks: usize,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    status: &'static str,
    documents: Vec<SourceSummary>,
}

#[derive(Debug, Serialize)]
struct StatusMessage {
    status: &'static str,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
    #[serde(default = "default_search_results")]
    n_results: usize,
}

fn default_search_results() -> usize {
    DEFAULT_SEARCH_RESULTS
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    status: &'static str,
    results: Vec<SearchHit>,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/session/{id}", get(session_info).delete(delete_session))
        .route("/documents/upload", post(upload_document))
        .route("/documents/list", get(list_documents))
        .route("/documents/search", post(search_documents))
        .route("/documents/reset", post(reset_documents))
        .route("/documents/{name}", delete(delete_document))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "docchat",
    })
}

/// Records the user turn and returns the session id plus the history to send.
fn begin_turn(
    state: &AppState,
    request: ChatRequest,
) -> Result<(String, Vec<ChatMessage>), ApiError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let session_id = state.sessions.resolve(request.session_id.as_deref());
    state
        .sessions
        .add_message(&session_id, ChatMessage::user(request.message));
    let history = state
        .sessions
        .messages(&session_id, Some(state.history_limit));
    Ok((session_id, history))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let (session_id, history) = begin_turn(&state, request)?;
    let provider = state.chat.clone();
    let reply = tokio::task::spawn_blocking(move || provider.complete(&history))
        .await
        .map_err(|err| internal_error(anyhow!("chat task join error: {err}")))?
        .map_err(|err| {
            error!(session_id = %session_id, "chat completion failed: {err:#}");
            bad_gateway(err)
        })?;
    state
        .sessions
        .add_message(&session_id, ChatMessage::assistant(reply.clone()));
    Ok(Json(ChatResponse { session_id, reply }))
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>>, ApiError> {
    let (session_id, history) = begin_turn(&state, request)?;
    let (tx, rx) = mpsc::channel(32);
    let provider = state.chat.clone();
    let sessions = state.sessions.clone();
    tokio::task::spawn_blocking(move || {
        relay_stream(provider.as_ref(), &sessions, session_id, &history, &tx)
    });
    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

/// Forwards provider fragments as SSE events; stops early once the client
/// disconnects. The full reply is stored only after `done` is sent.
fn relay_stream(
    provider: &dyn ChatProvider,
    sessions: &SessionStore,
    session_id: String,
    history: &[ChatMessage],
    tx: &mpsc::Sender<Result<Event, Infallible>>,
) {
    let send = |event: StreamEvent| tx.blocking_send(Ok(event.into_sse())).is_ok();
    if !send(StreamEvent::Session {
        session_id: session_id.clone(),
    }) {
        return;
    }
    let fragments = match provider.stream(history) {
        Ok(fragments) => fragments,
        Err(err) => {
            error!(session_id = %session_id, "chat stream failed: {err:#}");
            send(StreamEvent::Error {
                message: format!("{err:#}"),
            });
            return;
        }
    };
    let mut reply = String::new();
    for fragment in fragments {
        match fragment {
            Ok(content) => {
                reply.push_str(&content);
                if !send(StreamEvent::Chunk { content }) {
                    warn!(session_id = %session_id, "client disconnected mid-stream");
                    return;
                }
            }
            Err(err) => {
                error!(session_id = %session_id, "chat stream interrupted: {err:#}");
                send(StreamEvent::Error {
                    message: format!("{err:#}"),
                });
                return;
            }
        }
    }
    if send(StreamEvent::Done) {
        sessions.add_message(&session_id, ChatMessage::assistant(reply));
    }
}

async fn session_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .sessions
        .info(&id)
        .map(Json)
        .ok_or_else(|| not_found("session not found"))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDeleted>, ApiError> {
    if !state.sessions.delete(&id) {
        return Err(not_found("session not found"));
    }
    Ok(Json(SessionDeleted {
        message: "session deleted".to_string(),
        session_id: id,
    }))
}

async fn upload_document(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, ApiError> {
    let document = loader::from_upload(&request.filename, &request.content)
        .map_err(|err| bad_request(err.to_string()))?;
    let store = state.store.clone();
    let report =
        tokio::task::spawn_blocking(move || store.ingest(&document.text, &document.metadata))
            .await
            .map_err(|err| internal_error(anyhow!("ingest task join error: {err}")))?
            .map_err(|err| internal_error(err.into()))?;
    info!(
        document = %report.document_name,
        chunks = report.chunks_added,
        "document uploaded"
    );
    Ok(Json(UploadResponse {
        status: "success",
        message: format!("uploaded {}", report.document_name),
        chunks: report.chunks_added,
    }))
}

async fn list_documents(State(state): State<AppState>) -> Json<ListResponse> {
    Json(ListResponse {
        status: "success",
        documents: state.store.list_documents(),
    })
}

async fn delete_document(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StatusMessage>, ApiError> {
    let store = state.store.clone();
    let target = name.clone();
    let removed = tokio::task::spawn_blocking(move || store.delete_document(&target))
        .await
        .map_err(|err| internal_error(anyhow!("delete task join error: {err}")))?;
    if !removed {
        return Err(not_found(format!("document {name} not found")));
    }
    Ok(Json(StatusMessage {
        status: "success",
        message: format!("deleted {name}"),
    }))
}

async fn search_documents(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let store = state.store.clone();
    let results =
        tokio::task::spawn_blocking(move || store.search(&request.query, request.n_results))
            .await
            .map_err(|err| internal_error(anyhow!("search task join error: {err}")))?;
    Ok(Json(SearchResponse {
        status: "success",
        results,
    }))
}

async fn reset_documents(State(state): State<AppState>) -> Result<Json<StatusMessage>, ApiError> {
    if !state.allow_reset {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorBody {
                message: "reset is only available in development".to_string(),
            }),
        ));
    }
    let store = state.store.clone();
    let ok = tokio::task::spawn_blocking(move || store.reset())
        .await
        .map_err(|err| internal_error(anyhow!("reset task join error: {err}")))?;
    if !ok {
        return Err(internal_error(anyhow!("failed to reset the document store")));
    }
    Ok(Json(StatusMessage {
        status: "success",
        message: "document store reset".to_string(),
    }))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn bad_gateway(err: anyhow::Error) -> ApiError {
    (
        StatusCode::BAD_GATEWAY,
        Json(ErrorBody {
            message: format!("{err:#}"),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}
