//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Status, version, counts, provider names |
//! | `POST`   | `/documents` | Ingest `{filename, text, metadata?}` |
//! | `GET`    | `/documents` | List documents |
//! | `GET`    | `/documents/stats` | Corpus statistics |
//! | `DELETE` | `/documents/{id}` | Delete a document and its chunks |
//! | `POST`   | `/search` | `{query, limit?, alpha?, use_hybrid?}` |
//! | `GET`    | `/search` | `?q=&limit=&hybrid=` |
//! | `POST`   | `/chat` | `{message, session_id?, use_history?}` |
//! | `GET`    | `/chat/sessions` | Session summaries |
//! | `GET`    | `/chat/sessions/{id}/history` | Messages (empty if unknown) |
//! | `DELETE` | `/chat/sessions/{id}` | `{cleared}` |
//! | `POST`   | `/chat/sessions/{id}/summarize` | Conversation summary |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `ingestion_failed` (422),
//! `index_inconsistent` (500), `index_unavailable` (503), `timeout` (504),
//! `generation_failed` (502), `internal` (500). Chat failures after a session
//! was assigned also carry `session_id` inside the error object.
//!
//! # Cancellation
//!
//! `/chat` and `/summarize` hold a [`DropGuard`] for the request's
//! lifetime. A client that disconnects drops the handler future, which
//! cancels the in-flight generation call.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ragdesk_core::error::{IngestionError, QueryError};
use ragdesk_core::models::{DocumentRecord, Message, Metadata, SearchResult};
use ragdesk_core::session::{SessionStore, SessionSummary};

use crate::cancel::{CancellationToken, DropGuard};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::index::{IndexManager, IndexStats};
use crate::rag::{ChatAnswer, ChatRequest as RagChatRequest, ConversationSummary, RagEngine, RagError, RagSettings};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<IndexManager>,
    pub rag: Arc<RagEngine>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build the index, session store, and collaborators from config.
    ///
    /// An index directory that fails to load does not stop the server: the
    /// index is marked unavailable and `/health` reports why.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = match IndexManager::open(config, embedder.clone()) {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "index failed to load, serving it as unavailable");
                IndexManager::unavailable(config, embedder, e.to_string())?
            }
        };
        let generator = create_generator(&config.generation)?;
        let index = Arc::new(index);
        let sessions = Arc::new(SessionStore::new(config.session_policy()));
        let rag = Arc::new(RagEngine::new(
            index.clone(),
            sessions,
            generator,
            RagSettings::from_config(config),
        ));
        Ok(Self {
            index,
            rag,
            config: Arc::new(config.clone()),
        })
    }
}

/// The full route table with CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents", post(handle_ingest).get(handle_list_documents))
        .route("/documents/stats", get(handle_stats))
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/search", post(handle_search).get(handle_search_get))
        .route("/chat", post(handle_chat))
        .route("/chat/sessions", get(handle_list_sessions))
        .route("/chat/sessions/{id}", delete(handle_clear_session))
        .route("/chat/sessions/{id}/history", get(handle_history))
        .route("/chat/sessions/{id}/summarize", post(handle_summarize))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener until the process is stopped.
pub async fn serve_on(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "ragdesk listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Bind `[server] bind` and serve.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("ragdesk listening on http://{}", listener.local_addr()?);
    serve_on(listener, state).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    session_id: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            session_id: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(code = self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                session_id: self.session_id,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        let message = e.to_string();
        match e {
            IngestionError::Consistency(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "index_inconsistent", message)
            }
            IngestionError::IndexUnavailable(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "index_unavailable", message)
            }
            IngestionError::Config(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
            _ => AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "ingestion_failed", message),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        let message = e.to_string();
        match e {
            QueryError::NotLoaded => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "index_unavailable", message)
            }
            QueryError::InvalidAlpha(_) => bad_request(message),
            QueryError::Timeout(_) => AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message),
            QueryError::Embedding(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "index_unavailable", message)
            }
            QueryError::Consistency(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "index_inconsistent", message)
            }
        }
    }
}

impl From<RagError> for AppError {
    fn from(e: RagError) -> Self {
        match e {
            RagError::EmptyMessage => bad_request(e.to_string()),
            RagError::UnknownSession(_) => not_found(e.to_string()),
            RagError::Query(q) => q.into(),
            RagError::Generation {
                session_id, source, ..
            } => {
                let (status, code) = match source {
                    ragdesk_core::error::GenerationError::Timeout(_) => {
                        (StatusCode::GATEWAY_TIMEOUT, "timeout")
                    }
                    _ => (StatusCode::BAD_GATEWAY, "generation_failed"),
                };
                AppError {
                    status,
                    code,
                    message: source.to_string(),
                    session_id: Some(session_id),
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    documents: usize,
    chunks: usize,
    embedding_model: String,
    generator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    index_error: Option<String>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.index.stats();
    Json(HealthResponse {
        status: if state.index.is_loaded() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        documents: stats.corpus.total_documents,
        chunks: stats.corpus.total_chunks,
        embedding_model: stats.embedding_model,
        generator: state.rag.generator_name().to_string(),
        index_error: state.index.load_error().map(str::to_string),
    })
}

// ============ /documents ============

#[derive(Deserialize)]
struct IngestRequest {
    filename: String,
    text: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Serialize)]
struct IngestResponse {
    document_id: String,
    filename: String,
    chunk_ids: Vec<String>,
    chunks_created: usize,
    status: &'static str,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    if req.filename.trim().is_empty() {
        return Err(bad_request("filename must not be empty"));
    }
    let outcome = state
        .index
        .ingest_text(&req.filename, &req.text, req.metadata)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            document_id: outcome.document_id,
            filename: outcome.filename,
            chunks_created: outcome.chunk_ids.len(),
            chunk_ids: outcome.chunk_ids.iter().map(|id| id.to_string()).collect(),
            status: "success",
        }),
    ))
}

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentRecord>,
    total: usize,
}

async fn handle_list_documents(State(state): State<AppState>) -> Json<DocumentListResponse> {
    let documents = state.index.list_documents();
    Json(DocumentListResponse {
        total: documents.len(),
        documents,
    })
}

async fn handle_stats(State(state): State<AppState>) -> Json<IndexStats> {
    Json(state.index.stats())
}

#[derive(Serialize)]
struct DeleteResponse {
    document_id: String,
    chunks_removed: usize,
    deleted: bool,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let record = state
        .index
        .delete_document(&id)
        .await?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))?;
    Ok(Json(DeleteResponse {
        document_id: record.id,
        chunks_removed: record.chunk_count,
        deleted: true,
    }))
}

// ============ /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    alpha: Option<f64>,
    #[serde(default = "default_true")]
    use_hybrid: bool,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
    #[serde(default = "default_true")]
    hybrid: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct SearchHit {
    chunk_id: String,
    document_id: String,
    chunk_index: usize,
    filename: String,
    content: String,
    score: f64,
    lexical_score: Option<f64>,
    vector_score: Option<f64>,
    rank: usize,
    metadata: Metadata,
}

impl From<SearchResult> for SearchHit {
    fn from(r: SearchResult) -> Self {
        Self {
            chunk_id: r.chunk.id().to_string(),
            document_id: r.chunk.document_id,
            chunk_index: r.chunk.chunk_index,
            filename: r.chunk.filename,
            content: r.chunk.content,
            score: r.fused_score,
            lexical_score: r.raw_lexical_score,
            vector_score: r.raw_vector_score,
            rank: r.rank,
            metadata: r.chunk.metadata,
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
    total: usize,
    query: String,
}

async fn run_search(
    state: &AppState,
    query: String,
    limit: Option<usize>,
    alpha: Option<f64>,
    use_hybrid: bool,
) -> Result<Json<SearchResponse>, AppError> {
    if query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let retrieval = &state.config.retrieval;
    let limit = limit.unwrap_or(retrieval.top_k);
    if limit == 0 {
        return Err(bad_request("limit must be >= 1"));
    }
    let alpha = if use_hybrid {
        alpha.unwrap_or(retrieval.alpha)
    } else {
        0.0
    };

    let results = state
        .index
        .search(&query, limit, alpha, retrieval.candidate_multiplier)
        .await?;
    let results: Vec<SearchHit> = results.into_iter().map(SearchHit::from).collect();
    Ok(Json(SearchResponse {
        total: results.len(),
        results,
        query,
    }))
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    run_search(&state, req.query, req.limit, req.alpha, req.use_hybrid).await
}

async fn handle_search_get(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    run_search(&state, params.q, params.limit, None, params.hybrid).await
}

// ============ /chat ============

#[derive(Deserialize)]
struct ChatBody {
    message: String,
    session_id: Option<String>,
    #[serde(default = "default_true")]
    use_history: bool,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatAnswer>, AppError> {
    let token = CancellationToken::new();
    let _guard = DropGuard::new(token.clone());
    let request = RagChatRequest {
        message: body.message,
        session_id: body.session_id,
        use_history: body.use_history,
    };
    Ok(Json(state.rag.answer(request, Some(&token)).await?))
}

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummary>,
    total: usize,
}

async fn handle_list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    let sessions = state.rag.list_sessions();
    Json(SessionListResponse {
        total: sessions.len(),
        sessions,
    })
}

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    messages: Vec<Message>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        messages: state.rag.history(&id),
        session_id: id,
    })
}

#[derive(Serialize)]
struct ClearResponse {
    session_id: String,
    cleared: bool,
}

async fn handle_clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ClearResponse> {
    Json(ClearResponse {
        cleared: state.rag.clear_session(&id),
        session_id: id,
    })
}

async fn handle_summarize(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationSummary>, AppError> {
    let token = CancellationToken::new();
    let _guard = DropGuard::new(token.clone());
    Ok(Json(state.rag.summarize(&id, Some(&token)).await?))
}
