//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`    | `/` | no | Service name and version |
//! | `GET`    | `/health` | no | Liveness plus vector index connectivity |
//! | `GET`    | `/api/v1` | no | Endpoint listing |
//! | `POST`   | `/api/v1/auth/login` | no | Form login, returns a bearer token |
//! | `GET`    | `/api/v1/auth/me` | yes | The authenticated user |
//! | `POST`   | `/api/v1/chat/query` | yes | Ask a question |
//! | `GET`    | `/api/v1/chat/history?session_id=` | yes | Stored messages of a session |
//! | `POST`   | `/api/v1/chat/session` | yes | Allocate a session id |
//! | `DELETE` | `/api/v1/chat/session/{session_id}` | yes | Forget a session's memory |
//! | `GET`    | `/api/v1/cache` | yes | Query cache statistics |
//! | `DELETE` | `/api/v1/cache` | yes | Clear the query cache |
//! | `POST`   | `/webhooks/drive` | no | Drive change notification |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Question cannot be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `not_found` (404), `query_failed` (500, or 504 when a stage timed out),
//! `internal` (500).

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use nerdsiq_core::cache::CacheStats;
use nerdsiq_core::RagError;

use crate::auth::{AuthError, JwtAuth};
use crate::config::Config;
use crate::db;
use crate::history::{self, StoredMessage};
use crate::migrate;
use crate::rag::RagService;
use crate::users::{self, User};

/// Longest accepted question, in characters.
pub const MAX_QUESTION_CHARS: usize = 1000;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub jwt: Arc<JwtAuth>,
    /// One orchestrator, and so one cache and one session store, per process.
    pub rag: Arc<RagService>,
    /// Cancelled on shutdown; in-flight queries run under child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, jwt: JwtAuth, rag: RagService) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            jwt: Arc::new(jwt),
            rag: Arc::new(rag),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the router with CORS and request tracing applied.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/v1", get(handle_api_index))
        .route("/api/v1/auth/login", post(handle_login))
        .route("/api/v1/auth/me", get(handle_me))
        .route("/api/v1/chat/query", post(handle_query))
        .route("/api/v1/chat/history", get(handle_history))
        .route("/api/v1/chat/session", post(handle_new_session))
        .route("/api/v1/chat/session/{session_id}", delete(handle_clear_session))
        .route("/api/v1/cache", get(handle_cache_stats).delete(handle_cache_clear))
        .route("/webhooks/drive", post(handle_drive_webhook))
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Serve on an already-bound listener until `state.shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, applies migrations, and serves until Ctrl-C.
/// Requires `OPENAI_API_KEY` and `JWT_SECRET` in the environment.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let jwt = JwtAuth::new(&config.jwt_secret()?, config.auth.token_ttl_minutes);
    let rag = RagService::from_config(config)?;
    let state = AppState::new(config.clone(), pool, jwt, rag);

    let bind_addr = config.server.bind.clone();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(
        addr = %bind_addr,
        env = %config.app.env,
        collection = %config.qdrant.collection,
        "NerdsIQ API listening"
    );

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    serve(listener, state).await
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    app_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn forbidden(message: impl Into<String>) -> AppError {
    app_error(StatusCode::FORBIDDEN, "forbidden", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(message: impl Into<String>) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", err), "request failed");
        internal("Internal server error")
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken => unauthorized(err.to_string()),
            AuthError::Disabled => forbidden(err.to_string()),
            AuthError::Internal(e) => e.into(),
        }
    }
}

/// Map a pipeline failure to a response. The message names the failing
/// stage but not the provider's raw error.
fn query_error(err: RagError) -> AppError {
    match &err {
        RagError::EmptyQuestion => bad_request("Question cannot be empty"),
        RagError::Timeout { stage } => app_error(
            StatusCode::GATEWAY_TIMEOUT,
            "query_failed",
            format!("Failed to process query: {} call timed out", stage),
        ),
        RagError::Provider { stage, .. } | RagError::Cancelled { stage } => app_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            format!("Failed to process query: {} stage failed", stage),
        ),
        RagError::Configuration(_) => internal("Internal server error"),
    }
}

// ============ Authentication ============

/// The authenticated, active user making the request.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let user = state.jwt.authorize(&state.pool, auth_header).await?;
        Ok(CurrentUser(user))
    }
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
}

async fn handle_login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = users::authenticate(&state.pool, &form.username, &form.password)
        .await?
        .ok_or_else(|| unauthorized("Invalid credentials"))?;
    if !user.is_active {
        return Err(forbidden("User account is disabled"));
    }

    let access_token = state.jwt.generate_token(&user.email)?;
    info!(user = %user.email, "login");
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: state.jwt.ttl_seconds(),
    }))
}

async fn handle_me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

// ============ Chat ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    session_id: String,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    sources: Vec<String>,
    session_id: String,
    cached: bool,
}

async fn handle_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("Question cannot be empty"));
    }
    if req.question.chars().count() > MAX_QUESTION_CHARS {
        return Err(bad_request(format!(
            "Question must be at most {} characters",
            MAX_QUESTION_CHARS
        )));
    }
    if req.session_id.trim().is_empty() {
        return Err(bad_request("session_id must not be empty"));
    }

    let cancel = state.shutdown.child_token();
    let answer = state
        .rag
        .query_with_cancel(&req.question, &memory_key(&user.id, &req.session_id), &cancel)
        .await
        .map_err(|e| {
            error!(user = %user.email, session_id = %req.session_id, error = %e, "query failed");
            query_error(e)
        })?;

    history::record_exchange(
        &state.pool,
        &user.id,
        &req.session_id,
        &req.question,
        &answer.answer,
        &answer.sources,
    )
    .await?;

    Ok(Json(QueryResponse {
        answer: answer.answer,
        sources: answer.sources,
        session_id: req.session_id,
        cached: answer.cached,
    }))
}

#[derive(Deserialize)]
struct HistoryParams {
    session_id: String,
}

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    messages: Vec<StoredMessage>,
}

async fn handle_history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let messages = history::load_history(&state.pool, &user.id, &params.session_id).await?;
    Ok(Json(HistoryResponse {
        session_id: params.session_id,
        messages,
    }))
}

/// `sess_` followed by 12 lowercase hex characters.
pub fn new_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("sess_{}", &hex[..12])
}

async fn handle_new_session(_user: CurrentUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "session_id": new_session_id() }))
}

/// Session memory is keyed per user, so two users sharing a session id
/// never see each other's turns.
fn memory_key(user_id: &str, session_id: &str) -> String {
    format!("{}:{}", user_id, session_id)
}

async fn handle_clear_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    state.rag.clear_session(&memory_key(&user.id, &session_id)).await;
    Json(serde_json::json!({ "status": "cleared", "session_id": session_id }))
}

// ============ Cache ============

#[derive(Serialize)]
struct CacheStatsResponse {
    #[serde(flatten)]
    cache: CacheStats,
    sessions: usize,
}

async fn handle_cache_stats(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        cache: state.rag.cache_stats(),
        sessions: state.rag.session_count(),
    })
}

async fn handle_cache_clear(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Json<serde_json::Value> {
    state.rag.invalidate_cache().await;
    Json(serde_json::json!({ "status": "cleared" }))
}

/// Drive sends `sync` once when a channel opens; every other state means
/// the folder changed and cached answers may be stale.
async fn handle_drive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let resource_state = headers
        .get("x-goog-resource-state")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let channel = headers
        .get("x-goog-channel-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    info!(resource_state, channel, "drive notification");

    if resource_state != "sync" {
        state.rag.invalidate_cache().await;
    }
    Json(serde_json::json!({ "status": "ok" }))
}

// ============ Service info ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    qdrant: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let qdrant = if state.rag.index_healthy().await {
        "connected"
    } else {
        "disconnected"
    };
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app.env.clone(),
        qdrant,
    })
}

async fn handle_root(State(state): State<AppState>) -> Json<serde_json::Value> {
    let docs = state.config.app.is_development().then_some("/api/v1");
    Json(serde_json::json!({
        "name": "NerdsIQ API",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": docs,
    }))
}

async fn handle_api_index() -> Json<serde_json::Value> {
    let endpoints: Vec<serde_json::Value> = [
        ("POST", "/api/v1/auth/login", "Form login (username, password)"),
        ("GET", "/api/v1/auth/me", "Current user"),
        ("POST", "/api/v1/chat/query", "Ask a question"),
        ("GET", "/api/v1/chat/history", "Messages of a session"),
        ("POST", "/api/v1/chat/session", "New session id"),
        ("DELETE", "/api/v1/chat/session/{session_id}", "Forget session memory"),
        ("GET", "/api/v1/cache", "Cache statistics"),
        ("DELETE", "/api/v1/cache", "Clear the cache"),
    ]
    .iter()
    .map(|(method, path, description)| {
        serde_json::json!({ "method": method, "path": path, "description": description })
    })
    .collect();
    Json(serde_json::json!({ "endpoints": endpoints }))
}

async fn handle_not_found() -> AppError {
    not_found("No such endpoint")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let id = new_session_id();
        assert!(id.starts_with("sess_"));
        assert_eq!(id.len(), 17);
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn test_memory_key_scopes_by_user() {
        assert_eq!(memory_key("u1", "s1"), "u1:s1");
        assert_ne!(memory_key("u1", "s1"), memory_key("u2", "s1"));
    }

    #[test]
    fn test_query_error_mapping() {
        use nerdsiq_core::Stage;

        assert_eq!(query_error(RagError::EmptyQuestion).status, StatusCode::BAD_REQUEST);

        let timeout = query_error(RagError::Timeout { stage: Stage::Model });
        assert_eq!(timeout.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.code, "query_failed");

        let failed = query_error(RagError::provider(Stage::Search, "secret internal detail"));
        assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(failed.message.contains("search"));
        assert!(!failed.message.contains("secret"));
    }
}
