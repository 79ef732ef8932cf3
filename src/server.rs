//! Chat API over HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST`   | `/api/v1/chat/session` | Create a session, returns `{session_id}` |
//! | `POST`   | `/api/v1/chat/{session_id}` | Ask `{question}`, returns a [`ChatResponse`] |
//! | `GET`    | `/api/v1/chat/{session_id}` | Session history and time left before expiry |
//! | `DELETE` | `/api/v1/chat/{session_id}` | End the session |
//! | `GET`    | `/api/v1/metrics` | Request statistics and component status |
//! | `GET`    | `/health` | Version, vector store and generator status |
//!
//! `/health` answers 200 in both cases; `status` is `"ok"` when the vector
//! store and the generator respond and `"degraded"` otherwise.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must be at least 3 characters", "retriable": false } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `unavailable` (503), `timeout` (504), `internal` (500).
//!
//! # Authorization
//!
//! When `[api].api_key` is set, every `/api/v1` route requires the key in
//! the `[api].api_key_header` header. `/health` is always open.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use rag_support_core::models::Message;
use rag_support_core::RagError;

use crate::config::{ApiConfig, Config};
use crate::metrics::{ComponentReport, MetricsSnapshot};
use crate::pipeline::{ChatResponse, RagPipeline};

#[derive(Clone)]
struct ApiKey {
    header: HeaderName,
    key: Arc<str>,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<RagPipeline>,
    auth: Option<ApiKey>,
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>, api: &ApiConfig) -> anyhow::Result<Self> {
        let auth = match &api.api_key {
            Some(key) => Some(ApiKey {
                header: HeaderName::from_bytes(api.api_key_header.as_bytes())?,
                key: Arc::from(key.as_str()),
            }),
            None => None,
        };
        Ok(Self { pipeline, auth })
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), AppError> {
        let Some(auth) = &self.auth else {
            return Ok(());
        };
        let presented = headers
            .get(&auth.header)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        if presented.is_empty() || !bool::from(presented.ct_eq(auth.key.as_bytes())) {
            return Err(AppError {
                status: StatusCode::UNAUTHORIZED,
                code: "unauthorized",
                message: "missing or invalid API key".to_string(),
                retriable: false,
            });
        }
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/chat/session", post(handle_create_session))
        .route(
            "/api/v1/chat/{session_id}",
            post(handle_ask).get(handle_session_info).delete(handle_end_session),
        )
        .route("/api/v1/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the chat API on `[server].bind` until the process is terminated.
///
/// Also starts the periodic session sweeper.
pub async fn run_server(config: &Config, pipeline: Arc<RagPipeline>) -> anyhow::Result<()> {
    let sweeper = pipeline
        .sessions()
        .spawn_sweeper(Duration::from_secs(config.conversation.cleanup_interval_secs));

    let app = router(AppState::new(pipeline, &config.api)?);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "chat API listening");
    let served = axum::serve(listener, app).await;

    sweeper.abort();
    served?;
    Ok(())
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
    /// Whether repeating the request later may succeed.
    retriable: bool,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retriable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                retriable: self.retriable,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RagError::DownstreamTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            RagError::IndexUnavailable(_) | RagError::GenerationUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            retriable: err.is_retriable(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: rejection.body_text(),
            retriable: false,
        }
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct SessionCreated {
    session_id: String,
}

async fn handle_create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<SessionCreated>), AppError> {
    state.authorize(&headers)?;
    let session_id = state.pipeline.create_session();
    Ok((StatusCode::CREATED, Json(SessionCreated { session_id })))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    state.authorize(&headers)?;
    let Json(request) = body?;
    let response = state
        .pipeline
        .ask(Some(&session_id), &request.question)
        .await?;
    Ok(Json(response))
}

#[derive(Serialize)]
struct SessionInfo {
    session_id: String,
    time_remaining_secs: u64,
    history: Vec<Message>,
}

async fn handle_session_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionInfo>, AppError> {
    state.authorize(&headers)?;
    let sessions = state.pipeline.sessions();
    let history = sessions.history(&session_id).await?;
    let remaining = sessions.time_remaining(&session_id)?;
    Ok(Json(SessionInfo {
        session_id,
        time_remaining_secs: remaining.as_secs(),
        history,
    }))
}

#[derive(Serialize)]
struct Ended {
    message: String,
}

async fn handle_end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Ended>, AppError> {
    state.authorize(&headers)?;
    state.pipeline.end_session(&session_id).await?;
    Ok(Json(Ended {
        message: format!("session {} ended", session_id),
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    active_sessions: usize,
    #[serde(flatten)]
    components: ComponentReport,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let components = state.pipeline.check_components().await;
    Json(HealthResponse {
        status: if components.is_healthy() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.pipeline.sessions().active_sessions(),
        components,
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    requests: MetricsSnapshot,
    active_sessions: usize,
    #[serde(flatten)]
    components: ComponentReport,
}

async fn handle_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MetricsResponse>, AppError> {
    state.authorize(&headers)?;
    let components = state.pipeline.check_components().await;
    Ok(Json(MetricsResponse {
        requests: state.pipeline.metrics().snapshot(),
        active_sessions: state.pipeline.sessions().active_sessions(),
        components,
    }))
}
