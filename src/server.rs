//! JSON HTTP API.
//!
//! Thin wrapper over [`AppContext`]: every handler delegates to the same
//! operations the CLI uses. All endpoints speak JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/sync` | Run a sync cycle (`{"full": bool, "account": "..."}`, both optional) |
//! | `POST` | `/ask` | Answer a question (`{"question": "..."}`) |
//! | `GET`  | `/messages/recent` | Recently indexed messages (`?limit=N`) |
//! | `GET`  | `/calendar/events` | Upcoming events (`?days=N`) |
//! | `GET`  | `/accounts` | Registered accounts |
//! | `POST` | `/accounts` | Register an account (`{"email": "...", "primary": bool}`) |
//! | `GET`  | `/status` | Index size, accounts, environment |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "auth", "message": "authentication failed: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `auth` (401), `upstream` (502),
//! `unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a local web UI can
//! talk to the server directly.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app::{AppContext, SyncOutcome};
use crate::error::PilotError;
use crate::models::{CalendarEvent, MessageMeta};
use crate::sync::{self, AccountRecord};

const MAX_RECENT_LIMIT: usize = 200;

type AppState = Arc<AppContext>;

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/sync", post(handle_sync))
        .route("/ask", post(handle_ask))
        .route("/messages/recent", get(handle_recent))
        .route("/calendar/events", get(handle_events))
        .route("/accounts", get(handle_list_accounts).post(handle_add_account))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(ctx);

    info!(addr = %bind_addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
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
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<PilotError> for AppError {
    fn from(err: PilotError) -> Self {
        let message = err.to_string();
        let (status, code) = match err {
            PilotError::Config(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            PilotError::Auth(_) => (StatusCode::UNAUTHORIZED, "auth"),
            PilotError::Transient(_) | PilotError::CursorInvalid => {
                (StatusCode::BAD_GATEWAY, "upstream")
            }
            PilotError::StoreUnavailable(_) | PilotError::LlmUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            PilotError::Io(_) | PilotError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError {
            status,
            code,
            message,
        }
    }
}

// ============ Handlers ============

#[derive(Deserialize, Default)]
struct SyncRequest {
    #[serde(default)]
    full: bool,
    account: Option<String>,
}

async fn handle_sync(
    State(ctx): State<AppState>,
    body: Option<Json<SyncRequest>>,
) -> Result<Json<Vec<SyncOutcome>>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let outcomes = ctx
        .sync_accounts(request.full, request.account.as_deref())
        .await?;
    Ok(Json(outcomes))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(ctx): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<crate::answer::AnswerResponse>, AppError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    Ok(Json(ctx.orchestrator.answer(question).await))
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn handle_recent(
    State(ctx): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<MessageMeta>>, AppError> {
    let limit = query.limit.unwrap_or(20).min(MAX_RECENT_LIMIT);
    Ok(Json(ctx.store.recent(limit).await?))
}

#[derive(Deserialize)]
struct EventsQuery {
    days: Option<i64>,
}

async fn handle_events(
    State(ctx): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<CalendarEvent>>, AppError> {
    let days = query.days.unwrap_or(ctx.config.llm.calendar_days);
    if days < 0 {
        return Err(bad_request("days must be >= 0"));
    }
    Ok(Json(ctx.calendar.list_events(days).await?))
}

async fn handle_list_accounts(
    State(ctx): State<AppState>,
) -> Result<Json<Vec<AccountRecord>>, AppError> {
    Ok(Json(sync::list_accounts(ctx.store.pool()).await?))
}

#[derive(Deserialize)]
struct AddAccountRequest {
    email: String,
    #[serde(default)]
    primary: bool,
}

async fn handle_add_account(
    State(ctx): State<AppState>,
    Json(request): Json<AddAccountRequest>,
) -> Result<Json<Vec<AccountRecord>>, AppError> {
    let email = request.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(bad_request("email must be a valid address"));
    }
    sync::add_account(ctx.store.pool(), email, request.primary).await?;
    Ok(Json(sync::list_accounts(ctx.store.pool()).await?))
}

#[derive(Serialize)]
struct StatusResponse {
    env: String,
    indexed_messages: i64,
    accounts: Vec<String>,
    embeddings_enabled: bool,
    scheduler_enabled: bool,
}

async fn handle_status(State(ctx): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    Ok(Json(StatusResponse {
        env: format!("{:?}", ctx.config.env).to_lowercase(),
        indexed_messages: ctx.store.message_count().await?,
        accounts: ctx.accounts().await?,
        embeddings_enabled: ctx.config.embedding.is_enabled(),
        scheduler_enabled: ctx.config.scheduler.enabled,
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
