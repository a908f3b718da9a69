//! HTTP server: Slack Events API endpoint plus a JSON ask API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and document count) |
//! | `GET`  | `/slack/events`, `/` | URL verification via `?challenge=` |
//! | `POST` | `/slack/events`, `/` | Events API: challenge or `event_callback` |
//! | `POST` | `/ask` | `{"question": "..."}` → `{"answer": "..."}` |
//!
//! Event callbacks are acknowledged immediately with `{"status":"ok"}`;
//! the question is handled on a spawned task so Slack's three second
//! delivery deadline never depends on answer latency. Slack redeliveries
//! (`X-Slack-Retry-Num`) are acknowledged and dropped.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `invalid_signature` (403),
//! `timeout` (408), `internal` (500).

use anyhow::{anyhow, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use pulse_core::answer::Answerer;
use pulse_core::store::IndexStore;

use crate::app::AppContext;
use crate::frontdoor::{FrontDoor, FrontDoorSettings, MessageTransport};
use crate::ingest::{ingest, spawn_refresher};
use crate::slack::{
    inbound_from_event, verify_signature, Envelope, SlackTransport, RETRY_NUM_HEADER,
    SIGNATURE_HEADER, TIMESTAMP_HEADER,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    ctx: Arc<AppContext>,
    front_door: Arc<FrontDoor>,
    signing_secret: Arc<str>,
}

impl AppState {
    pub fn new(
        ctx: Arc<AppContext>,
        transport: Arc<dyn MessageTransport>,
        signing_secret: impl Into<String>,
    ) -> Self {
        let settings =
            FrontDoorSettings::from_config(&ctx.config.answer, ctx.config.slack.bot_user_id.clone());
        let front_door = Arc::new(FrontDoor::new(ctx.answerer.clone(), transport, settings));
        Self {
            ctx,
            front_door,
            signing_secret: Arc::from(signing_secret.into()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/slack/events",
            get(handle_slack_challenge).post(handle_slack_event),
        )
        .route("/", get(handle_slack_challenge).post(handle_slack_event))
        .route("/ask", post(handle_ask))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `pulse serve`: optional startup ingestion, the periodic refresher,
/// then the HTTP server. Runs until the process is terminated.
pub async fn run_server(ctx: Arc<AppContext>) -> Result<()> {
    let signing_secret = std::env::var("SLACK_SIGNING_SECRET")
        .map_err(|_| anyhow!("SLACK_SIGNING_SECRET environment variable not set"))?;
    let transport = Arc::new(SlackTransport::new(&ctx.config.slack, ctx.retry.clone())?);

    if ctx.config.ingest.on_startup {
        match ingest(&ctx).await {
            Ok(report) => tracing::info!(indexed = report.indexed, "startup ingestion finished"),
            Err(e) => tracing::error!(error = %format!("{:#}", e), "startup ingestion failed; serving the existing index"),
        }
    }
    let _refresher = spawn_refresher(ctx.clone());

    let bind_addr = ctx.config.server.bind.clone();
    let app = router(AppState::new(ctx, transport, signing_secret));

    tracing::info!(bind = %bind_addr, "Pulse listening");
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

fn forbidden(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: "invalid_signature",
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    documents: usize,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let documents = state
        .ctx
        .store
        .count()
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        documents,
    }))
}

// ============ Slack events ============

#[derive(Serialize)]
struct ChallengeResponse {
    challenge: String,
}

#[derive(Serialize)]
struct AckResponse {
    status: &'static str,
}

fn ack() -> Json<AckResponse> {
    Json(AckResponse { status: "ok" })
}

async fn handle_slack_challenge(
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ChallengeResponse>, AppError> {
    match params.get("challenge") {
        Some(challenge) if !challenge.is_empty() => Ok(Json(ChallengeResponse {
            challenge: challenge.clone(),
        })),
        _ => Err(bad_request("missing challenge parameter")),
    }
}

async fn handle_slack_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    verify_signature(
        &state.signing_secret,
        header(TIMESTAMP_HEADER),
        header(SIGNATURE_HEADER),
        &body,
        Utc::now().timestamp(),
        state.ctx.config.slack.signature_tolerance_secs,
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "rejected Slack request");
        forbidden(e.to_string())
    })?;

    let envelope: Envelope = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("invalid JSON body: {}", e)))?;

    match envelope {
        Envelope::UrlVerification { challenge } => match challenge {
            Some(challenge) if !challenge.is_empty() => {
                Ok(Json(ChallengeResponse { challenge }).into_response())
            }
            _ => Err(bad_request("missing challenge parameter")),
        },
        Envelope::EventCallback { event } => {
            if let Some(retry) = header(RETRY_NUM_HEADER) {
                tracing::info!(retry, "ignoring Slack redelivery");
                return Ok(ack().into_response());
            }
            let Some(event) = event else {
                tracing::warn!("event_callback without event payload");
                return Ok(ack().into_response());
            };
            let bot_user_id = state.ctx.config.slack.bot_user_id.as_deref();
            match inbound_from_event(&event, bot_user_id) {
                Some(message) => {
                    let front_door = state.front_door.clone();
                    tokio::spawn(async move {
                        front_door.handle(&message).await;
                    });
                }
                None => tracing::debug!(
                    event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("unknown"),
                    "unhandled event"
                ),
            }
            Ok(ack().into_response())
        }
        Envelope::Other => Ok(ack().into_response()),
    }
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let timeout = std::time::Duration::from_secs(state.ctx.config.answer.timeout_secs);
    match tokio::time::timeout(timeout, state.ctx.answerer.answer(question)).await {
        Ok(answer) => Ok(Json(AskResponse { answer })),
        Err(_) => Err(timeout_error(state.ctx.config.answer.timeout_message.clone())),
    }
}
