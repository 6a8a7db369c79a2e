//! Route definitions for the CodeChat gateway.
//!
//! Provides the chat, streaming chat, session, download, and model endpoints.

use crate::artifact::CodeArtifact;
use crate::error::GatewayError;
use crate::orchestrator::{ChatInput, ChatOrchestrator, ChatOutcome};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use chrono::SecondsFormat;
use codechat_common::logging::generate_trace_id;
use codechat_common::request_span;
use codechat_common::util::format_bytes;
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{info, Instrument};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ChatOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: ChatOrchestrator) -> Self {
        Self { orchestrator }
    }
}

/// Chat request body, shared by `/chat` and `/chat/stream`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl From<ChatBody> for ChatInput {
    fn from(body: ChatBody) -> Self {
        Self {
            message: body.message,
            session_id: body.session_id,
            model: body.model,
        }
    }
}

/// Chat response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    pub model: String,
    pub timestamp: String,
    pub code_file: Option<CodeArtifact>,
    pub is_code_response: bool,
}

impl From<ChatOutcome> for ChatReply {
    fn from(outcome: ChatOutcome) -> Self {
        Self {
            response: outcome.response,
            session_id: outcome.session_id,
            model: outcome.model,
            timestamp: outcome.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            code_file: outcome.code_file,
            is_code_response: outcome.is_code_response,
        }
    }
}

/// Clear request body.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearBody {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Clear response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReply {
    pub message: String,
    pub session_id: Option<String>,
}

/// Pull request body.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PullBody {
    #[serde(default)]
    pub model: Option<String>,
}

/// Plain message response.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageReply {
    pub message: String,
}

/// Model listing response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsReply {
    pub models: Vec<String>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub service: String,
    pub version: String,
}

/// Build the router with all routes. Layers are added by the caller.
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/models", get(models_handler))
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/clear", post(clear_handler))
        .route("/download/:session_id/:filename", get(download_handler))
        .route("/pull-model", post(pull_model_handler))
        .with_state(state)
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| GatewayError::Validation(e.body_text()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, GatewayError> {
    let body = parse_body(payload)?;
    let span = request_span!("chat", generate_trace_id());

    let outcome = state.orchestrator.chat(body.into()).instrument(span).await?;
    Ok(Json(outcome.into()))
}

async fn chat_stream_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    let body = parse_body(payload)?;
    let span = request_span!("chat_stream", generate_trace_id());

    let events = state.orchestrator.stream(body.into()).instrument(span).await?;
    let frames = events.map(|event| Ok::<_, Infallible>(event.to_sse()));

    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn clear_handler(
    State(state): State<AppState>,
    payload: Option<Json<ClearBody>>,
) -> Json<ClearReply> {
    let session_id = payload.and_then(|Json(body)| body.session_id);
    let existed = state.orchestrator.clear(session_id.as_deref()).await;

    let message = if existed {
        "Conversation history cleared"
    } else {
        "No conversation history to clear"
    };

    Json(ClearReply {
        message: message.to_string(),
        session_id,
    })
}

async fn download_handler(
    State(state): State<AppState>,
    Path((session_id, filename)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    let bytes = state
        .orchestrator
        .artifacts()
        .read(&session_id, &filename)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                GatewayError::NotFound(format!("{session_id}/{filename}"))
            } else {
                GatewayError::Common(e)
            }
        })?;

    info!(
        session_id = %session_id,
        filename = %filename,
        size = %format_bytes(bytes.len() as u64),
        "Serving artifact"
    );

    let headers = [
        (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, bytes).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Model Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn models_handler(State(state): State<AppState>) -> Result<Json<ModelsReply>, GatewayError> {
    let models = state.orchestrator.provider().list_models().await?;
    Ok(Json(ModelsReply { models }))
}

async fn pull_model_handler(
    State(state): State<AppState>,
    payload: Option<Json<PullBody>>,
) -> Result<Json<MessageReply>, GatewayError> {
    let model = payload
        .and_then(|Json(body)| body.model)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.orchestrator.default_model().to_string());

    info!(model = %model, "Pulling model");
    let status = state.orchestrator.provider().pull_model(&model).await?;

    Ok(Json(MessageReply {
        message: format!("Model {model} pulled: {status}"),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        message: "CodeChat gateway is running".into(),
        service: "codechat-gateway".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
