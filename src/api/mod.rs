//! HTTP + WebSocket surface.
//!
//! - `GET  /health`
//! - `POST /api/triage`          stateless triage of `{assunto, corpo, nomeRemetente}`
//! - `POST /api/inbound/email`   raw RFC 822 intake
//! - `GET  /api/escalations`     messages waiting for a human
//! - `GET  /api/usage`           LLM spend so far
//! - `GET  /ws`                  dashboard event stream
//! - `GET  /ws/chat`             customer chat sessions

mod routes;
mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::channels::ChatHub;
use crate::channels::chat::chat_routes;
use crate::error::ApiError;
use crate::pipeline::MessageProcessor;
use crate::store::{Database, MessageStatus, StoredMessage, TriageRecord};
use crate::triage::TriageEngine;

/// Default page size for the escalation queue.
pub const DEFAULT_ESCALATION_LIMIT: usize = 50;
const MAX_ESCALATION_LIMIT: usize = 500;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub triage: Arc<TriageEngine>,
    pub processor: Arc<MessageProcessor>,
}

/// Build the full router: REST routes, dashboard stream and chat sessions.
pub fn router(state: AppState, chat: Arc<ChatHub>) -> Router {
    let processor = Arc::clone(&state.processor);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/triage", post(routes::triage))
        .route("/api/inbound/email", post(routes::inbound_email))
        .route("/api/escalations", get(routes::escalations))
        .route("/api/usage", get(routes::usage))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .merge(chat_routes(chat, processor))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// An escalated message with its triage result.
#[derive(Debug, Clone, Serialize)]
pub struct Escalation {
    pub message: StoredMessage,
    pub triage: Option<TriageRecord>,
}

/// Escalated messages, most recent first.
pub async fn escalation_queue(
    db: &dyn Database,
    limit: usize,
) -> Result<Vec<Escalation>, ApiError> {
    let limit = limit.clamp(1, MAX_ESCALATION_LIMIT);
    let messages = db
        .get_messages_by_status(MessageStatus::Escalated, limit)
        .await?;

    let mut queue = Vec::with_capacity(messages.len());
    for message in messages {
        let triage = db.get_triage_record(&message.id).await?;
        queue.push(Escalation { message, triage });
    }
    Ok(queue)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
