//! REST handlers.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AppState, DEFAULT_ESCALATION_LIMIT, Escalation, escalation_queue};
use crate::channels::parse_raw_email;
use crate::error::ApiError;
use crate::pipeline::Disposition;
use crate::store::LlmCostSummary;
use crate::triage::{TriageOutcome, TriageRequest};

// ── Health ──────────────────────────────────────────────────────────────

pub(super) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "support-triage",
        "model": state.triage.model_name(),
        "dashboard_clients": state.processor.events().subscriber_count(),
    }))
}

// ── Triage ──────────────────────────────────────────────────────────────

/// Stateless triage: nothing is stored and no reply is sent.
pub(super) async fn triage(
    State(state): State<AppState>,
    Json(request): Json<TriageRequest>,
) -> Result<Json<TriageOutcome>, ApiError> {
    if request.is_blank() {
        return Err(ApiError::BadRequest(
            "assunto and corpo cannot both be empty".to_string(),
        ));
    }
    Ok(Json(state.triage.triage(&request).await))
}

// ── Email intake ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(super) struct Accepted {
    id: String,
    disposition: Disposition,
}

/// Raw RFC 822 message in the body, as delivered by the mail webhook.
pub(super) async fn inbound_email(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let message = parse_raw_email(&body)?;
    info!(id = %message.id, sender = %message.sender, "Inbound email received");

    let processed = state.processor.process(message).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            id: processed.message_id,
            disposition: processed.disposition,
        }),
    ))
}

// ── Escalation queue ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct EscalationQuery {
    limit: Option<usize>,
}

pub(super) async fn escalations(
    State(state): State<AppState>,
    Query(query): Query<EscalationQuery>,
) -> Result<Json<Vec<Escalation>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_ESCALATION_LIMIT);
    Ok(Json(escalation_queue(state.db.as_ref(), limit).await?))
}

// ── Usage ───────────────────────────────────────────────────────────────

pub(super) async fn usage(State(state): State<AppState>) -> Result<Json<LlmCostSummary>, ApiError> {
    Ok(Json(state.db.get_total_spend().await?))
}
