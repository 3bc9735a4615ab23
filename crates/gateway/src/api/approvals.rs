//! Approval decisions (spec.md §4.8): a task paused pending human
//! sign-off (`EventType::ApprovalRequested`) is resumed or cancelled by
//! posting a decision here, which is itself recorded as an
//! `EventType::ApprovalDecision` event for the audit trail.
//!
//! - `POST /approvals/decision`

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use shannon_domain::error::Result;
use shannon_domain::event::EventType;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApprovalDecisionRequest {
    pub workflow_id: Uuid,
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn decide(State(state): State<AppState>, Json(req): Json<ApprovalDecisionRequest>) -> Result<impl IntoResponse> {
    state.events.append(
        req.workflow_id,
        EventType::ApprovalDecision,
        None,
        req.reason.clone(),
        Some(serde_json::json!({ "approved": req.approved })),
    )?;

    if req.approved {
        state.orchestrator.resume(req.workflow_id).await?;
    } else {
        state.orchestrator.cancel(req.workflow_id, req.reason.or_else(|| Some("approval denied".to_string())))?;
    }

    Ok(StatusCode::ACCEPTED)
}
