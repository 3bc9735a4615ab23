//! Session API endpoints (spec.md §6.1's session surface): list, get,
//! history, event stream, rename, and soft-delete over the JSONL-backed
//! [`SessionStore`].
//!
//! - `GET    /sessions`              — list (paginated)
//! - `GET    /sessions/:id`          — get
//! - `GET    /sessions/:id/history`  — redacted turn-by-turn transcript
//! - `GET    /sessions/:id/events`   — persistent events across the
//!   session's tasks (excludes ephemeral partials by construction —
//!   `EventLog::fetch` never returns `LlmPartial` rows)
//! - `PATCH  /sessions/:id`          — rename
//! - `DELETE /sessions/:id`          — soft-delete

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use shannon_domain::error::{Error, Result};
use shannon_domain::event::Event;
use shannon_domain::session::{Session, SessionTurn};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(q): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    let (page, total) = state.sessions.list(q.user_id.as_deref(), q.limit, q.offset);
    Json(serde_json::json!({ "sessions": page, "total": total, "limit": q.limit, "offset": q.offset }))
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Session>> {
    state.sessions.get(&id).map(Json).ok_or_else(|| Error::NotFound(format!("session {id}")))
}

pub async fn session_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SessionTurn>>> {
    let session = state.sessions.get(&id).ok_or_else(|| Error::NotFound(format!("session {id}")))?;
    Ok(Json(session.history))
}

/// Persistent events across every task this session has produced
/// (`state.tasks` is filtered on `session_id`, then each task's event
/// history is fetched and concatenated in chronological order).
pub async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Event>>> {
    state.sessions.get(&id).ok_or_else(|| Error::NotFound(format!("session {id}")))?;

    let (tasks, _total) = state.tasks.list(None, None, usize::MAX, 0);
    let mut events: Vec<Event> = tasks
        .into_iter()
        .filter(|t| t.session_id.as_deref() == Some(id.as_str()))
        .flat_map(|t| state.events.fetch(t.task_id, 0, usize::MAX, None))
        .collect();
    events.sort_by_key(|e| e.timestamp);
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct RenameSessionRequest {
    pub title: String,
}

pub async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameSessionRequest>,
) -> Result<Json<Session>> {
    let session = state.sessions.rename(&id, body.title)?;
    Ok(Json(session))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<axum::http::StatusCode> {
    state.sessions.soft_delete(&id)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

