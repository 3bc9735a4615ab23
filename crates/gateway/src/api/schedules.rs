//! Schedule CRUD + list-runs + event stream API (spec.md §6.4).
//!
//! - `POST   /api/v1/schedules`            — create
//! - `GET    /api/v1/schedules`            — list
//! - `GET    /api/v1/schedules/:id`        — get
//! - `PATCH  /api/v1/schedules/:id`        — update fields
//! - `POST   /api/v1/schedules/:id/pause`  — pause
//! - `POST   /api/v1/schedules/:id/resume` — resume (clears cooldown)
//! - `DELETE /api/v1/schedules/:id`        — delete
//! - `GET    /api/v1/schedules/:id/runs`   — tasks this schedule fired
//! - `GET    /api/v1/schedules/events`     — SSE stream of schedule events

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;
use shannon_domain::error::{Error, Result};
use shannon_domain::task::Task;
use uuid::Uuid;

use crate::runtime::schedules::{MissedPolicy, NewSchedule, ScheduleEvent, ScheduleView};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub user_id: String,
    pub query: String,
    #[serde(default)]
    pub mode_override: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_timezone() -> String {
    "UTC".into()
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<impl IntoResponse> {
    let schedule = state.schedules.create(NewSchedule {
        name: req.name,
        cron: req.cron,
        timezone: req.timezone,
        user_id: req.user_id,
        query: req.query,
        mode_override: req.mode_override,
        session_id: req.session_id,
    })?;
    Ok((StatusCode::CREATED, Json(schedule.to_view())))
}

#[derive(Debug, Deserialize)]
pub struct ListSchedulesQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn list_schedules(
    State(state): State<AppState>,
    Query(q): Query<ListSchedulesQuery>,
) -> impl IntoResponse {
    let views: Vec<ScheduleView> = state.schedules.list(q.user_id.as_deref()).iter().map(|s| s.to_view()).collect();
    Json(serde_json::json!({ "schedules": views, "count": views.len() }))
}

pub async fn get_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScheduleView>> {
    state
        .schedules
        .get(id)
        .map(|s| Json(s.to_view()))
        .ok_or_else(|| Error::NotFound(format!("schedule {id}")))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateScheduleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub mode_override: Option<Option<String>>,
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<Json<ScheduleView>> {
    let schedule = state
        .schedules
        .update_fields(id, req.name, req.cron, req.timezone, req.query, req.mode_override)?;
    Ok(Json(schedule.to_view()))
}

pub async fn pause_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScheduleView>> {
    Ok(Json(state.schedules.pause(id)?.to_view()))
}

pub async fn resume_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScheduleView>> {
    Ok(Json(state.schedules.resume(id)?.to_view()))
}

pub async fn delete_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    state.schedules.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// There is no separate Run entity (see the module doc on
/// [`crate::runtime::schedules::store`]) — "runs" are just tasks whose
/// `context["schedule_id"]` names this schedule, filtered from the
/// shared task store.
pub async fn list_schedule_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ListRunsQuery>,
) -> Result<Json<Vec<Task>>> {
    state.schedules.get(id).ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;

    let (all, _total) = state.tasks.list(None, None, usize::MAX, 0);
    let schedule_id = serde_json::json!(id);
    let mut runs: Vec<Task> = all
        .into_iter()
        .filter(|t| t.context.get("schedule_id") == Some(&schedule_id))
        .collect();
    runs.sort_by_key(|t| std::cmp::Reverse(t.created_at));
    runs.truncate(q.limit);
    Ok(Json(runs))
}

/// Maps MissedPolicy on/off into the module's re-export surface so the
/// type shows up in generated OpenAPI output (SPEC_FULL.md §S.2); no
/// behavior lives here.
#[allow(dead_code)]
fn _missed_policy_is_exported() -> MissedPolicy {
    MissedPolicy::default()
}

pub async fn schedule_events_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, std::convert::Infallible>>> {
    let mut rx = state.schedules.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let event_type = match &event {
                        ScheduleEvent::ScheduleUpdated { .. } => "schedule.updated",
                        ScheduleEvent::ScheduleRunStarted { .. } => "schedule.run_started",
                        ScheduleEvent::ScheduleRunCompleted { .. } => "schedule.run_completed",
                    };
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(SseEvent::default().event(event_type).data(json));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    };

    Sse::new(stream)
}
