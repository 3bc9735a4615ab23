//! Task API endpoints — submit, list, get, signal, events, timeline,
//! stream (spec.md §4.8, §6.1).
//!
//! - `POST   /v1/tasks`                 — submit a task
//! - `POST   /v1/tasks/stream`          — submit, return a stream URL
//! - `GET    /v1/tasks`                 — list (status/session_id filter + pagination)
//! - `GET    /v1/tasks/:id`             — get task
//! - `POST   /v1/tasks/:id/cancel`      — request cancellation
//! - `POST   /v1/tasks/:id/pause`       — request pause
//! - `POST   /v1/tasks/:id/resume`      — resume a paused task
//! - `GET    /v1/tasks/:id/control-state` — read control state
//! - `GET    /v1/tasks/:id/events`      — paged persistent event history
//! - `GET    /v1/tasks/:id/timeline`    — derived timeline (summary|full)
//! - `GET    /v1/tasks/:id/stream`      — redirect to the SSE endpoint

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Redirect, Response};
use serde::{Deserialize, Serialize};
use shannon_domain::error::{Error, Result};
use shannon_domain::event::{Event, EventType};
use shannon_domain::task::{Task, TaskStatus};
use uuid::Uuid;

use crate::runtime::workflow::SubmitRequest;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tasks (+ /v1/tasks/stream)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Request body for `POST /v1/tasks` (spec.md §6.1's recognized fields).
/// Fields beyond the router's own `RouteOverrides` shape (`model_tier`,
/// `model_override`, `provider_override`, `research_strategy`,
/// `max_iterations`, `enable_verification`, `disable_ai`) aren't
/// independently threaded through the router; they're folded into
/// `Task.context` and carried opaquely (SPEC_FULL.md open question,
/// recorded in DESIGN.md).
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub model_tier: Option<String>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub provider_override: Option<String>,
    #[serde(default)]
    pub research_strategy: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub max_concurrent_agents: Option<u32>,
    #[serde(default)]
    pub enable_verification: Option<bool>,
    #[serde(default)]
    pub disable_ai: Option<bool>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub routing_labels: Vec<String>,
}

const PROVIDER_OVERRIDES: &[&str] = &[
    "openai", "anthropic", "google", "groq", "xai", "deepseek", "qwen", "zai", "ollama", "mistral", "cohere",
];
const RESEARCH_STRATEGIES: &[&str] = &["quick", "standard", "deep", "academic"];
const MODEL_TIERS: &[&str] = &["small", "medium", "large"];

/// spec.md §6.1's validation rules: `disable_ai` conflicts with any
/// model/provider override (top-level or inside `context`); unknown enum
/// values are rejected; numeric ranges are enforced.
fn validate(req: &CreateTaskRequest) -> Result<()> {
    if req.query.trim().is_empty() {
        return Err(Error::InvalidRequest("query must not be empty".into()));
    }

    if req.disable_ai == Some(true) {
        let has_override = req.model_tier.is_some()
            || req.model_override.is_some()
            || req.provider_override.is_some()
            || req.context.contains_key("model_tier")
            || req.context.contains_key("model_override")
            || req.context.contains_key("provider_override");
        if has_override {
            return Err(Error::InvalidRequest(
                "disable_ai=true conflicts with model_tier/model_override/provider_override".into(),
            ));
        }
    }

    if let Some(tier) = &req.model_tier {
        if !MODEL_TIERS.contains(&tier.as_str()) {
            return Err(Error::InvalidRequest(format!("unknown model_tier \"{tier}\"")));
        }
    }
    if let Some(provider) = &req.provider_override {
        if !PROVIDER_OVERRIDES.contains(&provider.as_str()) {
            return Err(Error::InvalidRequest(format!("unknown provider_override \"{provider}\"")));
        }
    }
    if let Some(strategy) = &req.research_strategy {
        if !RESEARCH_STRATEGIES.contains(&strategy.as_str()) {
            return Err(Error::InvalidRequest(format!("unknown research_strategy \"{strategy}\"")));
        }
    }
    if let Some(n) = req.max_iterations {
        if !(1..=50).contains(&n) {
            return Err(Error::InvalidRequest("max_iterations must be in [1, 50]".into()));
        }
    }
    if let Some(n) = req.max_concurrent_agents {
        if !(1..=20).contains(&n) {
            return Err(Error::InvalidRequest("max_concurrent_agents must be in [1, 20]".into()));
        }
    }
    Ok(())
}

fn context_for(req: &CreateTaskRequest) -> HashMap<String, serde_json::Value> {
    let mut ctx = req.context.clone();
    let mut set = |k: &str, v: Option<serde_json::Value>| {
        if let Some(v) = v {
            ctx.entry(k.to_string()).or_insert(v);
        }
    };
    set("model_tier", req.model_tier.as_ref().map(|v| serde_json::json!(v)));
    set("model_override", req.model_override.as_ref().map(|v| serde_json::json!(v)));
    set("provider_override", req.provider_override.as_ref().map(|v| serde_json::json!(v)));
    set("research_strategy", req.research_strategy.as_ref().map(|v| serde_json::json!(v)));
    set("max_iterations", req.max_iterations.map(|v| serde_json::json!(v)));
    set("enable_verification", req.enable_verification.map(|v| serde_json::json!(v)));
    set("disable_ai", req.disable_ai.map(|v| serde_json::json!(v)));
    ctx
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Task> for CreateTaskResponse {
    fn from(t: Task) -> Self {
        Self { task_id: t.task_id, status: t.status, message: None, created_at: t.created_at }
    }
}

async fn submit(state: &AppState, headers: &HeaderMap, req: CreateTaskRequest) -> Result<Task> {
    validate(&req)?;

    if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        if let Some(existing) = state.idempotency.lookup(key) {
            if let Some(task) = state.tasks.get(existing) {
                return Ok(task);
            }
        }
    }

    let submit_req = SubmitRequest {
        query: req.query.clone(),
        user_id: "anonymous".to_string(),
        session_id: req.session_id.clone(),
        tenant_id: req.tenant_id.clone(),
        mode_override: req.mode.clone(),
        routing_labels: req.routing_labels.clone(),
        context: context_for(&req),
    };

    let task = state.orchestrator.submit(submit_req).await?;

    if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        state.idempotency.record(key, task.task_id);
    }

    Ok(task)
}

fn headers_for(task: &Task) -> [(&'static str, String); 2] {
    [
        ("x-workflow-id", task.task_id.to_string()),
        ("x-session-id", task.session_id.clone().unwrap_or_default()),
    ]
}

pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Response> {
    let task = submit(&state, &headers, req).await?;
    let hdrs = headers_for(&task);
    Ok((StatusCode::OK, hdrs, Json(CreateTaskResponse::from(task))).into_response())
}

#[derive(Debug, Serialize)]
pub struct StreamTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub stream_url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn create_task_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Response> {
    let task = submit(&state, &headers, req).await?;
    let hdrs = headers_for(&task);
    let body = StreamTaskResponse {
        task_id: task.task_id,
        status: task.status,
        stream_url: format!("/api/v1/stream/sse?workflow_id={}", task.task_id),
        created_at: task.created_at,
    };
    Ok((StatusCode::CREATED, hdrs, Json(body)).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks, GET /v1/tasks/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_tasks(State(state): State<AppState>, Query(q): Query<ListTasksQuery>) -> impl IntoResponse {
    // `TaskStore::list` filters by user_id/status natively; session_id
    // has no native index so it's post-filtered here.
    let (page, total) = state.tasks.list(None, q.status, usize::MAX, 0);
    let filtered: Vec<Task> = page
        .into_iter()
        .filter(|t| q.session_id.as_deref().map(|s| t.session_id.as_deref() == Some(s)).unwrap_or(true))
        .collect();
    let total = if q.session_id.is_some() { filtered.len() } else { total };
    let page: Vec<Task> = filtered.into_iter().skip(q.offset).take(q.limit).collect();
    Json(serde_json::json!({ "tasks": page, "total": total, "limit": q.limit, "offset": q.offset }))
}

pub async fn get_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Task>> {
    state.tasks.get(id).map(Json).ok_or_else(|| Error::NotFound(format!("task {id}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control signals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, Default)]
pub struct SignalQuery {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<SignalQuery>,
) -> Result<StatusCode> {
    state.orchestrator.cancel(id, q.reason)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<SignalQuery>,
) -> Result<StatusCode> {
    state.orchestrator.pause(id, q.reason)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn resume_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    state.orchestrator.resume(id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn control_state(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<shannon_domain::control_state::ControlState>> {
    state.control.get(id).map(Json).ok_or_else(|| Error::NotFound(format!("task {id}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events + timeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub from_seq: u64,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Comma-separated `EventType` wire names (spec.md §6.2).
    #[serde(default)]
    pub types: Option<String>,
}

fn parse_types(types: &Option<String>) -> Result<Option<Vec<EventType>>> {
    let Some(raw) = types else { return Ok(None) };
    let mut parsed = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let ty = EventType::from_wire_name(name)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown event type \"{name}\"")))?;
        parsed.push(ty);
    }
    Ok(Some(parsed))
}

pub async fn task_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>> {
    let types = parse_types(&q.types)?;
    let events = state.events.fetch(id, q.from_seq, q.limit, types.as_deref());
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    #[serde(default = "timeline_summary")]
    pub mode: String,
}

fn timeline_summary() -> String {
    "summary".to_string()
}

/// A derived span of a per-agent timeline in summary mode (SPEC_FULL.md
/// §S.7's "timeline is a derived view over the persistent event store").
#[derive(Debug, Serialize)]
pub struct TimelineSpan {
    pub agent_id: Option<String>,
    pub started_seq: u64,
    pub ended_seq: Option<u64>,
    pub event_count: usize,
}

pub async fn task_timeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<TimelineQuery>,
) -> Result<Response> {
    let events = state.events.fetch(id, 0, usize::MAX, None);
    if q.mode == "full" {
        return Ok(Json(events).into_response());
    }

    let mut spans: Vec<TimelineSpan> = Vec::new();
    let mut by_agent: HashMap<Option<String>, usize> = HashMap::new();
    for event in &events {
        let idx = *by_agent.entry(event.agent_id.clone()).or_insert_with(|| {
            spans.push(TimelineSpan {
                agent_id: event.agent_id.clone(),
                started_seq: event.seq,
                ended_seq: None,
                event_count: 0,
            });
            spans.len() - 1
        });
        let span = &mut spans[idx];
        span.ended_seq = Some(event.seq);
        span.event_count += 1;
    }
    Ok(Json(spans).into_response())
}

pub async fn task_stream_redirect(Path(id): Path<Uuid>) -> Redirect {
    Redirect::temporary(&format!("/api/v1/stream/sse?workflow_id={id}"))
}
