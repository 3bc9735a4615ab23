pub mod admin;
pub mod approvals;
pub mod auth;
pub mod openai_compat;
pub mod schedules;
pub mod sessions;
pub mod stream;
pub mod tasks;

use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required — health probes,
/// the OpenAPI description) and **protected** (gated behind the
/// `SHANNON_API_TOKEN` bearer-token middleware, spec.md §4.8's
/// middleware chain step 2).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(admin::health))
        .route("/readiness", get(admin::readiness))
        .route("/openapi.json", get(admin::openapi_spec));

    let protected = Router::new()
        // Tasks (spec.md §4.8)
        .route("/api/v1/tasks", post(tasks::create_task))
        .route("/api/v1/tasks", get(tasks::list_tasks))
        .route("/api/v1/tasks/stream", post(tasks::create_task_stream))
        .route("/api/v1/tasks/:id", get(tasks::get_task))
        .route("/api/v1/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/api/v1/tasks/:id/pause", post(tasks::pause_task))
        .route("/api/v1/tasks/:id/resume", post(tasks::resume_task))
        .route("/api/v1/tasks/:id/control-state", get(tasks::control_state))
        .route("/api/v1/tasks/:id/events", get(tasks::task_events))
        .route("/api/v1/tasks/:id/timeline", get(tasks::task_timeline))
        .route("/api/v1/tasks/:id/stream", get(tasks::task_stream_redirect))
        // Streaming
        .route("/api/v1/stream/sse", get(stream::sse))
        .route("/api/v1/stream/ws", get(stream::ws))
        // Schedules
        .route("/api/v1/schedules", post(schedules::create_schedule))
        .route("/api/v1/schedules", get(schedules::list_schedules))
        .route("/api/v1/schedules/events", get(schedules::schedule_events_sse))
        .route("/api/v1/schedules/:id", get(schedules::get_schedule))
        .route("/api/v1/schedules/:id", patch(schedules::update_schedule))
        .route("/api/v1/schedules/:id", delete(schedules::delete_schedule))
        .route("/api/v1/schedules/:id/pause", post(schedules::pause_schedule))
        .route("/api/v1/schedules/:id/resume", post(schedules::resume_schedule))
        .route("/api/v1/schedules/:id/runs", get(schedules::list_schedule_runs))
        // Sessions (bare prefix, spec.md §6.1)
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/:id", get(sessions::get_session))
        .route("/sessions/:id", patch(sessions::rename_session))
        .route("/sessions/:id", delete(sessions::delete_session))
        .route("/sessions/:id/history", get(sessions::session_history))
        .route("/sessions/:id/events", get(sessions::session_events))
        // Approvals
        .route("/approvals/decision", post(approvals::decide))
        // OpenAI-compatible surface
        .route("/v1/chat/completions", post(openai_compat::chat_completions))
        .route("/v1/models", get(openai_compat::list_models))
        .route("/v1/models/:id", get(openai_compat::get_model))
        // Metrics snapshot
        .route("/v1/metrics", get(admin::metrics))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public.merge(protected).layer(tower_http::trace::TraceLayer::new_for_http())
}
