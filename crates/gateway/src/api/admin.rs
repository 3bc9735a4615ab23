//! Public, unauthenticated admin-lite surface (spec.md §4.8 "Public"):
//! liveness/readiness probes, a static OpenAPI description, and a JSON
//! metrics snapshot assembled from the in-process stores (SPEC_FULL.md
//! §S.2 — this gateway has no separate metrics crate, so `/v1/metrics`
//! reads the same counters the structured logs already carry).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;
use axum::extract::State;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let providers_ready = !state.llm.registry().is_empty();
    let status = if providers_ready { "ready" } else { "not_ready" };
    let code = if providers_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        code,
        Json(serde_json::json!({
            "status": status,
            "providers": state.llm.registry().len(),
        })),
    )
}

pub async fn openapi_spec() -> impl IntoResponse {
    Json(serde_json::json!({
        "openapi": "3.0.3",
        "info": { "title": "Shannon", "version": env!("CARGO_PKG_VERSION") },
        "paths": {
            "/api/v1/tasks": { "post": {}, "get": {} },
            "/api/v1/tasks/stream": { "post": {} },
            "/api/v1/tasks/{id}": { "get": {} },
            "/api/v1/tasks/{id}/cancel": { "post": {} },
            "/api/v1/tasks/{id}/pause": { "post": {} },
            "/api/v1/tasks/{id}/resume": { "post": {} },
            "/api/v1/tasks/{id}/control-state": { "get": {} },
            "/api/v1/tasks/{id}/events": { "get": {} },
            "/api/v1/tasks/{id}/timeline": { "get": {} },
            "/api/v1/tasks/{id}/stream": { "get": {} },
            "/api/v1/stream/sse": { "get": {} },
            "/api/v1/stream/ws": { "get": {} },
            "/api/v1/schedules": { "post": {}, "get": {} },
            "/api/v1/schedules/{id}": { "get": {}, "patch": {}, "delete": {} },
            "/api/v1/schedules/{id}/pause": { "post": {} },
            "/api/v1/schedules/{id}/resume": { "post": {} },
            "/api/v1/schedules/{id}/runs": { "get": {} },
            "/api/v1/schedules/events": { "get": {} },
            "/sessions": { "get": {} },
            "/sessions/{id}": { "get": {}, "patch": {}, "delete": {} },
            "/sessions/{id}/history": { "get": {} },
            "/sessions/{id}/events": { "get": {} },
            "/approvals/decision": { "post": {} },
            "/v1/chat/completions": { "post": {} },
            "/v1/models": { "get": {} },
            "/v1/models/{id}": { "get": {} },
            "/v1/metrics": { "get": {} },
            "/health": { "get": {} },
            "/readiness": { "get": {} },
        },
    }))
}

/// Counters/gauges snapshot (SPEC_FULL.md §S.2): task status counts, the
/// active control-state count, and the provider registry size. There is
/// no separate metrics crate in this codebase — this reads the same
/// stores the structured logs already derive their fields from.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let (tasks, total_tasks) = state.tasks.list(None, None, usize::MAX, 0);
    let mut status_counts = std::collections::HashMap::new();
    for task in &tasks {
        *status_counts.entry(format!("{:?}", task.status)).or_insert(0u64) += 1;
    }

    Json(serde_json::json!({
        "tasks": {
            "total": total_tasks,
            "by_status": status_counts,
        },
        "providers": {
            "registered": state.llm.registry().len(),
            "init_errors": state.llm.registry().init_errors().len(),
        },
        "schedules": {
            "total": state.schedules.list(None).len(),
        },
    }))
}
