//! Shared application state handed to every axum handler.
//!
//! Every field is an `Arc` over a component documented in
//! [`crate::runtime`]; `AppState` itself is a thin, cheaply-`Clone`-able
//! bundle (axum's `State<T>` extractor requires `Clone`), never a second
//! home for business logic.

use std::sync::Arc;

use shannon_domain::config::Config;
use shannon_providers::router::LlmRouter;
use shannon_sessions::store::SessionStore;

use crate::runtime::budget::BudgetTracker;
use crate::runtime::control_state::ControlStateStore;
use crate::runtime::event_log::EventLog;
use crate::runtime::idempotency::IdempotencyStore;
use crate::runtime::patterns::PatternRegistry;
use crate::runtime::schedules::ScheduleStore;
use crate::runtime::strategy_router::StrategyRouter;
use crate::runtime::task_store::TaskStore;
use crate::runtime::workflow::WorkflowOrchestrator;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core** — config and the LLM router (C2)
/// - **Runtime** — event log, control-state, budget, strategy router,
///   pattern registry, task store, sessions, schedules, and the
///   orchestrator that ties them together (C1, C3, C5, C6, C9)
/// - **Security** — token hashes computed once at startup
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<LlmRouter>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub events: Arc<EventLog>,
    pub control: Arc<ControlStateStore>,
    pub budget: Arc<BudgetTracker>,
    pub router: Arc<StrategyRouter>,
    pub patterns: Arc<PatternRegistry>,
    pub tasks: Arc<TaskStore>,
    pub sessions: Arc<SessionStore>,
    pub schedules: Arc<ScheduleStore>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    /// Suppresses duplicate side effects for retried requests carrying
    /// the same `Idempotency-Key` (spec.md §4.8).
    pub idempotency: Arc<IdempotencyStore>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 of the bearer token named by `config.auth.api_token_env`.
    /// `None` means auth is disabled (dev mode) and every request passes.
    pub api_token_hash: Option<Vec<u8>>,
    /// SHA-256 of the bearer token named by `config.auth.admin_token_env`.
    /// `None` means the admin surface rejects every request.
    pub admin_token_hash: Option<Vec<u8>>,
}
