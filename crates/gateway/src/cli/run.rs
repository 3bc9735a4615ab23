//! `shannon run` — boot the gateway: construct every runtime component,
//! mount the HTTP API, and serve until the process is killed.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};

use shannon_domain::capability::{LlmCapabilities, ToolSupport};
use shannon_domain::config::{Config, ConfigSeverity, CorsConfig};
use shannon_gateway::api;
use shannon_gateway::runtime::budget::BudgetTracker;
use shannon_gateway::runtime::control_state::ControlStateStore;
use shannon_gateway::runtime::event_log::EventLog;
use shannon_gateway::runtime::idempotency::IdempotencyStore;
use shannon_gateway::runtime::patterns::PatternRegistry;
use shannon_gateway::runtime::schedules::{ScheduleRunner, ScheduleStore};
use shannon_gateway::runtime::strategy_router::StrategyRouter;
use shannon_gateway::runtime::task_store::TaskStore;
use shannon_gateway::runtime::workflow::WorkflowOrchestrator;
use shannon_gateway::state::AppState;
use shannon_providers::http::HttpProvider;
use shannon_providers::registry::ProviderRegistry;
use shannon_providers::router::LlmRouter;
use shannon_sessions::store::SessionStore;

pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Shannon starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("creating state dir {}", config.state_dir.display()))?;

    // ── Event log, control state, budget ─────────────────────────────
    let events = Arc::new(EventLog::new(&config.state_dir, config.event_log.clone()));
    let control = Arc::new(ControlStateStore::new(events.clone()));
    let budget = Arc::new(BudgetTracker::new(config.budget.clone(), config.rate_limit.clone()));
    tracing::info!("event log + control state + budget tracker ready");

    // ── LLM providers ────────────────────────────────────────────────
    let mut registry = ProviderRegistry::from_config(&config.llm);
    for provider_config in &config.llm.providers {
        let capabilities = LlmCapabilities {
            supports_tools: ToolSupport::Basic,
            supports_streaming: true,
            supports_json_mode: true,
            supports_vision: false,
            context_window_tokens: None,
            max_output_tokens: None,
        };
        match HttpProvider::new(provider_config, capabilities, config.llm.default_timeout_ms) {
            Ok(provider) => registry.register(provider_config.id.clone(), Arc::new(provider)),
            Err(e) => registry.record_init_error(provider_config.id.clone(), e),
        }
    }
    registry.finish_startup(&config.llm).context("starting LLM provider registry")?;
    tracing::info!(providers = registry.len(), "LLM provider registry ready");
    let llm = Arc::new(LlmRouter::new(registry, config.llm.roles.clone(), config.llm.default_timeout_ms));

    // ── Strategy router + cognitive patterns ─────────────────────────
    // Bootstrap simplification: the embedding classifier (an optional
    // collaborator for step 1 of spec.md §4.6) isn't wired to a config
    // section yet, so routing falls back to its keyword heuristic.
    let strategy_router = Arc::new(StrategyRouter::new(config.router.clone(), llm.clone(), budget.clone(), None));
    let patterns = Arc::new(PatternRegistry::new());

    // ── Persistence: tasks, sessions, schedules ──────────────────────
    let tasks = Arc::new(TaskStore::new(&config.state_dir).context("initializing task store")?);
    let sessions = Arc::new(SessionStore::new(&config.state_dir).context("initializing session store")?);
    let schedules = Arc::new(ScheduleStore::new(&config.state_dir).context("initializing schedule store")?);
    let idempotency = Arc::new(IdempotencyStore::new());
    tracing::info!("task/session/schedule stores ready");

    let orchestrator = Arc::new(WorkflowOrchestrator::new(
        events.clone(),
        control.clone(),
        budget.clone(),
        strategy_router.clone(),
        llm.clone(),
        patterns.clone(),
        tasks.clone(),
        sessions.clone(),
        num_cpus(),
        config.router.hybrid_dependency_wait_timeout_ms,
    ));

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = if config.auth.disabled {
        tracing::warn!("API bearer-token auth DISABLED via config");
        None
    } else {
        resolve_token_hash(&config.auth.api_token_env, "API")
    };
    let admin_token_hash = resolve_token_hash(&config.auth.admin_token_env, "admin");

    let state = AppState {
        config: config.clone(),
        llm,
        events: events.clone(),
        control,
        budget,
        router: strategy_router,
        patterns,
        tasks: tasks.clone(),
        sessions,
        schedules: schedules.clone(),
        orchestrator: orchestrator.clone(),
        idempotency,
        api_token_hash,
        admin_token_hash,
    };

    // ── Periodic event log retention sweep ────────────────────────────
    {
        let events = events.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                events.prune_expired();
            }
        });
    }

    // ── Schedule runner (tick every 30s, trigger due schedules) ───────
    {
        let schedules = schedules.clone();
        let tasks = tasks.clone();
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let runner = ScheduleRunner::new();
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                runner.tick(&schedules, &tasks, &orchestrator).await;
            }
        });
    }
    tracing::info!("schedule runner started (30s tick)");

    // ── CORS + concurrency guard + per-IP burst limiter ──────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let max_concurrent = std::env::var("SHANNON_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);

    // Coarse per-IP burst guard ahead of the per-user token-bucket limiter
    // (`BudgetTracker::check_rate_limit`, spec.md §4.3 Scenario D) — this
    // one only protects against a single peer hammering the socket before
    // auth/user identity is even known.
    let governor_conf = Arc::new(
        tower_governor::governor::GovernorConfigBuilder::default()
            .per_second(4)
            .burst_size(20)
            .finish()
            .expect("static governor config is always valid"),
    );
    let governor_layer = tower_governor::GovernorLayer { config: governor_conf };

    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .layer(governor_layer)
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "Shannon listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn resolve_token_hash(env_var: &str, label: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var, "{label} bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(env_var, "{label} bearer-token auth DISABLED — set {env_var} to enable");
            None
        }
    }
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). These are expanded into a predicate that
/// matches any port on that host. A literal `"*"` allows all origins
/// (not recommended for production).
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
