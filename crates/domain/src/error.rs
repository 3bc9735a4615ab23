use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Shared error taxonomy for the orchestration engine (spec.md §7).
///
/// Every component surfaces failures through this enum. HTTP handlers
/// convert it to a response via `IntoResponse`; everywhere else it's the
/// crate-wide `Result` alias.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        /// `X-RateLimit-*` headers (spec.md §4.3: "Emits headers: limit,
        /// remaining, reset"). `remaining` is 0 for a rejection;
        /// `reset_at` is an absolute unix timestamp.
        limit: u64,
        remaining: u64,
        reset_at: i64,
    },

    #[error("resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    #[error("budget pressure ({pressure_level:?}), delay {delay_ms}ms")]
    BudgetPressure {
        delay_ms: u64,
        pressure_level: BudgetPressureLevel,
    },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("activity failed (retryable={retryable}): {message}")]
    ActivityFailed { retryable: bool, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("non-deterministic replay: {0}")]
    NonDeterministicReplay(String),

    #[error("event store unavailable: {0}")]
    EventStoreUnavailable(String),

    #[error("config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Backpressure severity reported alongside `Error::BudgetPressure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPressureLevel {
    Low,
    Medium,
    High,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status this error kind maps to (spec.md §7's table).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::BudgetPressure { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::ActivityFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::Cancelled => StatusCode::CONFLICT,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::NonDeterministicReplay(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::EventStoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code, used on the OpenAI-compatible
    /// surface and in `{"error": {..., "code": ...}}` bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::Unauthenticated => "unauthenticated",
            Error::PermissionDenied(_) => "permission_denied",
            Error::NotFound(_) => "not_found",
            Error::RateLimited { .. } => "rate_limited",
            Error::ResourceExhausted { .. } => "resource_exhausted",
            Error::BudgetPressure { .. } => "budget_pressure",
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::ActivityFailed { .. } => "activity_failed",
            Error::Cancelled => "cancelled",
            Error::Timeout(_) => "timeout",
            Error::NonDeterministicReplay(_) => "non_deterministic_replay",
            Error::EventStoreUnavailable(_) => "event_store_unavailable",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (
            status,
            axum::Json(json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.code(),
                    "code": self.code(),
                }
            })),
        )
            .into_response();

        if let Error::RateLimited { retry_after_secs, limit, remaining, reset_at } = &self {
            let headers = response.headers_mut();
            if let Ok(value) = retry_after_secs.to_string().parse() {
                headers.insert(axum::http::header::RETRY_AFTER, value);
            }
            if let Ok(value) = limit.to_string().parse() {
                headers.insert("x-ratelimit-limit", value);
            }
            if let Ok(value) = remaining.to_string().parse() {
                headers.insert("x-ratelimit-remaining", value);
            }
            if let Ok(value) = reset_at.to_string().parse() {
                headers.insert("x-ratelimit-reset", value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429() {
        let err = Error::RateLimited { retry_after_secs: 5, limit: 60, remaining: 0, reset_at: 0 };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = Error::NotFound("task abc".into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn cancelled_maps_to_409() {
        assert_eq!(Error::Cancelled.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn upstream_unavailable_maps_to_502() {
        let err = Error::UpstreamUnavailable("provider down".into());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn non_deterministic_replay_maps_to_500() {
        let err = Error::NonDeterministicReplay("version skew".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_code_is_stable() {
        assert_eq!(Error::Unauthenticated.code(), "unauthenticated");
        assert_eq!(
            Error::BudgetPressure {
                delay_ms: 100,
                pressure_level: BudgetPressureLevel::High
            }
            .code(),
            "budget_pressure"
        );
    }
}
