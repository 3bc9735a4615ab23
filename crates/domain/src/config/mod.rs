mod auth;
mod budget;
mod event_log;
mod llm;
mod observability;
mod rate_limit;
mod router;
mod server;

pub use auth::*;
pub use budget::*;
pub use event_log::*;
pub use llm::*;
pub use observability::*;
pub use rate_limit::*;
pub use router::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config (SPEC_FULL.md §S.4)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn default_state_dir() -> PathBuf {
    PathBuf::from("./data/shannon")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Directory holding the JSONL-backed event log, task store, session
    /// store, and schedule store (SPEC_FULL.md §S.4). Created on startup
    /// if it doesn't exist.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            router: RouterConfig::default(),
            budget: BudgetConfig::default(),
            rate_limit: RateLimitConfig::default(),
            event_log: EventLogConfig::default(),
            observability: ObservabilityConfig::default(),
            auth: AuthConfig::default(),
            state_dir: default_state_dir(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. An empty
    /// vec means everything looks good; config-loading errors are
    /// `Error::Config` and abort startup (SPEC_FULL.md §S.4).
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: "provider base_url must not be empty".into(),
                });
            }
            if !provider.base_url.is_empty()
                && !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }
            if !provider.id.is_empty() && !seen_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later provider will shadow earlier one",
                        provider.id
                    ),
                });
            }

            let needs_credentials = matches!(provider.auth.mode, llm::AuthMode::ApiKey | llm::AuthMode::QueryParam);
            if needs_credentials {
                let has_env = provider.auth.env.as_ref().is_some_and(|v| !v.is_empty());
                let has_key = provider.auth.key.as_ref().is_some_and(|v| !v.is_empty());
                let has_keys = !provider.auth.keys.is_empty();
                if !has_env && !has_key && !has_keys {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("llm.providers[{i}].auth"),
                        message: format!(
                            "provider \"{}\" uses {:?} auth mode but has no auth.env, auth.key, or auth.keys configured",
                            provider.id, provider.auth.mode
                        ),
                    });
                }
            }
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*" {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        if self.rate_limit.enabled && self.rate_limit.requests_per_minute == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "rate_limit.requests_per_minute".into(),
                message: "requests_per_minute must be greater than 0 when rate limiting is enabled".into(),
            });
        }

        if self.event_log.ring_capacity < 256 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "event_log.ring_capacity".into(),
                message: format!(
                    "ring_capacity must be >= 256 (got {})",
                    self.event_log.ring_capacity
                ),
            });
        }

        if self.budget.max_in_flight_workflows == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "budget.max_in_flight_workflows".into(),
                message: "max_in_flight_workflows must be greater than 0".into(),
            });
        }

        if !self.auth.disabled && self.auth.api_token_env.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "auth.api_token_env".into(),
                message: "api_token_env must not be empty unless auth.disabled is true".into(),
            });
        }

        if self.state_dir.as_os_str().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "state_dir".into(),
                message: "state_dir must not be empty".into(),
            });
        }

        if let Some(endpoint) = &self.observability.otlp_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "observability.otlp_endpoint".into(),
                    message: format!("otlp_endpoint must start with http:// or https:// (got \"{endpoint}\")"),
                });
            }
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            server: ServerConfig {
                port: 3210,
                host: "127.0.0.1".into(),
                ..ServerConfig::default()
            },
            llm: LlmConfig {
                providers: vec![ProviderConfig {
                    id: "openai".into(),
                    base_url: "https://api.openai.com/v1".into(),
                    auth: llm::ProviderAuthConfig {
                        mode: llm::AuthMode::ApiKey,
                        env: Some("OPENAI_API_KEY".into()),
                        ..llm::ProviderAuthConfig::default()
                    },
                    default_model: None,
                }],
                ..LlmConfig::default()
            },
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.port").expect("expected server.port error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn server_host_empty_is_error() {
        let mut cfg = valid_config();
        cfg.server.host = String::new();
        let issues = cfg.validate();
        assert_eq!(find_issue(&issues, "server.host").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn provider_base_url_invalid_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].base_url = "ws://localhost:1234".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers[0].base_url").expect("expected provider base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn provider_api_key_mode_no_credentials_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].auth = llm::ProviderAuthConfig {
            mode: llm::AuthMode::ApiKey,
            env: None,
            key: None,
            keys: vec![],
        };
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers[0].auth").expect("expected auth error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
        assert!(issue.message.contains("no auth.env"));
    }

    #[test]
    fn provider_none_auth_mode_no_credentials_is_ok() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].auth = llm::ProviderAuthConfig {
            mode: llm::AuthMode::None,
            env: None,
            key: None,
            keys: vec![],
        };
        let issues = cfg.validate();
        assert!(find_issue(&issues, "llm.providers[0].auth").is_none());
    }

    #[test]
    fn duplicate_provider_ids_is_warning() {
        let mut cfg = valid_config();
        let second = ProviderConfig {
            id: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            auth: llm::ProviderAuthConfig {
                mode: llm::AuthMode::ApiKey,
                env: Some("OPENAI_API_KEY_2".into()),
                ..llm::ProviderAuthConfig::default()
            },
            default_model: None,
        };
        cfg.llm.providers.push(second);
        let issues = cfg.validate();
        let dup_issues: Vec<_> = issues.iter().filter(|e| e.message.contains("duplicate provider id")).collect();
        assert_eq!(dup_issues.len(), 1);
        assert_eq!(dup_issues[0].severity, ConfigSeverity::Warning);
    }

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        assert_eq!(find_issue(&issues, "server.cors.allowed_origins").unwrap().severity, ConfigSeverity::Warning);
    }

    #[test]
    fn no_providers_is_warning() {
        let mut cfg = valid_config();
        cfg.llm.providers.clear();
        let issues = cfg.validate();
        assert_eq!(find_issue(&issues, "llm.providers").unwrap().severity, ConfigSeverity::Warning);
    }

    #[test]
    fn rate_limit_zero_when_enabled_is_error() {
        let mut cfg = valid_config();
        cfg.rate_limit.enabled = true;
        cfg.rate_limit.requests_per_minute = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "rate_limit.requests_per_minute").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn rate_limit_zero_when_disabled_is_ok() {
        let mut cfg = valid_config();
        cfg.rate_limit.enabled = false;
        cfg.rate_limit.requests_per_minute = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "rate_limit.requests_per_minute").is_none());
    }

    #[test]
    fn event_log_ring_capacity_below_minimum_is_error() {
        let mut cfg = valid_config();
        cfg.event_log.ring_capacity = 100;
        let issues = cfg.validate();
        assert_eq!(find_issue(&issues, "event_log.ring_capacity").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn max_in_flight_zero_is_error() {
        let mut cfg = valid_config();
        cfg.budget.max_in_flight_workflows = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "budget.max_in_flight_workflows").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn auth_disabled_allows_empty_token_env() {
        let mut cfg = valid_config();
        cfg.auth.disabled = true;
        cfg.auth.api_token_env = String::new();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "auth.api_token_env").is_none());
    }

    #[test]
    fn otlp_endpoint_invalid_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.observability.otlp_endpoint = Some("grpc://localhost:4317".into());
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "observability.otlp_endpoint").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn state_dir_empty_is_error() {
        let mut cfg = valid_config();
        cfg.state_dir = std::path::PathBuf::new();
        let issues = cfg.validate();
        assert_eq!(find_issue(&issues, "state_dir").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn state_dir_has_sensible_default() {
        let cfg = Config::default();
        assert_eq!(cfg.state_dir, std::path::PathBuf::from("./data/shannon"));
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(format!("{err}"), "[ERROR] server.port: port must be greater than 0");
    }
}
