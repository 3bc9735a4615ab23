//! Provider registry.
//!
//! Holds instantiated LLM provider clients and the role→model assignments
//! that route requests to them. Unlike a vendor-specific client factory,
//! this registry never constructs providers itself — callers build each
//! `Arc<dyn LlmProvider>` (an HTTP-backed adapter, `EchoProvider`, or a
//! test double) and hand it to [`ProviderRegistry::register`].

use crate::traits::LlmProvider;
use shannon_domain::config::{LlmConfig, LlmStartupPolicy};
use shannon_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds all registered LLM providers and role assignments.
///
/// Providers that fail to construct (missing credentials, unreachable
/// endpoint) are simply never registered; [`Self::init_errors`] records why,
/// so `/v1/models/readiness` can explain a gap without the gateway refusing
/// to boot.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    roles: HashMap<String, String>,
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message so raw secrets never leak into logs or readiness endpoints.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// An empty registry with the given role assignments.
    pub fn new(roles: HashMap<String, String>) -> Self {
        Self {
            providers: HashMap::new(),
            roles,
            init_errors: Vec::new(),
        }
    }

    /// Build an empty registry from an [`LlmConfig`]'s role assignments.
    /// Callers then [`register`](Self::register) each provider the config
    /// names (resolving auth, constructing an HTTP client, etc.) and finally
    /// call [`finish_startup`](Self::finish_startup) to apply the startup
    /// policy once all construction attempts are known.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut roles = HashMap::new();
        for (role_name, role_cfg) in &config.roles {
            roles.insert(role_name.clone(), role_cfg.model.clone());
        }
        Self::new(roles)
    }

    /// Register a successfully constructed provider under `provider_id`.
    pub fn register(&mut self, provider_id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        let provider_id = provider_id.into();
        tracing::info!(provider_id = %provider_id, "registered LLM provider");
        self.providers.insert(provider_id, provider);
    }

    /// Record that `provider_id` failed to construct, masking secrets in
    /// the error before it is logged or stored.
    pub fn record_init_error(&mut self, provider_id: impl Into<String>, error: impl ToString) {
        let provider_id = provider_id.into();
        let safe_error = mask_secrets(&error.to_string());
        tracing::warn!(
            provider_id = %provider_id,
            error = %safe_error,
            "failed to initialize LLM provider, skipping"
        );
        self.init_errors.push(ProviderInitError {
            provider_id,
            error: safe_error,
        });
    }

    /// Apply the configured [`LlmStartupPolicy`] now that every provider
    /// construction attempt (register or record_init_error) has run.
    pub fn finish_startup(&self, config: &LlmConfig) -> Result<()> {
        if self.providers.is_empty() && config.startup_policy == LlmStartupPolicy::RequireOne {
            return Err(Error::Config(
                "no LLM providers initialized (startup_policy = require_one)".into(),
            ));
        }
        if self.providers.is_empty() {
            tracing::warn!(
                failed_providers = self.init_errors.len(),
                "no LLM providers initialized (startup_policy = allow_none); \
                 gateway will boot but LLM endpoints will fail until auth \
                 is configured — check /v1/models/readiness for details"
            );
        }
        Ok(())
    }

    /// Look up a provider by its config id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Get the provider assigned to a given role (e.g. "planner", "executor").
    /// The role config stores "provider_id/model_name"; we split on '/' and
    /// look up the provider by the first segment.
    pub fn for_role(&self, role: &str) -> Option<Arc<dyn LlmProvider>> {
        let model_spec = self.roles.get(role)?;
        let provider_id = model_spec.split('/').next().unwrap_or(model_spec);
        self.providers.get(provider_id).cloned()
    }

    /// Get the model name assigned to a given role.
    pub fn model_for_role(&self, role: &str) -> Option<&str> {
        self.roles.get(role).map(|s| s.as_str())
    }

    /// Iterate over all registered providers.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn LlmProvider>)> {
        self.providers.iter()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// List all registered provider IDs (sorted).
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// List roles and their assigned model specs.
    pub fn list_roles(&self) -> HashMap<String, String> {
        self.roles.clone()
    }

    /// Provider initialization errors (empty if all succeeded).
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::EchoProvider;

    fn registry_with_echo() -> ProviderRegistry {
        let mut roles = HashMap::new();
        roles.insert("planner".to_string(), "echo/echo-1".to_string());
        let mut reg = ProviderRegistry::new(roles);
        reg.register("echo", Arc::new(EchoProvider::new("echo")));
        reg
    }

    #[test]
    fn register_and_get() {
        let reg = registry_with_echo();
        assert!(reg.get("echo").is_some());
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn for_role_resolves_provider_from_model_spec() {
        let reg = registry_with_echo();
        assert!(reg.for_role("planner").is_some());
        assert!(reg.for_role("executor").is_none());
    }

    #[test]
    fn model_for_role_returns_spec() {
        let reg = registry_with_echo();
        assert_eq!(reg.model_for_role("planner"), Some("echo/echo-1"));
    }

    #[test]
    fn init_errors_mask_long_tokens() {
        let mut reg = ProviderRegistry::new(HashMap::new());
        reg.record_init_error("flaky", "unauthorized: sk-abcdefghijklmnopqrstuvwxyz");
        let errs = reg.init_errors();
        assert_eq!(errs.len(), 1);
        assert!(!errs[0].error.contains("abcdefghijklmnopqrstuvwxyz"));
        assert!(errs[0].error.contains("..."));
    }

    #[test]
    fn finish_startup_require_one_errors_when_empty() {
        let mut config = LlmConfig::default();
        config.startup_policy = LlmStartupPolicy::RequireOne;
        let reg = ProviderRegistry::new(HashMap::new());
        assert!(reg.finish_startup(&config).is_err());
    }

    #[test]
    fn finish_startup_allow_none_tolerates_empty() {
        let config = LlmConfig::default();
        let reg = ProviderRegistry::new(HashMap::new());
        assert!(reg.finish_startup(&config).is_ok());
    }

    #[test]
    fn list_providers_sorted() {
        let mut reg = ProviderRegistry::new(HashMap::new());
        reg.register("zeta", Arc::new(EchoProvider::new("zeta")));
        reg.register("alpha", Arc::new(EchoProvider::new("alpha")));
        assert_eq!(reg.list_providers(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
