//! Shared utility functions for provider adapters.

use shannon_domain::config::ProviderAuthConfig;
use shannon_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::UpstreamUnavailable`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::UpstreamUnavailable(e.to_string())
    }
}

/// Resolve the API key for a provider connection.
///
/// Precedence:
/// 1. `key` field (plaintext — warn)
/// 2. `env` field (reads the named environment variable)
/// 3. First set variable in `keys` (round-robin rotation pool)
/// 4. Error
pub fn resolve_api_key(auth: &ProviderAuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        tracing::warn!(
            "API key loaded from plaintext config field 'key' — prefer 'env' instead"
        );
        return Ok(key.clone());
    }

    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map_err(|_| {
            Error::Config(format!(
                "environment variable '{}' not set or not valid UTF-8",
                env_var
            ))
        });
    }

    for env_var in &auth.keys {
        if let Ok(val) = std::env::var(env_var) {
            return Ok(val);
        }
    }

    Err(Error::Config(
        "no API key configured: set 'key', 'env', or 'keys' on the provider's auth config".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_plaintext() {
        let auth = ProviderAuthConfig {
            key: Some("sk-test-123".into()),
            ..Default::default()
        };
        let result = resolve_api_key(&auth).unwrap();
        assert_eq!(result, "sk-test-123");
    }

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "SHANNON_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let auth = ProviderAuthConfig {
            env: Some(var_name.into()),
            ..Default::default()
        };
        let result = resolve_api_key(&auth).unwrap();
        assert_eq!(result, "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_env_var_missing() {
        let auth = ProviderAuthConfig {
            env: Some("SHANNON_TEST_NONEXISTENT_VAR_8888".into()),
            ..Default::default()
        };
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("SHANNON_TEST_NONEXISTENT_VAR_8888"));
    }

    #[test]
    fn resolve_api_key_no_config() {
        let auth = ProviderAuthConfig::default();
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("no API key configured"));
    }

    #[test]
    fn resolve_api_key_plaintext_takes_precedence_over_env() {
        let auth = ProviderAuthConfig {
            key: Some("plaintext-wins".into()),
            env: Some("SHANNON_TEST_SHOULD_NOT_BE_READ".into()),
            ..Default::default()
        };
        let result = resolve_api_key(&auth).unwrap();
        assert_eq!(result, "plaintext-wins");
    }

    #[test]
    fn resolve_api_key_falls_back_through_keys_pool() {
        let v1 = "SHANNON_TEST_POOL_KEY_A";
        let v2 = "SHANNON_TEST_POOL_KEY_B";
        std::env::remove_var(v1);
        std::env::set_var(v2, "pool-secret-b");
        let auth = ProviderAuthConfig {
            keys: vec![v1.into(), v2.into()],
            ..Default::default()
        };
        let result = resolve_api_key(&auth).unwrap();
        assert_eq!(result, "pool-secret-b");
        std::env::remove_var(v2);
    }
}
