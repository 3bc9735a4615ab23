use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth surface shape consumed by the gateway (spec.md §1: identity/auth
// beyond this surface shape is out of scope).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the bearer token API clients present
    /// as `Authorization: Bearer <token>` or `X-API-Key: <token>`.
    /// If unset, the gateway runs with auth disabled (dev mode).
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// Environment variable holding the admin bearer token. If unset,
    /// admin endpoints are disabled (403).
    #[serde(default = "d_admin_token_env")]
    pub admin_token_env: String,
    /// Skip auth entirely (local dev only).
    #[serde(default)]
    pub disabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_token_env: d_api_token_env(),
            admin_token_env: d_admin_token_env(),
            disabled: false,
        }
    }
}

fn d_api_token_env() -> String {
    "SHANNON_API_TOKEN".into()
}

fn d_admin_token_env() -> String {
    "SHANNON_ADMIN_TOKEN".into()
}
