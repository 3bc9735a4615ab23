use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per (api-key or user, window-key) fixed-window rate-limit counter
/// (spec.md §3 "Rate-limit Bucket", §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub key: String,
    pub window_key: String,
    pub request_count: u64,
    pub token_count: u64,
    pub expires_at: DateTime<Utc>,
}

/// Decision returned by the per-user fixed-window admission check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: Option<u64>,
}

impl RateLimitBucket {
    pub fn new(key: impl Into<String>, window_key: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            window_key: window_key.into(),
            request_count: 0,
            token_count: 0,
            expires_at,
        }
    }

    /// Derive the current fixed window's key from a timestamp, truncated
    /// to the minute (spec.md §4.3: "a window key derived from the current
    /// minute").
    pub fn window_key_for(now: DateTime<Utc>) -> String {
        now.format("%Y%m%d%H%M").to_string()
    }

    /// Evaluate and increment admission against `limit` requests per window.
    pub fn admit(&mut self, limit: u64) -> RateLimitDecision {
        let would_be = self.request_count + 1;
        if would_be <= limit {
            self.request_count = would_be;
            RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit - would_be,
                reset_at: self.expires_at,
                retry_after_secs: None,
            }
        } else {
            let retry_after = (self.expires_at - Utc::now()).num_seconds().max(0) as u64;
            RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: self.expires_at,
                retry_after_secs: Some(retry_after),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn admits_under_limit() {
        let mut bucket = RateLimitBucket::new("user-1", "202607271200", Utc::now() + Duration::seconds(60));
        let d = bucket.admit(60);
        assert!(d.allowed);
        assert_eq!(d.remaining, 59);
    }

    #[test]
    fn rejects_over_limit_with_retry_after() {
        let mut bucket = RateLimitBucket::new("user-1", "202607271200", Utc::now() + Duration::seconds(30));
        for _ in 0..60 {
            assert!(bucket.admit(60).allowed);
        }
        let d = bucket.admit(60);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert!(d.retry_after_secs.is_some());
    }

    #[test]
    fn window_key_truncates_to_minute() {
        let t1 = Utc::now();
        let k1 = RateLimitBucket::window_key_for(t1);
        let t2 = t1 + Duration::seconds(30);
        let k2 = RateLimitBucket::window_key_for(t2);
        assert_eq!(k1.len(), 12);
        // same minute unless the 30s addition crossed a minute boundary
        if t1.format("%M").to_string() == t2.format("%M").to_string() {
            assert_eq!(k1, k2);
        }
    }
}
