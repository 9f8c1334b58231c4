use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category driving the sync loop's retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    /// Unrecoverable; terminates the loop.
    Config,
    /// Authentication failure (expired or invalid access token).
    /// Unrecoverable; terminates the loop.
    Auth,
    /// Transient network or transport failure. Retried with backoff.
    Network,
    /// Rate-limited by the homeserver. Retried honoring the server hint.
    RateLimited,
    /// Response body could not be parsed. Retried with backoff; the
    /// cursor does not advance.
    Malformed,
    /// Internal invariant break.
    Internal,
}

/// Stable error payload produced by the sync transport and loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncError {
    /// High-level error category.
    pub category: SyncErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds, from `retry_after_ms`.
    pub retry_after_ms: Option<u64>,
}

impl SyncError {
    /// Construct a new sync error.
    pub fn new(
        category: SyncErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Whether the sync loop may absorb this error and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            SyncErrorCategory::Network | SyncErrorCategory::RateLimited | SyncErrorCategory::Malformed
        )
    }
}

/// Map an HTTP status code to a sync error category.
pub fn classify_http_status(status: u16) -> SyncErrorCategory {
    match status {
        401 | 403 => SyncErrorCategory::Auth,
        429 => SyncErrorCategory::RateLimited,
        408 => SyncErrorCategory::Network,
        // A redirect reaching us means a misbehaving intermediary, not a
        // protocol error worth dying over.
        300..=399 => SyncErrorCategory::Network,
        400..=499 => SyncErrorCategory::Config,
        500..=599 => SyncErrorCategory::Network,
        _ => SyncErrorCategory::Internal,
    }
}

/// Map a machine-readable Matrix `errcode` to a category, when it carries
/// more signal than the bare HTTP status.
pub fn classify_errcode(errcode: &str) -> Option<SyncErrorCategory> {
    match errcode {
        "M_LIMIT_EXCEEDED" => Some(SyncErrorCategory::RateLimited),
        "M_UNKNOWN_TOKEN" | "M_MISSING_TOKEN" | "M_UNAUTHORIZED" => Some(SyncErrorCategory::Auth),
        "M_NOT_JSON" | "M_BAD_JSON" => Some(SyncErrorCategory::Malformed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), SyncErrorCategory::Auth);
        assert_eq!(classify_http_status(429), SyncErrorCategory::RateLimited);
        assert_eq!(classify_http_status(408), SyncErrorCategory::Network);
        assert_eq!(classify_http_status(404), SyncErrorCategory::Config);
        assert_eq!(classify_http_status(503), SyncErrorCategory::Network);
        assert_eq!(classify_http_status(700), SyncErrorCategory::Internal);
    }

    #[test]
    fn stray_redirects_are_transient_not_fatal() {
        assert_eq!(classify_http_status(302), SyncErrorCategory::Network);

        let err = SyncError::new(classify_http_status(307), "http_307", "redirected");
        assert!(err.is_retryable());
    }

    #[test]
    fn errcode_overrides_carry_more_signal_than_status() {
        assert_eq!(
            classify_errcode("M_LIMIT_EXCEEDED"),
            Some(SyncErrorCategory::RateLimited)
        );
        assert_eq!(
            classify_errcode("M_UNKNOWN_TOKEN"),
            Some(SyncErrorCategory::Auth)
        );
        assert_eq!(classify_errcode("M_FORBIDDEN"), None);
    }

    #[test]
    fn retryable_categories_are_limited_to_transient_conditions() {
        let network = SyncError::new(SyncErrorCategory::Network, "n", "network");
        let rate = SyncError::new(SyncErrorCategory::RateLimited, "r", "rate");
        let malformed = SyncError::new(SyncErrorCategory::Malformed, "m", "bad body");
        let auth = SyncError::new(SyncErrorCategory::Auth, "a", "auth");
        let config = SyncError::new(SyncErrorCategory::Config, "c", "config");

        assert!(network.is_retryable());
        assert!(rate.is_retryable());
        assert!(malformed.is_retryable());
        assert!(!auth.is_retryable());
        assert!(!config.is_retryable());
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = SyncError::new(SyncErrorCategory::RateLimited, "rate_limited", "wait")
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(err.retry_after_ms, Some(3000));
    }
}
