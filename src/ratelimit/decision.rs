//! Admission decisions and the typed rejection handed to the HTTP layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Admit,
    /// The caller's budget for the current window is spent.
    Deny(RateLimitExceeded),
}

impl Decision {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    /// Retry hint in seconds, present only on deny.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Decision::Admit => None,
            Decision::Deny(exceeded) => Some(exceeded.retry_after_secs),
        }
    }

    /// Convert into a `Result` so handlers can bail out with `?`.
    pub fn into_result(self) -> Result<(), RateLimitExceeded> {
        match self {
            Decision::Admit => Ok(()),
            Decision::Deny(exceeded) => Err(exceeded),
        }
    }
}

/// A denied request: the budget is spent until the window rolls over.
///
/// Carries only the caller's own retry timing and the policy's public limits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rate limit of {limit} requests exceeded, retry after {retry_after_secs}s")]
pub struct RateLimitExceeded {
    /// Seconds until the current window ends, rounded up.
    pub retry_after_secs: u64,
    /// Requests permitted per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimitExceeded {
    /// HTTP status code for a rate-limited response.
    pub const STATUS_CODE: u16 = 429;

    /// Response headers advertising the backoff hint.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("Retry-After", self.retry_after_secs.to_string()),
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Window", self.window_secs().to_string()),
        ]
    }

    /// Window length in whole seconds, rounded up so short windows never
    /// advertise as zero.
    pub fn window_secs(&self) -> u64 {
        u64::try_from(self.window.as_millis())
            .unwrap_or(u64::MAX)
            .div_ceil(1000)
    }

    /// Response body for the HTTP layer to serialize.
    pub fn body(&self) -> RejectionBody {
        RejectionBody {
            error: "Too many requests".to_string(),
            message: format!(
                "Rate limit exceeded. Try again in {} seconds.",
                self.retry_after_secs
            ),
            retry_after: self.retry_after_secs,
            limit: self.limit,
            window_ms: u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Machine-readable rejection payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
    pub limit: u32,
    pub window_ms: u64,
}
