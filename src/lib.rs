//! Turnstile - In-process admission control
//!
//! This crate decides, for every inbound request, whether it may proceed or
//! must be rejected because its caller key has spent its budget for the
//! current fixed window. Request handlers call it inline before doing work;
//! turning a denial into a 429 response is left to the HTTP layer.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{Result, TurnstileError};
pub use ratelimit::{AdmissionControl, Decision, LimiterConfig, RateLimitExceeded, RateLimiter};
