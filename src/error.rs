//! Error types for the Turnstile admission-control library.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// A denied request is not an error here; it is returned as
/// [`Decision::Deny`](crate::ratelimit::Decision::Deny).
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A check referenced a preset name that was never registered
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),

    /// Configuration source errors (file lookup, format detection)
    #[error("Configuration source error: {0}")]
    Source(#[from] ::config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
