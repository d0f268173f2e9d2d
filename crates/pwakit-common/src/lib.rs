//! # PwaKit Common
//!
//! Common utilities, error types, and configuration for the PwaKit offline engine.
//!
//! ## Features
//!
//! - Error type for configuration loading
//! - Logging configuration and setup
//! - Worker configuration (cache version, manifest, mutation endpoint)
//! - Wall-clock helpers

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::WorkerConfig;
pub use logging::{init_logging, LogConfig, LogFormat};

/// Errors raised while loading or validating shared configuration.
#[derive(Error, Debug)]
pub enum CommonError {
    /// Configuration is present but invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CommonError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for common operations.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Milliseconds since the Unix epoch.
///
/// A clock set before 1970 reads as zero rather than failing.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_advances() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn test_config_error_display() {
        let err = CommonError::config("empty cache name");
        assert_eq!(err.to_string(), "Config error: empty cache name");
    }
}
