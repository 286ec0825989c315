//! Logging configuration.
//!
//! Reckon logs through `tracing`. This module provides a small configuration
//! surface plus a subscriber setup for binaries and tests; library code never
//! installs a global subscriber on its own.

use tracing::Level;

/// Logging configuration for Reckon components.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level.
    pub base_level: Level,
    /// Whether to log rendered SQL for every executed query.
    pub log_query_sql: bool,
    /// Whether to log per-row classification detail.
    pub log_classification: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_query_sql: false,
            log_classification: false,
        }
    }
}

impl LogConfig {
    /// Verbose configuration for debugging a planning or alignment problem.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_query_sql: true,
            log_classification: true,
        }
    }

    /// Minimal-overhead configuration for production runs.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_query_sql: false,
            log_classification: false,
        }
    }
}

/// Subscriber setup helpers.
pub mod setup {
    use super::LogConfig;
    use tracing_subscriber::{fmt, EnvFilter};

    /// Installs a global subscriber honouring `RUST_LOG` with the config's
    /// level as the default directive. Returns quietly when a subscriber is
    /// already installed (tests install their own).
    pub fn init_logging(config: &LogConfig) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.base_level.to_string().to_lowercase()));
        let _ = fmt().with_env_filter(filter).try_init();
    }

    /// JSON-formatted variant for structured log pipelines.
    pub fn init_json_logging(config: &LogConfig) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.base_level.to_string().to_lowercase()));
        let _ = fmt().json().with_env_filter(filter).try_init();
    }
}
