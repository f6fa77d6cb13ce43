//! Error types shared across repgate crates

use thiserror::Error;

/// Configuration error raised at process start
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A tier's limits are inconsistent
    #[error("invalid tier {tier}: {reason}")]
    InvalidTier {
        /// Tier name
        tier: String,
        /// What is wrong with it
        reason: String,
    },

    /// Cache sizing or TTL settings are unusable
    #[error("invalid cache config: {0}")]
    InvalidCache(String),

    /// A route entry is malformed
    #[error("invalid route {prefix}: {reason}")]
    InvalidRoute {
        /// Route path prefix
        prefix: String,
        /// What is wrong with it
        reason: String,
    },

    /// Config file could not be read
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;
