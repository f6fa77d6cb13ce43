//! Gateway configuration
//!
//! Loaded from a JSON file. Every section has defaults, so a partial file (or
//! none at all) yields a working gateway.

use crate::routing::{default_routes, Route};
use crate::tier::TierTable;
use repgate_cache::CacheConfig;
use repgate_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Env var naming the config file
pub const CONFIG_ENV: &str = "REPGATE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/repgate/gateway.json";

/// Full gateway configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub tiers: TierTable,
    /// Response cache; `null` disables it
    pub cache: Option<CacheConfig>,
    pub routes: Vec<Route>,
    pub auth: AuthConfig,
    pub admission: AdmissionConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            cache: Some(CacheConfig::default()),
            routes: default_routes(),
            auth: AuthConfig::default(),
            admission: AdmissionConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header carrying the API key
    pub api_key_header: String,
    /// Also accept `Authorization: Bearer <key>`
    pub accept_bearer: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_header: "X-API-Key".to_string(),
            accept_bearer: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// How often idle caller state is purged
    pub reaper_interval_secs: u64,
    /// Minimum idle time before a caller's state may be purged
    pub max_idle_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            reaper_interval_secs: 60,
            max_idle_secs: 3600,
        }
    }
}

impl AdmissionConfig {
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

impl GatewayConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from `REPGATE_CONFIG` (or the default path), falling back to
    /// defaults when the file is missing or unreadable
    pub fn from_env() -> Self {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        match Self::load(&path) {
            Ok(config) => {
                tracing::info!(path = %path, "loaded gateway config");
                config
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "config not loaded, using defaults");
                Self::default()
            }
        }
    }

    /// Reject configurations the gateway cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        self.tiers.validate()?;

        if let Some(cache) = &self.cache {
            cache.validate()?;
        }

        for route in &self.routes {
            let invalid = |reason: &str| ConfigError::InvalidRoute {
                prefix: route.path_prefix.clone(),
                reason: reason.to_string(),
            };
            if !route.path_prefix.starts_with('/') {
                return Err(invalid("path prefix must start with '/'"));
            }
            if route.target.trim().is_empty() {
                return Err(invalid("target is empty"));
            }
            if route.methods.is_empty() {
                return Err(invalid("no methods allowed"));
            }
        }

        if self.auth.api_key_header.trim().is_empty() {
            return Err(ConfigError::Parse("auth.api_key_header is empty".into()));
        }
        if self.admission.reaper_interval_secs == 0 {
            return Err(ConfigError::Parse("admission.reaper_interval_secs must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::{AdmissionStrategy, Tier, TierConfig};
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.routes.len(), 3);
        assert_eq!(config.auth.api_key_header, "X-API-Key");
        assert!(config.cache.is_some());
    }

    #[test]
    fn test_partial_json() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "cache": null,
                "routes": [{"path_prefix": "/v2", "target": "svc", "methods": ["get"]}],
                "auth": {"accept_bearer": false}
            }"#,
        )
        .unwrap();

        assert!(config.cache.is_none());
        assert_eq!(config.routes.len(), 1);
        assert!(!config.auth.accept_bearer);
        assert_eq!(config.auth.api_key_header, "X-API-Key");
        assert_eq!(config.tiers, TierTable::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_burst_rejected() {
        let config = GatewayConfig {
            tiers: TierTable::default().with(
                Tier::Enterprise,
                TierConfig::new(100_000, 5_000, 10, AdmissionStrategy::TokenBucket),
            ),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTier { .. })));
    }

    #[test]
    fn test_invalid_route_rejected() {
        let config = GatewayConfig {
            routes: vec![Route::new("api/v1", "svc")],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRoute { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("repgate-config-{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"admission": {{"reaper_interval_secs": 5}}}}"#).unwrap();

        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.admission.reaper_interval(), Duration::from_secs(5));
        assert_eq!(config.admission.max_idle_secs, 3600);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(GatewayConfig::load(&path), Err(ConfigError::Parse(_))));

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(GatewayConfig::load(&path), Err(ConfigError::IoError(_))));
    }
}
