//! repgate gateway - request admission for the API
//!
//! Every request passes a fixed pipeline:
//!
//! ```text
//!  request ──► credential ──► tier ──► admission ──► route ──► target
//!                 │                        │            │
//!                401                      429          404
//! ```
//!
//! The response cache is not consulted here; handlers reach it through
//! [`Gateway::cache`] once a request has been admitted.

use repgate_cache::{CacheOrchestrator, CacheStatsSnapshot};
use repgate_common::{ConfigResult, SharedClock};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub mod auth;
pub mod config;
pub mod driver;
pub mod ratelimit;
pub mod routing;
pub mod tier;

pub use auth::{CredentialRecord, CredentialRegistry};
pub use config::{AdmissionConfig, AuthConfig, GatewayConfig};
pub use ratelimit::{AdmissionController, AdmissionDecision, AdmissionStatsSnapshot, RejectReason};
pub use routing::{Route, Router};
pub use tier::{AdmissionStrategy, Tier, TierConfig, TierTable};

/// Request as seen by the gateway
#[derive(Clone, Debug, Default)]
pub struct GatewayRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl GatewayRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// API key from the key header, or a bearer token if allowed
    pub fn credential(&self, auth: &AuthConfig) -> Option<&str> {
        if let Some(key) = self.header(&auth.api_key_header) {
            let key = key.trim();
            if !key.is_empty() {
                return Some(key);
            }
        }
        if !auth.accept_bearer {
            return None;
        }
        self.header("Authorization")
            .and_then(|value| value.trim().strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

/// Admitted request
#[derive(Clone, Debug, Serialize)]
pub struct GatewayResponse {
    /// Backend the request is forwarded to
    pub target: String,
    pub route: Route,
    pub owner_id: String,
    pub tier: Tier,
    /// Tier the route asks for, if any
    pub required_tier: Option<Tier>,
    pub admission: AdmissionDecision,
    pub admission_stats: AdmissionStatsSnapshot,
    pub cache_stats: Option<CacheStatsSnapshot>,
    pub headers: Vec<(String, String)>,
}

/// Why a request was not admitted
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid or missing API key")]
    InvalidCredential,

    #[error("rate limit exceeded")]
    AdmissionRejected(Box<AdmissionDecision>),

    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },
}

impl GatewayError {
    /// HTTP status the transport should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidCredential => 401,
            Self::AdmissionRejected(_) => 429,
            Self::RouteNotFound { .. } => 404,
        }
    }

    /// Response headers for the rejection
    pub fn headers(&self) -> Vec<(String, String)> {
        match self {
            Self::InvalidCredential => vec![("WWW-Authenticate".to_string(), "Bearer".to_string())],
            Self::AdmissionRejected(decision) => {
                let mut headers = decision.headers();
                headers.push(("X-User-Tier".to_string(), decision.tier.to_string()));
                headers
            }
            Self::RouteNotFound { .. } => Vec::new(),
        }
    }

    /// Seconds the caller should wait, for rejections
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::AdmissionRejected(decision) => decision.retry_after_secs,
            _ => None,
        }
    }
}

/// Request pipeline over shared components
#[derive(Clone)]
pub struct Gateway {
    credentials: Arc<CredentialRegistry>,
    admission: Arc<AdmissionController>,
    router: Arc<Router>,
    cache: Option<Arc<CacheOrchestrator>>,
    auth: AuthConfig,
}

impl Gateway {
    pub fn new(
        credentials: Arc<CredentialRegistry>,
        admission: Arc<AdmissionController>,
        router: Arc<Router>,
        auth: AuthConfig,
    ) -> Self {
        Self {
            credentials,
            admission,
            router,
            cache: None,
            auth,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheOrchestrator>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validate `config` and build every component from it
    pub async fn from_config(config: &GatewayConfig, clock: SharedClock) -> ConfigResult<Self> {
        config.validate()?;

        let admission = Arc::new(AdmissionController::new(config.tiers.clone(), clock.clone()));
        let router = Arc::new(Router::from_routes(config.routes.iter().cloned()));
        let mut gateway = Self::new(
            Arc::new(CredentialRegistry::new(clock.clone())),
            admission,
            router,
            config.auth.clone(),
        );

        if let Some(cache_config) = &config.cache {
            let cache = CacheOrchestrator::from_config(cache_config, clock).await;
            gateway = gateway.with_cache(Arc::new(cache));
        }

        tracing::info!(
            routes = gateway.router.len(),
            cache = gateway.cache.is_some(),
            "gateway ready"
        );
        Ok(gateway)
    }

    /// Run a request through authentication, admission and routing
    pub fn process(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let token = request
            .credential(&self.auth)
            .ok_or(GatewayError::InvalidCredential)?;

        let record = self.credentials.validate(token).ok_or_else(|| {
            tracing::debug!(path = %request.path, "rejected unknown or revoked key");
            GatewayError::InvalidCredential
        })?;

        let decision = self.admission.check(&record.caller_id(), record.tier);
        if !decision.allowed {
            return Err(GatewayError::AdmissionRejected(Box::new(decision)));
        }

        let route = self
            .router
            .match_route(&request.path, &request.method)
            .ok_or_else(|| GatewayError::RouteNotFound {
                method: request.method.clone(),
                path: request.path.clone(),
            })?;

        let mut headers = decision.headers();
        headers.push(("X-User-Tier".to_string(), record.tier.to_string()));

        tracing::debug!(
            owner = %record.owner_id,
            tier = %record.tier,
            target = %route.target,
            "request admitted"
        );

        Ok(GatewayResponse {
            target: route.target.clone(),
            required_tier: route.tier_override,
            route,
            owner_id: record.owner_id,
            tier: record.tier,
            admission: decision,
            admission_stats: self.admission.stats(),
            cache_stats: self.cache.as_ref().map(|c| c.stats()),
            headers,
        })
    }

    pub fn credentials(&self) -> &Arc<CredentialRegistry> {
        &self.credentials
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn cache(&self) -> Option<&Arc<CacheOrchestrator>> {
        self.cache.as_ref()
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repgate_common::ManualClock;

    fn gateway() -> Gateway {
        let clock = ManualClock::at(10_000.0);
        let tiers = TierTable::default().with(Tier::Free, TierConfig::new(100, 2, 2, AdmissionStrategy::SlidingWindow));
        Gateway::new(
            Arc::new(CredentialRegistry::new(clock.clone())),
            Arc::new(AdmissionController::new(tiers, clock)),
            Arc::new(Router::from_routes(routing::default_routes())),
            AuthConfig::default(),
        )
    }

    #[test]
    fn test_credential_extraction() {
        let auth = AuthConfig::default();

        let req = GatewayRequest::new("GET", "/").with_header("x-api-key", "sk_live_a");
        assert_eq!(req.credential(&auth), Some("sk_live_a"));

        let req = GatewayRequest::new("GET", "/").with_header("authorization", "Bearer sk_live_b");
        assert_eq!(req.credential(&auth), Some("sk_live_b"));

        let req = GatewayRequest::new("GET", "/").with_header("Authorization", "Basic abc");
        assert_eq!(req.credential(&auth), None);

        let no_bearer = AuthConfig {
            accept_bearer: false,
            ..Default::default()
        };
        let req = GatewayRequest::new("GET", "/").with_header("Authorization", "Bearer sk_live_b");
        assert_eq!(req.credential(&no_bearer), None);
    }

    #[test]
    fn test_process_outcomes() {
        let gw = gateway();
        let token = gw.credentials().issue("5", Tier::Free, None);

        let missing = gw.process(&GatewayRequest::new("GET", "/api/v1/entities")).unwrap_err();
        assert_eq!(missing.status_code(), 401);

        let unknown = GatewayRequest::new("GET", "/api/v1/entities").with_header("X-API-Key", "sk_test_nope");
        assert!(matches!(gw.process(&unknown), Err(GatewayError::InvalidCredential)));

        let ok = gw
            .process(&GatewayRequest::new("GET", "/api/v1/entities/1").with_header("X-API-Key", &token))
            .unwrap();
        assert_eq!(ok.target, "entity-service");
        assert_eq!(ok.owner_id, "5");
        assert!(ok.headers.contains(&("X-User-Tier".to_string(), "free".to_string())));
        assert!(ok.cache_stats.is_none());

        // admission runs before routing, so this counts against the budget
        let not_found = gw
            .process(&GatewayRequest::new("GET", "/nowhere").with_header("X-API-Key", &token))
            .unwrap_err();
        assert_eq!(not_found.status_code(), 404);

        let limited = gw
            .process(&GatewayRequest::new("GET", "/api/v1/entities").with_header("X-API-Key", &token))
            .unwrap_err();
        assert_eq!(limited.status_code(), 429);
        assert!(limited.retry_after().is_some());
        assert!(limited.headers().iter().any(|(k, _)| k == "Retry-After"));
    }

    #[test]
    fn test_from_config_without_cache() {
        let config = GatewayConfig {
            cache: None,
            ..Default::default()
        };
        let gw = tokio_test::block_on(Gateway::from_config(&config, ManualClock::at(0.0))).unwrap();
        assert!(gw.cache().is_none());
        assert_eq!(gw.router().len(), 3);
        assert_eq!(gw.auth().api_key_header, "X-API-Key");
    }

    #[test]
    fn test_route_tier_override_reported() {
        let gw = gateway();
        let token = gw.credentials().issue("6", Tier::Enterprise, None);
        let resp = gw
            .process(&GatewayRequest::new("GET", "/api/v1/analytics").with_header("X-API-Key", &token))
            .unwrap();
        assert_eq!(resp.required_tier, Some(Tier::Professional));
        assert_eq!(resp.tier, Tier::Enterprise);
    }
}
