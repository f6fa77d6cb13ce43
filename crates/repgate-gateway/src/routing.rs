//! Route matching
//!
//! Routes are matched in registration order on path prefix and method; the
//! first match wins.

use crate::tier::Tier;
use serde::{Deserialize, Serialize};

/// Methods a route accepts when none are given
pub const DEFAULT_METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

/// Registered backend route
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub path_prefix: String,
    pub target: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub tier_override: Option<Tier>,
}

fn default_methods() -> Vec<String> {
    DEFAULT_METHODS.iter().map(|m| m.to_string()).collect()
}

impl Route {
    pub fn new(path_prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            target: target.into(),
            methods: default_methods(),
            tier_override: None,
        }
    }

    /// Restrict the accepted methods; an empty list keeps the defaults
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let methods: Vec<String> = methods
            .into_iter()
            .map(|m| m.as_ref().to_ascii_uppercase())
            .collect();
        if !methods.is_empty() {
            self.methods = methods;
        }
        self
    }

    pub fn with_tier_override(mut self, tier: Tier) -> Self {
        self.tier_override = Some(tier);
        self
    }

    pub fn allows(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    pub fn matches(&self, path: &str, method: &str) -> bool {
        path.starts_with(&self.path_prefix) && self.allows(method)
    }
}

/// Ordered route table
#[derive(Default)]
pub struct Router {
    routes: parking_lot::RwLock<Vec<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let router = Self::new();
        for route in routes {
            router.add(route);
        }
        router
    }

    /// Register a route from its parts; empty `methods` means the defaults
    pub fn add_route(&self, path_prefix: &str, target: &str, methods: &[&str], tier_override: Option<Tier>) {
        let mut route = Route::new(path_prefix, target).with_methods(methods);
        route.tier_override = tier_override;
        self.add(route);
    }

    /// Append a route; duplicates are kept as separate entries
    pub fn add(&self, route: Route) {
        tracing::debug!(prefix = %route.path_prefix, target = %route.target, methods = ?route.methods, "registered route");
        self.routes.write().push(route);
    }

    /// First route whose prefix and method match
    pub fn match_route(&self, path: &str, method: &str) -> Option<Route> {
        self.routes
            .read()
            .iter()
            .find(|route| route.matches(path, method))
            .cloned()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

/// Routes served when the configuration names none
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new("/api/v1/entities", "entity-service"),
        Route::new("/api/v1/mentions", "mention-service").with_methods(["GET", "POST"]),
        Route::new("/api/v1/analytics", "analytics-service")
            .with_methods(["GET"])
            .with_tier_override(Tier::Professional),
    ]
}
