//! Prefix routing for inbound requests
//!
//! Picks the configured route whose prefix matches the request path.
//! Prefixes match on segment boundaries, and the longest one wins.

use crate::config::Config;
use url::Url;

/// The rewrite rule a route applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Strip the prefix, keep the query as sent
    Api,
    /// Validate `agentID` and rewrite to `/agents/<id>/ask`
    Agent,
}

impl RouteKind {
    pub fn name(&self) -> &'static str {
        match self {
            RouteKind::Api => "api",
            RouteKind::Agent => "agent",
        }
    }
}

/// A configured prefix bound to an upstream origin.
#[derive(Debug, Clone)]
pub struct Route {
    pub kind: RouteKind,
    pub prefix: String,
    pub upstream: Url,
}

impl Route {
    pub fn new(kind: RouteKind, prefix: impl Into<String>, upstream: Url) -> Self {
        Self {
            kind,
            prefix: prefix.into(),
            upstream,
        }
    }

    /// Whether `path` (query excluded) falls under this route's prefix.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.ends_with('/'),
            None => false,
        }
    }
}

/// Immutable route table built at start-up.
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(vec![
            Route::new(
                RouteKind::Api,
                cfg.routes.api_prefix.clone(),
                cfg.upstreams.backend_host.clone(),
            ),
            Route::new(
                RouteKind::Agent,
                cfg.routes.agent_prefix.clone(),
                cfg.upstreams.agents_proxy.clone(),
            ),
        ])
    }

    /// Finds the route for a request path.
    ///
    /// Returns `None` if no prefix matches.
    pub fn select(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| route.matches(path))
            .max_by_key(|route| route.prefix.len())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
