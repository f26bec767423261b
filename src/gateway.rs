//! Request policy layer shared by every connection.

use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::http::request::Request;
use crate::proxy::rewrite::{OutboundRequest, rewrite};
use crate::proxy::router::{Route, Router};
use crate::proxy::upstream::Forwarder;

/// Routing table plus forwarder, built once from [`Config`].
#[derive(Debug, Clone)]
pub struct Gateway {
    router: Router,
    forwarder: Forwarder,
}

impl Gateway {
    pub fn new(router: Router, forwarder: Forwarder) -> Self {
        Self { router, forwarder }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            Router::from_config(cfg),
            Forwarder::from_config(&cfg.forwarding),
        )
    }

    /// Select a route and compute the outbound request.
    ///
    /// Does no I/O; errors here are answered locally without contacting
    /// any upstream.
    pub fn plan(&self, request: &Request) -> GatewayResult<(&Route, OutboundRequest)> {
        let path = request.path_only();
        let route = self
            .router
            .select(path)
            .ok_or_else(|| GatewayError::NoRoute {
                path: path.to_string(),
            })?;

        let outbound = rewrite(route, request)?;
        Ok((route, outbound))
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }
}
