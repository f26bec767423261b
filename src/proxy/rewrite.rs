//! Outbound path/query computation
//!
//! Each route kind maps an inbound request to the exact request target the
//! upstream receives. Rewriting is a pure function of the route and the
//! inbound path and query.

use url::Url;

use crate::error::GatewayResult;
use crate::http::request::Request;
use crate::proxy::router::{Route, RouteKind};
use crate::proxy::validator::{AGENT_ID_PARAM, validate_agent_id};

/// Where and how a single inbound request is forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub target_origin: Url,
    pub target_path: String,
    /// Encoded query without the leading `?`; empty means none.
    pub query: String,
}

impl OutboundRequest {
    /// Path plus query, with no `?` when the query is empty.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.target_path.clone()
        } else {
            format!("{}?{}", self.target_path, self.query)
        }
    }

    /// Request target for the upstream request line.
    ///
    /// A path on the origin (e.g. `http://svc/base`) is prepended.
    pub fn request_target(&self) -> String {
        let base = self.target_origin.path().trim_end_matches('/');
        format!("{}{}", base, self.path_and_query())
    }

    /// `host:port` to connect to.
    pub fn socket_authority(&self) -> Option<String> {
        let host = self.target_origin.host_str()?;
        let port = self.target_origin.port_or_known_default()?;
        Some(format!("{}:{}", host, port))
    }

    /// Value for the upstream `Host` header; default ports are omitted.
    pub fn host_header(&self) -> Option<String> {
        let host = self.target_origin.host_str()?;
        Some(match self.target_origin.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }
}

/// Compute the outbound request for `request` on `route`.
///
/// Fails with `InvalidIdentifier` on the agent route when `agentID` is
/// missing or malformed.
pub fn rewrite(route: &Route, request: &Request) -> GatewayResult<OutboundRequest> {
    match route.kind {
        RouteKind::Api => Ok(rewrite_api(route, request)),
        RouteKind::Agent => rewrite_agent(route, request),
    }
}

fn rewrite_api(route: &Route, request: &Request) -> OutboundRequest {
    let stripped = request
        .path_only()
        .strip_prefix(route.prefix.as_str())
        .unwrap_or(request.path_only());

    let target_path = if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{}", stripped)
    };

    OutboundRequest {
        target_origin: route.upstream.clone(),
        target_path,
        query: request.raw_query().to_string(),
    }
}

fn rewrite_agent(route: &Route, request: &Request) -> GatewayResult<OutboundRequest> {
    let query = request.query();
    let id = validate_agent_id(&query)?;

    Ok(OutboundRequest {
        target_origin: route.upstream.clone(),
        target_path: format!("/agents/{}/ask", id),
        query: query.without(AGENT_ID_PARAM).to_query_string(),
    })
}
