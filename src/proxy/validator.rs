//! `agentID` validation for the agent route.

use std::fmt;

use crate::error::{GatewayError, GatewayResult};
use crate::http::query::QueryParams;

/// Query parameter carrying the target agent.
pub const AGENT_ID_PARAM: &str = "agentID";

/// An identifier made only of `[A-Za-z0-9_-]`, at least one character long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentId(String);

impl AgentId {
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let valid = !raw.is_empty()
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(GatewayError::InvalidIdentifier)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract and validate `agentID` from decoded query parameters.
///
/// A repeated `agentID` is ambiguous and rejected like a malformed one.
pub fn validate_agent_id(query: &QueryParams) -> GatewayResult<AgentId> {
    let mut values = query.get_all(AGENT_ID_PARAM);

    match (values.next(), values.next()) {
        (Some(value), None) => AgentId::parse(value),
        _ => Err(GatewayError::InvalidIdentifier),
    }
}
