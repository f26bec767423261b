//! Error types for request handling.

use crate::http::response::{Response, ResponseBuilder, StatusCode};
use thiserror::Error;

/// Errors that terminate a single inbound request.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// `agentID` missing, empty, repeated or outside `[A-Za-z0-9_-]`
    #[error("Missing or invalid agentID")]
    InvalidIdentifier,

    /// No configured route prefix matches the path
    #[error("No route for {path}")]
    NoRoute { path: String },

    /// Upstream could not be reached
    #[error("Failed to connect to upstream {upstream}: {source}")]
    UpstreamConnect {
        upstream: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect or idle timeout elapsed
    #[error("Upstream {upstream} timed out")]
    UpstreamTimeout { upstream: String },

    /// I/O failure while talking to the upstream
    #[error("Upstream I/O error: {0}")]
    UpstreamIo(#[from] std::io::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidIdentifier => StatusCode::BadRequest,
            GatewayError::NoRoute { .. } => StatusCode::NotFound,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GatewayTimeout,
            GatewayError::UpstreamConnect { .. } | GatewayError::UpstreamIo(_) => {
                StatusCode::BadGateway
            }
        }
    }

    /// Plain-text response sent to the client for this error.
    pub fn to_response(&self) -> Response {
        let body = match self {
            GatewayError::InvalidIdentifier => self.to_string(),
            other => format!(
                "{} {}",
                other.status().as_u16(),
                other.status().reason_phrase()
            ),
        };

        ResponseBuilder::new(self.status())
            .header("Content-Type", "text/plain")
            .body(body.into_bytes())
            .build()
    }
}

/// Result type alias for request handling.
pub type GatewayResult<T> = Result<T, GatewayError>;
