use std::collections::HashMap;

/// HTTP status codes the gateway produces itself.
///
/// Upstream responses are relayed as raw bytes and never pass through this
/// type, so only locally generated statuses are listed:
/// - `BadRequest` (400): Malformed request or invalid `agentID`
/// - `NotFound` (404): No route matches the path
/// - `BadGateway` (502): Upstream unreachable or broken
/// - `GatewayTimeout` (504): Upstream did not answer in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 502 Bad Gateway
    BadGateway,
    /// 504 Gateway Timeout
    GatewayTimeout,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use agent_gateway::http::response::StatusCode;
    /// assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::BadGateway => 502,
            StatusCode::GatewayTimeout => 504,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::GatewayTimeout => "Gateway Timeout",
        }
    }
}

/// A locally generated HTTP response.
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// HTTP headers as key-value pairs
    pub headers: HashMap<String, String>,
    /// Response body as bytes
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::BadRequest)
///     .header("Content-Type", "text/plain")
///     .body(b"Missing or invalid agentID".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Builds the final Response.
    ///
    /// Adds Content-Length from the body size unless already present.
    pub fn build(mut self) -> Response {
        self.headers
            .entry("Content-Length".to_string())
            .or_insert_with(|| self.body.len().to_string());

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Creates a 400 Bad Request response with a plain-text message.
    pub fn bad_request(message: &str) -> Self {
        ResponseBuilder::new(StatusCode::BadRequest)
            .header("Content-Type", "text/plain")
            .body(message.as_bytes().to_vec())
            .build()
    }
}
