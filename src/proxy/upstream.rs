//! Upstream connection and response relaying
//!
//! This module connects to the upstream chosen by the router, sends the
//! rewritten request and relays the response bytes back to the client
//! without interpreting them.

use crate::config::ForwardingConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::http::request::Request;
use crate::proxy::rewrite::OutboundRequest;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Headers that only apply to a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "Upgrade",
];

/// Headers the forwarder sets itself.
const REPLACED: &[&str] = &[
    "Host",
    "X-Forwarded-For",
    "X-Forwarded-Host",
    "X-Forwarded-Port",
    "X-Forwarded-Proto",
];

/// How a relay that reached the upstream ended.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// Upstream closed after sending a response
    Completed { bytes: u64 },
    /// Upstream failed after part of the response was relayed
    Aborted { bytes: u64, error: GatewayError },
    /// Client went away mid-relay
    ClientClosed { bytes: u64 },
}

/// Forwards rewritten requests to upstream origins
#[derive(Debug, Clone)]
pub struct Forwarder {
    /// Connection timeout duration
    connect_timeout: Duration,

    /// Maximum wait between upstream reads
    idle_timeout: Duration,

    /// Add X-Forwarded-* headers
    forward_client_headers: bool,
}

impl Forwarder {
    pub fn new(connect_timeout: Duration, idle_timeout: Duration, forward_client_headers: bool) -> Self {
        Self {
            connect_timeout,
            idle_timeout,
            forward_client_headers,
        }
    }

    pub fn from_config(cfg: &ForwardingConfig) -> Self {
        Self::new(cfg.timeout(), cfg.timeout(), cfg.forward_client_headers)
    }

    /// Send `request` to the upstream described by `outbound` and relay the
    /// response into `downstream`.
    ///
    /// An `Err` means nothing was written to `downstream`, so the caller can
    /// still answer with an error response. Once relaying has started,
    /// failures are reported through [`ForwardOutcome`] instead.
    pub async fn forward<W>(
        &self,
        outbound: &OutboundRequest,
        request: &Request,
        client: Option<SocketAddr>,
        downstream: &mut W,
    ) -> GatewayResult<ForwardOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        let upstream = outbound
            .socket_authority()
            .ok_or_else(|| GatewayError::UpstreamConnect {
                upstream: outbound.target_origin.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "origin missing host"),
            })?;

        let connect = timeout(self.connect_timeout, TcpStream::connect(upstream.as_str())).await;
        let mut stream = match connect {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(GatewayError::UpstreamConnect { upstream, source }),
            Err(_) => return Err(GatewayError::UpstreamTimeout { upstream }),
        };

        tracing::trace!(upstream = %upstream, "Connected to upstream");

        let request_bytes = self.build_http_request(outbound, request, client);
        let send = timeout(self.idle_timeout, async {
            stream.write_all(&request_bytes).await?;
            stream.flush().await
        })
        .await;
        match send {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(GatewayError::UpstreamIo(e)),
            Err(_) => return Err(GatewayError::UpstreamTimeout { upstream }),
        }

        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
        let mut relayed: u64 = 0;

        loop {
            buffer.clear();
            buffer.reserve(BUFFER_SIZE);

            let read = timeout(self.idle_timeout, stream.read_buf(&mut buffer)).await;
            let n = match read {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Self::fail(relayed, GatewayError::UpstreamIo(e)),
                Err(_) => {
                    let error = GatewayError::UpstreamTimeout {
                        upstream: upstream.clone(),
                    };
                    return Self::fail(relayed, error);
                }
            };

            if downstream.write_all(&buffer[..n]).await.is_err() {
                return Ok(ForwardOutcome::ClientClosed { bytes: relayed });
            }
            relayed += n as u64;
        }

        if relayed == 0 {
            return Err(GatewayError::UpstreamIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "upstream closed without a response",
            )));
        }

        if downstream.flush().await.is_err() {
            return Ok(ForwardOutcome::ClientClosed { bytes: relayed });
        }

        Ok(ForwardOutcome::Completed { bytes: relayed })
    }

    fn fail(relayed: u64, error: GatewayError) -> GatewayResult<ForwardOutcome> {
        if relayed == 0 {
            Err(error)
        } else {
            Ok(ForwardOutcome::Aborted {
                bytes: relayed,
                error,
            })
        }
    }

    /// Build the HTTP request bytes sent upstream.
    ///
    /// The request line carries the rewritten target. `Host` is set to the
    /// upstream authority, hop-by-hop headers are dropped, and the client
    /// address is appended to `X-Forwarded-For` when enabled.
    pub fn build_http_request(
        &self,
        outbound: &OutboundRequest,
        request: &Request,
        client: Option<SocketAddr>,
    ) -> Vec<u8> {
        let mut buffer = Vec::new();

        buffer.extend_from_slice(
            format!(
                "{} {} {}\r\n",
                request.method.as_str(),
                outbound.request_target(),
                request.version
            )
            .as_bytes(),
        );

        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter(|(k, _)| !is_listed(HOP_BY_HOP, k) && !is_listed(REPLACED, k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(host) = outbound.host_header() {
            headers.push(("Host".to_string(), host));
        }

        if self.forward_client_headers {
            let client_ip = client.map(|addr| addr.ip().to_string());
            let forwarded_for = match (request.header("X-Forwarded-For"), client_ip) {
                (Some(prior), Some(ip)) => Some(format!("{}, {}", prior, ip)),
                (Some(prior), None) => Some(prior.to_string()),
                (None, ip) => ip,
            };
            if let Some(value) = forwarded_for {
                headers.push(("X-Forwarded-For".to_string(), value));
            }
            if let Some(host) = request.header("Host") {
                headers.push(("X-Forwarded-Host".to_string(), host.to_string()));
            }
            headers.push(("X-Forwarded-Port".to_string(), client_port(request).to_string()));
            headers.push(("X-Forwarded-Proto".to_string(), "http".to_string()));
        } else {
            // Pass through whatever the client already sent.
            for name in &REPLACED[1..] {
                if let Some(value) = request.header(name) {
                    headers.push((name.to_string(), value.to_string()));
                }
            }
        }

        headers.push(("Connection".to_string(), "close".to_string()));

        for (key, value) in &headers {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        buffer.extend_from_slice(b"\r\n");

        if !request.body.is_empty() {
            buffer.extend_from_slice(&request.body);
        }

        buffer
    }
}

/// Port the client addressed, from its `Host` header; 80 when absent.
fn client_port(request: &Request) -> u16 {
    request
        .header("Host")
        .and_then(|host| host.rsplit_once(':'))
        .and_then(|(_, port)| port.parse().ok())
        .unwrap_or(80)
}

fn is_listed(list: &[&str], name: &str) -> bool {
    list.iter().any(|h| h.eq_ignore_ascii_case(name))
}
