use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::gateway::Gateway;
use crate::http::parser::{ParseError, find_headers_end, parse_http_request};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::rewrite::OutboundRequest;
use crate::proxy::upstream::ForwardOutcome;

/// Upper bound on the request line plus headers. Bodies are not capped.
const MAX_HEADER_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 8192;

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    gateway: Arc<Gateway>,
    buffer: Vec<u8>,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Proxying(Request, OutboundRequest),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

enum ReadOutcome {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, gateway: Arc<Gateway>) -> Self {
        Self {
            stream,
            peer,
            gateway,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    ReadOutcome::Request(req) => ConnectionState::Processing(req),
                    ReadOutcome::Malformed(e) => {
                        tracing::warn!(peer = %self.peer, error = ?e, "Malformed request");
                        let response = Response::bad_request("Malformed request");
                        ConnectionState::Writing(ResponseWriter::new(&response), false)
                    }
                    ReadOutcome::Eof => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => match self.gateway.plan(&req) {
                    Ok((route, outbound)) => {
                        tracing::debug!(
                            route = route.kind.name(),
                            method = req.method.as_str(),
                            path = %req.path_only(),
                            target = %outbound.path_and_query(),
                            "Request routed"
                        );
                        ConnectionState::Proxying(req, outbound)
                    }
                    Err(e) => {
                        tracing::warn!(
                            peer = %self.peer,
                            method = req.method.as_str(),
                            path = %req.path_only(),
                            status = e.status().as_u16(),
                            error = %e,
                            "Request rejected"
                        );
                        let writer = ResponseWriter::new(&e.to_response());
                        ConnectionState::Writing(writer, req.keep_alive())
                    }
                },

                ConnectionState::Proxying(req, outbound) => self.proxy(&req, &outbound).await,

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    /// Relay one request upstream. The client connection closes afterwards
    /// because the upstream response is delimited by the upstream closing.
    async fn proxy(&mut self, req: &Request, outbound: &OutboundRequest) -> ConnectionState {
        let forwarder = self.gateway.forwarder();
        let target = outbound.target_origin.as_str();

        match forwarder
            .forward(outbound, req, Some(self.peer), &mut self.stream)
            .await
        {
            Ok(ForwardOutcome::Completed { bytes }) => {
                tracing::info!(
                    upstream = target,
                    method = req.method.as_str(),
                    path = %outbound.path_and_query(),
                    bytes,
                    "Request forwarded successfully"
                );
                ConnectionState::Closed
            }
            Ok(ForwardOutcome::Aborted { bytes, error }) => {
                tracing::warn!(
                    upstream = target,
                    path = %outbound.path_and_query(),
                    bytes,
                    error = %error,
                    "Upstream failed mid-response"
                );
                ConnectionState::Closed
            }
            Ok(ForwardOutcome::ClientClosed { bytes }) => {
                tracing::debug!(peer = %self.peer, bytes, "Client closed during relay");
                ConnectionState::Closed
            }
            Err(e) => {
                tracing::error!(
                    upstream = target,
                    path = %outbound.path_and_query(),
                    status = e.status().as_u16(),
                    error = %e,
                    "Failed to proxy request"
                );
                ConnectionState::Writing(ResponseWriter::new(&e.to_response()), false)
            }
        }
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    if self.buffer.len() > MAX_HEADER_BYTES
                        && find_headers_end(&self.buffer).is_none()
                    {
                        return Ok(ReadOutcome::Malformed(ParseError::InvalidRequest));
                    }
                }

                Err(e) => return Ok(ReadOutcome::Malformed(e)),
            }

            let mut temp = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(ReadOutcome::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}
