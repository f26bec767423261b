//! Reverse proxy functionality
//!
//! Route selection, `agentID` validation, path/query rewriting and the
//! upstream forwarder that relays responses back to clients.

pub mod rewrite;
pub mod router;
pub mod upstream;
pub mod validator;

pub use rewrite::{OutboundRequest, rewrite};
pub use router::{Route, RouteKind, Router};
pub use upstream::{ForwardOutcome, Forwarder};
pub use validator::{AgentId, validate_agent_id};
