//! Agent Gateway - development reverse proxy
//!
//! Forwards `/api/*` to the backend service and `/agent?agentID=<id>` to
//! the agents proxy at `/agents/<id>/ask`.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod proxy;
pub mod server;
