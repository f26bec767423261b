//! HTTP/1.1 plumbing for the gateway.
//!
//! - **`connection`**: per-client state machine driving routing and relaying
//! - **`parser`**: parses incoming HTTP requests from byte buffers
//! - **`query`**: ordered, form-urlencoded query parameters
//! - **`request`**: HTTP request representation
//! - **`response`**: locally generated responses (errors only)
//! - **`writer`**: serializes and writes responses to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Route, validate, rewrite
//!        └──────┬───────────┘
//!               ├─ Rejected (400/404) → Writing
//!               ▼
//!        ┌──────────────────┐
//!        │    Proxying      │ ← Relay upstream response verbatim
//!        └──────┬───────────┘
//!               ├─ Upstream failed before any byte → Writing (502/504)
//!               └─ Done → Closed
//!
//!        Writing ─┬─ Keep-Alive → Reading
//!                 └─ Close → Closed
//! ```

pub mod connection;
pub mod parser;
pub mod query;
pub mod request;
pub mod response;
pub mod writer;
