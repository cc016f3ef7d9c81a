//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (read and parse the head off the raw socket)
//!     → server.rs (dispatch on path)
//!         ├─ under the route prefix → tunnel service (hijacked socket)
//!         └─ otherwise → Axum router over hyper (healthz, redirect, 404)
//!     → response.rs (raw error responses on hijacked sockets)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{read_request_head, HeadError, InboundRequest, RequestHead};
pub use server::{AppState, ProxyServer};
