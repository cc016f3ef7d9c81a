//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → Hand off to HTTP layer
//!     → prefixed.rs (replay bytes read while parsing the head)
//!     → connection.rs (session IDs, live session tracking)
//!
//! Backend side:
//!     TCP connect → tls.rs (optional TLS handshake under a deadline)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each tunnel tracked for graceful shutdown
//! - TLS is client-side only and handled transparently

pub mod connection;
pub mod listener;
pub mod prefixed;
pub mod tls;

pub use connection::{SessionGuard, SessionId, SessionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use prefixed::PrefixedIo;
pub use tls::{TlsUpgrader, UpgradeError};
