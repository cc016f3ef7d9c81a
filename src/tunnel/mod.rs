//! Tunnel subsystem.
//!
//! # Data Flow
//! ```text
//! hijacked client ──▶ session
//!                       │
//!                       ├─▶ connector: dial ──▶ (tls upgrade)
//!                       ├─▶ forward: rewritten head ──▶ backend
//!                       └─▶ relay: client ◀══▶ backend
//! ```
//!
//! # Design Decisions
//! - One backend, one attempt per session
//! - The backend protocol is asserted by the operator and checked once at
//!   startup by the prober, never re-detected per session
//! - Setup errors go back to the client as a raw 500; relay errors only close

pub mod connector;
pub mod error;
pub mod forward;
pub mod probe;
pub mod relay;
pub mod session;

pub use connector::{BackendConnector, BackendTarget, BackendTransport, Scheme};
pub use error::{ServiceError, TunnelError};
pub use forward::{ForwardedRequest, RoutePrefix};
pub use probe::{probe_backend, BackendProtocol, ProbeError};
pub use relay::{relay, RelayEnd, RelayReport, RelaySettings};
pub use session::{SessionReport, SessionState, TunnelService};
