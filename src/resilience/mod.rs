//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Backend TLS handshake:
//!     → timeouts.rs (race the handshake task against a timer task)
//! ```
//!
//! # Design Decisions
//! - Every pre-relay backend operation has a deadline
//! - No retries: one backend, one attempt per session

pub mod timeouts;
