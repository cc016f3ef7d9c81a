//! Raw responses written straight onto a client socket.
//!
//! # Responsibilities
//! - Report tunnel setup failures to a hijacked client
//! - Reject unusable request heads before any HTTP server sees them
//!
//! # Design Decisions
//! - HTTP/1.0 framing with no headers: the body runs until the close
//! - Write failures are ignored; the client may already be gone

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::request::HeadError;
use crate::tunnel::TunnelError;

/// Render `HTTP/1.0 <status>\r\n\r\n<message>\r\n`.
pub fn render_raw(status: &str, message: &str) -> Vec<u8> {
    format!("HTTP/1.0 {}\r\n\r\n{}\r\n", status, message).into_bytes()
}

/// Write a raw response and shut the write side down.
pub async fn write_raw<W>(io: &mut W, status: &str, message: &str)
where
    W: AsyncWrite + Unpin,
{
    let payload = render_raw(status, message);
    if let Err(e) = io.write_all(&payload).await {
        tracing::debug!(error = %e, "Client went away before error response");
        return;
    }
    let _ = io.shutdown().await;
}

/// Tell a hijacked client why its tunnel could not be set up.
pub async fn write_tunnel_error<W>(io: &mut W, error: &TunnelError)
where
    W: AsyncWrite + Unpin,
{
    write_raw(io, "500 Internal Server Error", &error.client_message()).await;
}

/// Status line for a head that can be answered, or `None` when the client
/// should just be dropped.
pub fn head_error_status(error: &HeadError) -> Option<&'static str> {
    match error {
        HeadError::Malformed(_) => Some("400 Bad Request"),
        HeadError::TooLarge(_) => Some("431 Request Header Fields Too Large"),
        HeadError::Closed | HeadError::Truncated | HeadError::Timeout | HeadError::Io(_) => None,
    }
}
