//! Backend protocol detection.
//!
//! Sends a minimal plaintext HTTP request and looks at the first bytes of
//! the reply. A plaintext HTTP server answers with a status line starting
//! `HTTP/`; anything else, including a TLS alert or a short reply before
//! close, is taken to mean the backend expects TLS.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Request sent to the backend during detection.
pub const PROBE_REQUEST: &[u8] = b"GET / HTTP/1.1\r\n\r\n";

/// Reply prefix of a plaintext HTTP server.
pub const PLAINTEXT_SIGNATURE: &[u8] = b"HTTP/";

/// What a backend speaks on its listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendProtocol {
    Plaintext,
    Encrypted,
}

impl BackendProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendProtocol::Plaintext => "plaintext",
            BackendProtocol::Encrypted => "encrypted",
        }
    }
}

impl std::fmt::Display for BackendProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("dial tcp {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("probe of {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("write probe request: {0}")]
    Write(#[source] io::Error),

    #[error("read probe response: {0}")]
    Read(#[source] io::Error),

    #[error("backend closed the connection without replying")]
    NoResponse,
}

/// Classify the first bytes a backend sent back.
pub fn classify(reply: &[u8]) -> BackendProtocol {
    if reply.len() >= PLAINTEXT_SIGNATURE.len() && reply[..PLAINTEXT_SIGNATURE.len()] == *PLAINTEXT_SIGNATURE {
        BackendProtocol::Plaintext
    } else {
        BackendProtocol::Encrypted
    }
}

/// Detect the protocol spoken at `addr`.
///
/// Dial, write and read all share the single `deadline`. The probe
/// connection is closed before returning.
pub async fn probe_backend(addr: &str, deadline: Duration) -> Result<BackendProtocol, ProbeError> {
    match tokio::time::timeout(deadline, exchange(addr)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout {
            addr: addr.to_string(),
            after: deadline,
        }),
    }
}

async fn exchange(addr: &str) -> Result<BackendProtocol, ProbeError> {
    let mut stream = TcpStream::connect(addr).await.map_err(|source| ProbeError::Dial {
        addr: addr.to_string(),
        source,
    })?;

    stream.write_all(PROBE_REQUEST).await.map_err(ProbeError::Write)?;

    let mut reply = [0u8; 5];
    let mut filled = 0;
    while filled < reply.len() {
        let n = stream.read(&mut reply[filled..]).await.map_err(ProbeError::Read)?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if filled == 0 {
        return Err(ProbeError::NoResponse);
    }

    let protocol = classify(&reply[..filled]);
    tracing::debug!(backend = %addr, reply = ?&reply[..filled], protocol = %protocol, "Backend probed");
    Ok(protocol)
}
