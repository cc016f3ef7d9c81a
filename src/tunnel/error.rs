//! Tunnel setup and construction errors.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::net::tls::UpgradeError;

/// Failures before the relay starts. Each is reported to the client.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The backend refused or the dial failed outright.
    #[error("dial tcp {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The backend did not accept within the connect timeout.
    #[error("dial tcp {addr}: i/o timeout after {after:?}")]
    DialTimeout { addr: String, after: Duration },

    /// TLS handshake failed or timed out.
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),

    /// Writing the forwarded request failed.
    #[error("{0}")]
    Forward(#[source] io::Error),
}

impl TunnelError {
    /// Short failure category shown to the client.
    pub fn category(&self) -> &'static str {
        match self {
            TunnelError::Dial { .. } | TunnelError::DialTimeout { .. } => "dial backend error",
            TunnelError::Upgrade(_) => "tls handshake with backend error",
            TunnelError::Forward(_) => "write request to backend error",
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            TunnelError::DialTimeout { .. } => true,
            TunnelError::Upgrade(e) => e.is_timeout(),
            TunnelError::Dial { .. } | TunnelError::Forward(_) => false,
        }
    }

    /// Body of the error response sent to the client.
    pub fn client_message(&self) -> String {
        format!("{}: {}", self.category(), self)
    }
}

/// Configuration a tunnel service cannot be built from.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("route prefix {0:?} must start and end with '/'")]
    InvalidRoutePrefix(String),

    #[error("tls setup error: {0}")]
    Tls(#[from] UpgradeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_and_messages() {
        let refused = TunnelError::Dial {
            addr: "127.0.0.1:9".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(refused.client_message().starts_with("dial backend error: dial tcp 127.0.0.1:9"));
        assert!(!refused.is_timeout());

        let handshake = TunnelError::from(UpgradeError::Timeout(Duration::from_secs(10)));
        assert_eq!(handshake.category(), "tls handshake with backend error");
        assert!(handshake.is_timeout());
        assert!(handshake.client_message().contains("timeout on tls handshake"));

        let write = TunnelError::Forward(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(write.category(), "write request to backend error");
    }
}
