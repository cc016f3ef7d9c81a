//! Backend connection establishment.
//!
//! # Responsibilities
//! - Dial the configured backend under the connect timeout
//! - Hand the plain stream to the TLS upgrader when the backend is encrypted
//! - Expose one transport type regardless of the backend's protocol
//!
//! # Design Decisions
//! - Single attempt, no retry and no failover
//! - Upgrading consumes the plain stream, so only the wrapped handle survives

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::config::validation::split_host_port;
use crate::config::ProxyConfig;
use crate::net::tls::{TlsUpgrader, UpgradeError};
use crate::tunnel::error::TunnelError;

/// URI scheme used when addressing the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

/// Where tunnels go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    address: String,
    scheme: Scheme,
}

impl BackendTarget {
    pub fn new(address: impl Into<String>, scheme: Scheme) -> Self {
        Self {
            address: address.into(),
            scheme,
        }
    }

    /// `host:port` as configured.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }
}

/// A connected backend, plain or TLS.
pub enum BackendTransport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl BackendTransport {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            BackendTransport::Plain(tcp) => tcp.peer_addr(),
            BackendTransport::Tls(tls) => tls.get_ref().0.peer_addr(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, BackendTransport::Tls(_))
    }
}

impl fmt::Debug for BackendTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_encrypted() { "Tls" } else { "Plain" };
        f.debug_struct("BackendTransport")
            .field("kind", &kind)
            .field("peer", &self.peer_addr().ok())
            .finish()
    }
}

impl AsyncRead for BackendTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendTransport::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            BackendTransport::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendTransport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendTransport::Plain(tcp) => Pin::new(tcp).poll_write(cx, data),
            BackendTransport::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, data),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendTransport::Plain(tcp) => Pin::new(tcp).poll_flush(cx),
            BackendTransport::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendTransport::Plain(tcp) => Pin::new(tcp).poll_shutdown(cx),
            BackendTransport::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Dials the backend and secures the connection when configured to.
#[derive(Clone)]
pub struct BackendConnector {
    target: BackendTarget,
    connect_timeout: Duration,
    tls: Option<TlsUpgrader>,
}

impl BackendConnector {
    pub fn new(target: BackendTarget, connect_timeout: Duration, tls: Option<TlsUpgrader>) -> Self {
        Self {
            target,
            connect_timeout,
            tls,
        }
    }

    /// Build the connector described by `config`.
    ///
    /// In encrypted mode the TLS server name is `backend.server_name`, or the
    /// host part of the backend address.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, UpgradeError> {
        let address = config.backend.address.trim().to_string();

        if !config.backend.encrypted {
            return Ok(Self::new(
                BackendTarget::new(address, Scheme::Http),
                config.timeouts.connect(),
                None,
            ));
        }

        let server_name = match &config.backend.server_name {
            Some(name) => name.clone(),
            None => split_host_port(&address)
                .map(|(host, _)| host.to_string())
                .map_err(|_| UpgradeError::InvalidServerName(address.clone()))?,
        };
        let upgrader = TlsUpgrader::new(&server_name, config.timeouts.handshake())?;

        Ok(Self::new(
            BackendTarget::new(address, Scheme::Https),
            config.timeouts.connect(),
            Some(upgrader),
        ))
    }

    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    pub fn is_encrypted(&self) -> bool {
        self.tls.is_some()
    }

    /// Open the TCP connection.
    pub async fn dial(&self) -> Result<TcpStream, TunnelError> {
        let addr = self.target.address();
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TunnelError::Dial {
                    addr: addr.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(TunnelError::DialTimeout {
                    addr: addr.to_string(),
                    after: self.connect_timeout,
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY on backend stream");
        }
        Ok(stream)
    }

    /// Wrap `stream` in TLS when the backend is encrypted.
    pub async fn secure(&self, stream: TcpStream) -> Result<BackendTransport, TunnelError> {
        match &self.tls {
            Some(upgrader) => {
                let tls = upgrader.upgrade(stream).await?;
                Ok(BackendTransport::Tls(Box::new(tls)))
            }
            None => Ok(BackendTransport::Plain(stream)),
        }
    }

    /// Dial and secure in one step.
    pub async fn connect(&self) -> Result<BackendTransport, TunnelError> {
        let stream = self.dial().await?;
        self.secure(stream).await
    }
}
