//! Client-side TLS for backend connections.
//!
//! # Responsibilities
//! - Build the rustls client configuration once at startup
//! - Upgrade a plain backend stream to TLS under a deadline
//!
//! # Design Decisions
//! - Backend certificates are not verified; see [`TrustBackendByAddress`]
//! - The handshake consumes the plain stream, so it cannot be reused

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::observability::metrics;
use crate::resilience::timeouts::{race_deadline, DeadlineError};

/// Errors from upgrading a backend stream.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("invalid tls server name {0:?}")]
    InvalidServerName(String),

    #[error("tls client configuration: {0}")]
    Config(#[from] rustls::Error),

    #[error("timeout on tls handshake after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Handshake(#[source] std::io::Error),

    #[error("tls handshake abandoned")]
    Abandoned,
}

impl UpgradeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, UpgradeError::Timeout(_))
    }
}

/// Upgrades plain backend streams to TLS.
#[derive(Clone)]
pub struct TlsUpgrader {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    deadline: Duration,
}

impl TlsUpgrader {
    /// Build an upgrader presenting `server_name` as SNI.
    pub fn new(server_name: &str, deadline: Duration) -> Result<Self, UpgradeError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = Arc::new(TrustBackendByAddress(Arc::clone(&provider)));

        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| UpgradeError::InvalidServerName(server_name.to_string()))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            deadline,
        })
    }

    /// Run the client handshake over `stream`.
    ///
    /// The handshake runs on its own task and races the deadline; on timeout
    /// the handshake task is aborted and `stream` is closed with it.
    pub async fn upgrade<S>(&self, stream: S) -> Result<TlsStream<S>, UpgradeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connector = self.connector.clone();
        let server_name = self.server_name.clone();
        let started = Instant::now();

        let handshake = async move { connector.connect(server_name, stream).await };
        let result = match race_deadline(handshake, self.deadline).await {
            Ok(Ok(tls)) => Ok(tls),
            Ok(Err(e)) => Err(UpgradeError::Handshake(e)),
            Err(DeadlineError::Elapsed(after)) => Err(UpgradeError::Timeout(after)),
            Err(DeadlineError::Abandoned) => Err(UpgradeError::Abandoned),
        };

        metrics::record_handshake(result.is_ok(), started);
        result
    }
}

/// Accepts whatever certificate the backend presents.
///
/// The backend is chosen by the operator and addressed directly, so the proxy
/// trusts it by address rather than by certificate chain. Handshake signatures
/// are not checked either; the session is encrypted but not authenticated.
#[derive(Debug)]
struct TrustBackendByAddress(Arc<CryptoProvider>);

impl ServerCertVerifier for TrustBackendByAddress {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
