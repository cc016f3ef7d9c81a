//! Startup orchestration.
//!
//! # Responsibilities
//! - Reject invalid configuration before touching the network
//! - Confirm an encrypted backend really speaks TLS before serving
//! - Build the server and bind the listener, in that order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, so no traffic arrives before the backend is
//!   known to be usable

use thiserror::Error;

use crate::config::validation::validate_config;
use crate::config::{ConfigError, ProxyConfig};
use crate::http::ProxyServer;
use crate::net::listener::{Listener, ListenerError};
use crate::tunnel::error::ServiceError;
use crate::tunnel::probe::{probe_backend, BackendProtocol, ProbeError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("detect https backend error: {0}")]
    Probe(#[from] ProbeError),

    #[error("backend {0} seems not serving https")]
    PlaintextBackend(String),

    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("{0}")]
    Listener(#[from] ListenerError),
}

/// In encrypted mode, probe the backend and refuse a plaintext answer.
///
/// Plaintext mode is trusted as configured.
pub async fn verify_backend(config: &ProxyConfig) -> Result<(), StartupError> {
    if !config.backend.encrypted {
        return Ok(());
    }

    let address = config.backend.address.trim();
    tracing::info!(backend = %address, "Checking that backend serves TLS");
    match probe_backend(address, config.timeouts.probe()).await? {
        BackendProtocol::Encrypted => {
            tracing::info!(backend = %address, "Backend does not answer plaintext HTTP");
            Ok(())
        }
        BackendProtocol::Plaintext => Err(StartupError::PlaintextBackend(address.to_string())),
    }
}

/// Validate the configuration, verify the backend, build the server, then
/// bind the listener.
pub async fn start(config: &ProxyConfig) -> Result<(ProxyServer, Listener), StartupError> {
    validate_config(config).map_err(ConfigError::Validation)?;
    verify_backend(config).await?;
    let server = ProxyServer::new(config)?;
    let listener = Listener::bind(&config.listener).await?;
    Ok((server, listener))
}
