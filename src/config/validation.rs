//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate the backend address and routing prefix
//! - Validate value ranges (timeouts > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("backend address is required (set BACKEND_ENDPOINT or [backend].address)")]
    MissingBackend,

    #[error("backend address {address:?}: {reason}")]
    InvalidBackend { address: String, reason: AddressError },

    #[error("route prefix {0:?} must start and end with '/'")]
    InvalidRoutePrefix(String),

    #[error("bind address {0:?} is not a host:port address")]
    InvalidBindAddress(String),

    #[error("metrics address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Why a `host:port` string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("missing port in address")]
    MissingPort,
    #[error("too many colons in address")]
    TooManyColons,
    #[error("missing ']' in address")]
    UnclosedBracket,
    #[error("missing host in address")]
    MissingHost,
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
///
/// The returned host has its brackets removed.
pub fn split_host_port(address: &str) -> Result<(&str, u16), AddressError> {
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let end = rest.find(']').ok_or(AddressError::UnclosedBracket)?;
        let port = rest[end + 1..]
            .strip_prefix(':')
            .ok_or(AddressError::MissingPort)?;
        (&rest[..end], port)
    } else {
        let (host, port) = address.rsplit_once(':').ok_or(AddressError::MissingPort)?;
        if host.contains(':') {
            return Err(AddressError::TooManyColons);
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(AddressError::MissingHost);
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| AddressError::InvalidPort(port.to_string()))?;
    Ok((host, port))
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let address = config.backend.address.trim();
    if address.is_empty() {
        errors.push(ValidationError::MissingBackend);
    } else if let Err(reason) = split_host_port(address) {
        errors.push(ValidationError::InvalidBackend {
            address: address.to_string(),
            reason,
        });
    }

    let prefix = &config.tunnel.route_prefix;
    if !prefix.starts_with('/') || !prefix.ends_with('/') {
        errors.push(ValidationError::InvalidRoutePrefix(prefix.clone()));
    }

    if split_host_port(&config.listener.bind_address).is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    let positive = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("listener.max_head_bytes", config.listener.max_head_bytes as u64),
        ("tunnel.relay_buffer_bytes", config.tunnel.relay_buffer_bytes as u64),
        ("timeouts.connect_ms", config.timeouts.connect_ms),
        ("timeouts.handshake_ms", config.timeouts.handshake_ms),
        ("timeouts.probe_ms", config.timeouts.probe_ms),
        ("timeouts.head_read_ms", config.timeouts.head_read_ms),
        ("timeouts.relay_idle_ms", config.timeouts.relay_idle_ms.unwrap_or(1)),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
