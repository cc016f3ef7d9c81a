//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive `Deserialize` so they load straight from TOML.

use std::time::Duration;

use serde::Deserialize;

/// Root configuration for the tunneling proxy.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// The single backend every tunnel is spliced to.
    pub backend: BackendConfig,

    /// Tunnel routing and relay settings.
    pub tunnel: TunnelConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Largest request head accepted before answering 431.
    pub max_head_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            max_head_bytes: 64 * 1024,
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address as `host:port`. Required.
    pub address: String,

    /// Wrap backend connections in TLS.
    pub encrypted: bool,

    /// Name sent as SNI during the TLS handshake.
    /// Defaults to the host part of `address`.
    pub server_name: Option<String>,
}

/// Tunnel settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Path prefix routed into tunnels. Must start and end with `/`.
    pub route_prefix: String,

    /// Size of each relay direction's copy buffer.
    pub relay_buffer_bytes: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            route_prefix: "/api/dmos/".to_string(),
            relay_buffer_bytes: 16 * 1024,
        }
    }
}

/// Timeout configuration for various operations, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend TCP connect timeout.
    pub connect_ms: u64,

    /// Backend TLS handshake deadline.
    pub handshake_ms: u64,

    /// Startup protocol probe deadline.
    pub probe_ms: u64,

    /// Deadline for a client to deliver a complete request head.
    pub head_read_ms: u64,

    /// How long shutdown waits for live tunnels.
    pub drain_ms: u64,

    /// End a relay after this long without bytes in either direction.
    /// Unset means tunnels live until a side closes.
    pub relay_idle_ms: Option<u64>,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    pub fn head_read(&self) -> Duration {
        Duration::from_millis(self.head_read_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn relay_idle(&self) -> Option<Duration> {
        self.relay_idle_ms.map(Duration::from_millis)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            handshake_ms: 10_000,
            probe_ms: 60_000,
            head_read_ms: 30_000,
            drain_ms: 30_000,
            relay_idle_ms: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [backend]
            address = "10.0.0.5:8443"
            encrypted = true

            [timeouts]
            relay_idle_ms = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.address, "10.0.0.5:8443");
        assert!(config.backend.encrypted);
        assert_eq!(config.tunnel.route_prefix, "/api/dmos/");
        assert_eq!(config.timeouts.handshake(), Duration::from_secs(10));
        assert_eq!(config.timeouts.relay_idle(), Some(Duration::from_secs(5)));
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn log_format_is_lowercase() {
        let config: ObservabilityConfig = toml::from_str(r#"log_format = "json""#).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
