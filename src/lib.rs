//! Splice Proxy Library

pub mod config;
pub mod http;
pub mod net;
pub mod tunnel;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
pub use tunnel::TunnelService;
