//! Splice Proxy
//!
//! Tunnels HTTP requests under a route prefix straight to one backend.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │                  SPLICE PROXY                     │
//!                     │                                                   │
//!   Client request    │  ┌─────────┐    ┌──────────┐  prefix  ┌────────┐ │
//!   ──────────────────┼─▶│   net   │───▶│   http   │─────────▶│ tunnel │─┼──▶ Backend
//!                     │  │listener │    │ dispatch │          │session │ │    (plain or TLS)
//!                     │  └─────────┘    └────┬─────┘          └────────┘ │
//!                     │                      │ other                      │
//!                     │                      ▼                            │
//!                     │                ┌──────────┐                       │
//!                     │                │   axum   │ healthz / 301 / 404   │
//!                     │                └──────────┘                       │
//!                     │                                                   │
//!                     │  config · lifecycle · observability · resilience  │
//!                     └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use splice_proxy::config::schema::ObservabilityConfig;
use splice_proxy::config::{load_config, ConfigOverrides};
use splice_proxy::lifecycle::{self, Shutdown};
use splice_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "splice-proxy", version, about = "Transparent TCP tunnel behind an HTTP listener")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8080 or :8080
    #[arg(long)]
    listen: Option<String>,

    /// Backend address (host:port)
    #[arg(long)]
    backend: Option<String>,

    /// Backend serves TLS
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    encrypted: Option<bool>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        listen: cli.listen,
        backend: cli.backend,
        encrypted: cli.encrypted,
    };

    let config = match load_config(cli.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            let _ = logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listener.bind_address,
        backend = %config.backend.address,
        encrypted = config.backend.encrypted,
        prefix = %config.tunnel.route_prefix,
        "splice-proxy starting"
    );

    let (server, listener) = match lifecycle::start(&config).await {
        Ok(started) => started,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => {
                tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    error = %e,
                    "Failed to parse metrics address"
                );
                return ExitCode::FAILURE;
            }
        }
    }

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    if let Err(e) = server.run(listener, shutdown.subscribe()).await {
        tracing::error!(error = %e, "Server stopped with error");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
