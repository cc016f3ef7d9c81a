//! HTTP front end.
//!
//! # Responsibilities
//! - Accept connections under the listener's connection limit
//! - Read each request head off the raw socket and dispatch on its path
//! - Hand routed connections to the tunnel service untouched
//! - Serve everything else (health check, redirects, 404) through Axum
//! - Stop accepting on shutdown and drain live tunnels
//!
//! # Design Decisions
//! - The head is parsed before hyper sees the connection, so a tunnel gets
//!   a socket nothing has been written to
//! - Non-tunnel connections are served one request each (no keep-alive),
//!   since every request on a connection must pass through dispatch

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::request::{read_request_head, RequestHead};
use crate::http::response::{head_error_status, write_raw};
use crate::net::connection::SessionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::net::prefixed::PrefixedIo;
use crate::tunnel::{RoutePrefix, ServiceError, TunnelService};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: SessionTracker,
    pub backend: String,
    pub encrypted: bool,
    pub prefix: RoutePrefix,
}

/// Per-connection dispatch shared by every accepted socket.
struct Dispatcher {
    tunnels: TunnelService,
    router: Router,
    max_head_bytes: usize,
    head_read: Duration,
}

impl Dispatcher {
    async fn handle(&self, mut stream: TcpStream, peer: SocketAddr) {
        let head = match read_request_head(&mut stream, self.max_head_bytes, self.head_read).await {
            Ok(head) => head,
            Err(e) => {
                match head_error_status(&e) {
                    Some(status) => {
                        tracing::debug!(client = %peer, error = %e, "Rejecting request head");
                        write_raw(&mut stream, status, &e.to_string()).await;
                    }
                    None => tracing::debug!(client = %peer, error = %e, "Connection closed before dispatch"),
                }
                return;
            }
        };

        let RequestHead {
            request,
            mut buffered,
            head_len,
        } = head;

        if self.tunnels.prefix().matches(request.path()) {
            // The head is re-encoded by the forwarder; only the body bytes
            // that arrived with it are replayed.
            let body = buffered.split_off(head_len).freeze();
            let client = PrefixedIo::new(body, stream);
            tracing::trace!(client = %peer, early_body = client.pending().len(), "Dispatching to tunnel");
            self.tunnels.serve(client, peer, request).await;
            return;
        }

        let io = PrefixedIo::new(buffered.freeze(), stream);
        self.serve_local(io, peer).await;
    }

    async fn serve_local(&self, io: PrefixedIo<TcpStream>, peer: SocketAddr) {
        let router = self.router.clone();
        let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(ConnectInfo(peer));
            router.clone().oneshot(request)
        });

        if let Err(e) = http1::Builder::new()
            .keep_alive(false)
            .serve_connection(TokioIo::new(io), service)
            .await
        {
            tracing::debug!(client = %peer, error = %e, "Error serving connection");
        }
    }
}

/// The proxy's HTTP server.
pub struct ProxyServer {
    dispatcher: Arc<Dispatcher>,
    tracker: SessionTracker,
    drain: Duration,
}

impl ProxyServer {
    /// Create a server for a validated configuration.
    pub fn new(config: &ProxyConfig) -> Result<Self, ServiceError> {
        let tracker = SessionTracker::new();
        let tunnels = TunnelService::from_config(config, tracker.clone())?;

        let state = AppState {
            tracker: tracker.clone(),
            backend: tunnels.connector().target().address().to_string(),
            encrypted: tunnels.connector().is_encrypted(),
            prefix: tunnels.prefix().clone(),
        };

        let dispatcher = Dispatcher {
            tunnels,
            router: build_router(state),
            max_head_bytes: config.listener.max_head_bytes,
            head_read: config.timeouts.head_read(),
        };

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            tracker,
            drain: config.timeouts.drain(),
        })
    }

    /// Live tunnel sessions.
    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then drain live tunnels.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        match listener.local_addr() {
            Ok(addr) => tracing::info!(
                address = %addr,
                prefix = %self.dispatcher.tunnels.prefix().as_str(),
                backend = %self.dispatcher.tunnels.connector().target().address(),
                "HTTP server starting"
            ),
            Err(e) => tracing::warn!(error = %e, "Listener has no local address"),
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Accept(e)) => {
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        dispatcher.handle(stream, peer).await;
                        drop(permit);
                    });
                }
            }
        }

        drop(listener);
        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, limit = ?self.drain, "Draining tunnels");
        }
        let remaining = self.tracker.drain(self.drain).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Drain deadline passed with tunnels still open");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(fallback)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "backend": state.backend,
        "encrypted": state.encrypted,
        "active_sessions": state.tracker.active_count(),
    }))
}

/// Redirect the bare prefix to its slash form; everything else is not found.
async fn fallback(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
) -> Response {
    let prefix = &state.prefix;
    if !prefix.bare().is_empty() && uri.path() == prefix.bare() {
        let location = match uri.query() {
            Some(query) => format!("{}?{}", prefix.as_str(), query),
            None => prefix.as_str().to_string(),
        };
        return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response();
    }

    tracing::debug!(client = %peer, path = %uri.path(), "No handler for path");
    (StatusCode::NOT_FOUND, "404 page not found\n").into_response()
}
