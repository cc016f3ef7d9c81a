//! Per-request tunnel sessions.
//!
//! # Responsibilities
//! - Own the hijacked client transport for the lifetime of one request
//! - Connect, secure and forward to the backend in order
//! - Report setup failures to the client before closing it
//! - Run the relay and release both transports
//!
//! # Design Decisions
//! - Each transport is moved into exactly one owner, so it is closed once
//!   when that owner drops it
//! - Failures after the relay starts are logged only

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ProxyConfig;
use crate::http::request::InboundRequest;
use crate::http::response::write_tunnel_error;
use crate::net::connection::{SessionGuard, SessionId, SessionTracker};
use crate::observability::metrics;
use crate::tunnel::connector::BackendConnector;
use crate::tunnel::error::{ServiceError, TunnelError};
use crate::tunnel::forward::{ForwardedRequest, RoutePrefix};
use crate::tunnel::relay::{relay, RelayEnd, RelayReport, RelaySettings};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    BackendConnecting,
    BackendSecuring,
    RequestForwarded,
    Relaying,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    fn advance(&mut self, next: SessionState) {
        tracing::trace!(from = %self, to = %next, "Session state change");
        *self = next;
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::BackendConnecting => "backend_connecting",
            SessionState::BackendSecuring => "backend_securing",
            SessionState::RequestForwarded => "request_forwarded",
            SessionState::Relaying => "relaying",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one session. `state` is always terminal.
#[derive(Debug)]
pub struct SessionReport {
    pub id: SessionId,
    pub state: SessionState,
    /// State the session was in when setup failed.
    pub failed_in: Option<SessionState>,
    pub error: Option<TunnelError>,
    pub relay: Option<RelayReport>,
}

impl SessionReport {
    fn failed(id: SessionId, failed_in: SessionState, error: TunnelError) -> Self {
        Self {
            id,
            state: SessionState::Failed,
            failed_in: Some(failed_in),
            error: Some(error),
            relay: None,
        }
    }
}

/// Bookkeeping for one live session. Untracked when dropped.
struct Session {
    guard: SessionGuard,
    state: SessionState,
    started: Instant,
}

impl Session {
    fn id(&self) -> SessionId {
        self.guard.id()
    }
}

/// Runs tunnel sessions against the configured backend.
#[derive(Clone)]
pub struct TunnelService {
    connector: BackendConnector,
    prefix: RoutePrefix,
    relay: RelaySettings,
    tracker: SessionTracker,
}

impl TunnelService {
    pub fn new(
        connector: BackendConnector,
        prefix: RoutePrefix,
        relay: RelaySettings,
        tracker: SessionTracker,
    ) -> Self {
        Self {
            connector,
            prefix,
            relay,
            tracker,
        }
    }

    /// Build the service from configuration.
    pub fn from_config(config: &ProxyConfig, tracker: SessionTracker) -> Result<Self, ServiceError> {
        let prefix = RoutePrefix::new(config.tunnel.route_prefix.clone())
            .ok_or_else(|| ServiceError::InvalidRoutePrefix(config.tunnel.route_prefix.clone()))?;
        let connector = BackendConnector::from_config(config)?;
        let relay = RelaySettings {
            buffer_size: config.tunnel.relay_buffer_bytes,
            idle_timeout: config.timeouts.relay_idle(),
        };
        Ok(Self::new(connector, prefix, relay, tracker))
    }

    pub fn prefix(&self) -> &RoutePrefix {
        &self.prefix
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn connector(&self) -> &BackendConnector {
        &self.connector
    }

    fn begin(&self) -> Session {
        Session {
            guard: self.tracker.track(),
            state: SessionState::Created,
            started: Instant::now(),
        }
    }

    /// Run one session over `client`.
    ///
    /// `client` must yield any bytes already read past `request`'s head
    /// first; they are relayed to the backend after the rewritten head.
    pub async fn serve<C>(&self, client: C, peer: SocketAddr, request: InboundRequest) -> SessionReport
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut session = self.begin();

        session.state.advance(SessionState::BackendConnecting);
        let stream = match self.connector.dial().await {
            Ok(stream) => stream,
            Err(e) => return self.fail(client, session, e).await,
        };

        if self.connector.is_encrypted() {
            session.state.advance(SessionState::BackendSecuring);
        }
        let backend = match self.connector.secure(stream).await {
            Ok(backend) => backend,
            Err(e) => return self.fail(client, session, e).await,
        };

        let backend_addr = backend
            .peer_addr()
            .map_or_else(|_| self.connector.target().address().to_string(), |a| a.to_string());
        self.splice(client, backend, &backend_addr, session, peer, request)
            .await
    }

    /// Forward the rewritten head over an established `backend`, then relay.
    async fn splice<C, B>(
        &self,
        client: C,
        mut backend: B,
        backend_addr: &str,
        mut session: Session,
        peer: SocketAddr,
        request: InboundRequest,
    ) -> SessionReport
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = session.id();
        let forwarded = ForwardedRequest::rewrite(&request, &self.prefix, self.connector.target());
        if let Err(e) = forwarded.write_to(&mut backend).await {
            drop(backend);
            return self.fail(client, session, TunnelError::Forward(e)).await;
        }
        session.state.advance(SessionState::RequestForwarded);
        tracing::debug!(session = %id, target = %forwarded.target(), "Request forwarded");

        tracing::info!(
            session = %id,
            "{} {} {} <--> {}",
            request.method,
            request.path(),
            peer,
            backend_addr
        );

        session.state.advance(SessionState::Relaying);
        let report = relay(client, backend, self.relay).await;

        match &report.end {
            RelayEnd::Failed(e) => tracing::debug!(session = %id, error = %e, "Relay ended with error"),
            RelayEnd::Idle => tracing::info!(session = %id, "Relay closed after idle timeout"),
            RelayEnd::BackendClosed => {}
        }
        tracing::debug!(
            session = %id,
            sent = report.client_to_backend,
            received = report.backend_to_client,
            elapsed_ms = session.started.elapsed().as_millis() as u64,
            "Tunnel closed"
        );
        metrics::record_session(report.end.as_str(), session.started);
        session.state.advance(SessionState::Completed);

        SessionReport {
            id,
            state: session.state,
            failed_in: None,
            error: None,
            relay: Some(report),
        }
    }

    async fn fail<C>(&self, mut client: C, session: Session, error: TunnelError) -> SessionReport
    where
        C: AsyncWrite + Unpin,
    {
        let id = session.id();
        tracing::warn!(
            session = %id,
            backend = %self.connector.target().address(),
            stage = %session.state,
            timeout = error.is_timeout(),
            error = %error,
            "Tunnel setup failed"
        );
        write_tunnel_error(&mut client, &error).await;
        drop(client);
        metrics::record_session("failed", session.started);
        SessionReport::failed(id, session.state, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, ReadBuf};
    use tokio::net::TcpListener;

    use crate::tunnel::connector::{BackendTarget, Scheme};

    fn service(addr: &str) -> TunnelService {
        let connector = BackendConnector::new(
            BackendTarget::new(addr, Scheme::Http),
            Duration::from_secs(2),
            None,
        );
        TunnelService::new(
            connector,
            RoutePrefix::new("/api/dmos/").unwrap(),
            RelaySettings::default(),
            SessionTracker::new(),
        )
    }

    fn request(target: &str) -> InboundRequest {
        InboundRequest {
            method: "GET".into(),
            target: target.into(),
            version: 1,
            headers: vec![("Host".into(), b"proxy:8080".to_vec())],
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn session_forwards_then_relays() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let backend = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 256];
            while !head.ends_with(b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(b"HTTP/1.1 200 OK\r\n\r\nhello").await.unwrap();
            head
        });

        let service = service(&addr);
        let (client, mut client_peer) = duplex(1024);
        let report = service.serve(client, peer(), request("/api/dmos/status")).await;

        assert_eq!(report.state, SessionState::Completed);
        assert!(report.error.is_none());

        let head = String::from_utf8(backend.await.unwrap()).unwrap();
        assert!(head.starts_with(&format!("GET http://{}/status HTTP/1.1\r\n", addr)));
        assert!(head.contains(&format!("Host: {}\r\n", addr)));

        let mut response = Vec::new();
        client_peer.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"HTTP/1.1 200 OK\r\n\r\nhello");
        assert_eq!(service.tracker().active_count(), 0);
    }

    #[tokio::test]
    async fn dial_failure_is_reported_to_client() {
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap().to_string();
        let service = service(&addr);
        let (client, mut client_peer) = duplex(1024);

        let report = service.serve(client, peer(), request("/api/dmos/")).await;
        assert_eq!(report.state, SessionState::Failed);
        assert_eq!(report.failed_in, Some(SessionState::BackendConnecting));

        let mut response = Vec::new();
        client_peer.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.0 500 Internal Server Error\r\n\r\ndial backend error: "));
        assert!(response.ends_with("\r\n"));
        assert_eq!(service.tracker().active_count(), 0);
    }

    /// Backend that accepts the connection but breaks on the first write.
    struct BrokenPipeBackend(Arc<AtomicBool>);

    impl AsyncRead for BrokenPipeBackend {
        fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for BrokenPipeBackend {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl Drop for BrokenPipeBackend {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn forward_failure_is_reported_and_closes_both_sides() {
        let service = service("127.0.0.1:9");
        let closed = Arc::new(AtomicBool::new(false));
        let backend = BrokenPipeBackend(Arc::clone(&closed));
        let (client, mut client_peer) = duplex(1024);

        let mut session = service.begin();
        session.state.advance(SessionState::BackendConnecting);
        assert_eq!(service.tracker().active_count(), 1);

        let report = service
            .splice(client, backend, "127.0.0.1:9", session, peer(), request("/api/dmos/upload"))
            .await;
        assert_eq!(report.state, SessionState::Failed);
        assert_eq!(report.failed_in, Some(SessionState::BackendConnecting));
        assert!(matches!(report.error, Some(TunnelError::Forward(_))));
        assert!(closed.load(Ordering::SeqCst), "backend transport was not released");

        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), client_peer.read_to_end(&mut response))
            .await
            .expect("client was left open")
            .unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(
            response.starts_with("HTTP/1.0 500 Internal Server Error\r\n\r\nwrite request to backend error: "),
            "unexpected response: {:?}",
            response
        );
        assert!(response.ends_with("\r\n"));
        assert_eq!(service.tracker().active_count(), 0);
    }

    #[test]
    fn invalid_route_prefix_is_rejected() {
        let mut config = ProxyConfig::default();
        config.backend.address = "127.0.0.1:9".into();
        config.tunnel.route_prefix = "/api/dmos".into();

        match TunnelService::from_config(&config, SessionTracker::new()) {
            Err(ServiceError::InvalidRoutePrefix(prefix)) => assert_eq!(prefix, "/api/dmos"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("service built with a prefix missing its trailing '/'"),
        }
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Relaying.is_terminal());
    }
}
