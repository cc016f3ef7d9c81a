//! Full-duplex byte relay.
//!
//! # Data Flow
//! ```text
//!            ┌──────── background task ────────┐
//! client ──▶ │ pump(client_rd → backend_wr)    │ ──▶ backend
//!            └─────────────────────────────────┘
//! client ◀── pump(backend_rd → client_wr) (awaited) ◀── backend
//! ```
//!
//! # Design Decisions
//! - The response direction is awaited; its end is the end of the relay
//! - Each pump shuts down its destination's write side when its source ends
//! - The request direction is aborted and joined once the response side is
//!   done, so no copy loop outlives the session
//! - Bytes are copied untouched

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::observability::metrics;

/// Relay tuning.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub buffer_size: usize,
    /// End the relay after this long with no bytes in either direction.
    pub idle_timeout: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            idle_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToBackend => "client_to_backend",
            Direction::BackendToClient => "backend_to_client",
        }
    }

    fn index(&self) -> usize {
        match self {
            Direction::ClientToBackend => 0,
            Direction::BackendToClient => 1,
        }
    }
}

/// Why the relay stopped.
#[derive(Debug)]
pub enum RelayEnd {
    /// The backend finished its response stream.
    BackendClosed,
    /// Reading from the backend or writing to the client failed.
    Failed(io::Error),
    /// Nothing moved for the configured idle period.
    Idle,
}

impl RelayEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayEnd::BackendClosed => "completed",
            RelayEnd::Failed(_) => "relay_error",
            RelayEnd::Idle => "idle_timeout",
        }
    }
}

/// Summary of a finished relay.
#[derive(Debug)]
pub struct RelayReport {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
    pub end: RelayEnd,
}

/// Shared byte counters and last-activity clock for both pumps.
#[derive(Debug)]
struct Meter {
    started: Instant,
    last_activity_ms: AtomicU64,
    bytes: [AtomicU64; 2],
}

impl Meter {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            bytes: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    fn record(&self, direction: Direction, n: usize) {
        self.bytes[direction.index()].fetch_add(n as u64, Ordering::Relaxed);
        let now = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn bytes(&self, direction: Direction) -> u64 {
        self.bytes[direction.index()].load(Ordering::Relaxed)
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

/// Copy `reader` into `writer` until EOF or error, then half-close `writer`.
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    meter: Arc<Meter>,
    direction: Direction,
    buffer_size: usize,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let result = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            break Err(e);
        }
        if let Err(e) = writer.flush().await {
            break Err(e);
        }
        meter.record(direction, n);
    };

    // The peer may already be gone; a failed half-close changes nothing.
    let _ = writer.shutdown().await;
    tracing::trace!(direction = direction.as_str(), ok = result.is_ok(), "Relay direction finished");
    result
}

async fn idle_watchdog(meter: &Meter, limit: Duration) {
    loop {
        let idle = meter.idle_for();
        if idle >= limit {
            return;
        }
        tokio::time::sleep(limit - idle).await;
    }
}

/// Splice `client` and `backend` until the backend's stream ends.
///
/// Both transports are dropped, and therefore closed, before this returns.
pub async fn relay<C, B>(client: C, backend: B, settings: RelaySettings) -> RelayReport
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_rd, client_wr) = tokio::io::split(client);
    let (backend_rd, backend_wr) = tokio::io::split(backend);
    let meter = Arc::new(Meter::new());

    let upstream = tokio::spawn(pump(
        client_rd,
        backend_wr,
        Arc::clone(&meter),
        Direction::ClientToBackend,
        settings.buffer_size,
    ));
    let downstream = pump(
        backend_rd,
        client_wr,
        Arc::clone(&meter),
        Direction::BackendToClient,
        settings.buffer_size,
    );

    let end = match settings.idle_timeout {
        Some(limit) => tokio::select! {
            result = downstream => end_from(result),
            _ = idle_watchdog(&meter, limit) => RelayEnd::Idle,
        },
        None => end_from(downstream.await),
    };

    // Nothing can be delivered once the response side is finished.
    upstream.abort();
    match upstream.await {
        Ok(Err(e)) => tracing::debug!(error = %e, "Client to backend copy failed"),
        Err(e) if e.is_panic() => tracing::error!("Client to backend copy panicked"),
        _ => {}
    }

    let report = RelayReport {
        client_to_backend: meter.bytes(Direction::ClientToBackend),
        backend_to_client: meter.bytes(Direction::BackendToClient),
        end,
    };
    metrics::record_relay_bytes(Direction::ClientToBackend.as_str(), report.client_to_backend);
    metrics::record_relay_bytes(Direction::BackendToClient.as_str(), report.backend_to_client);
    report
}

fn end_from(result: io::Result<()>) -> RelayEnd {
    match result {
        Ok(()) => RelayEnd::BackendClosed,
        Err(e) => RelayEnd::Failed(e),
    }
}
