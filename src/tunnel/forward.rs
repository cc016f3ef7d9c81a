//! Request forwarding.
//!
//! Rewrites the inbound request so it addresses the backend directly and
//! serializes it onto the backend transport. Only the head is rewritten; the
//! body is never touched here and reaches the backend through the relay.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::request::InboundRequest;
use crate::tunnel::connector::BackendTarget;

/// Headers dropped when forwarding. `Host` is rewritten separately.
const STRIPPED_HEADERS: [&str; 3] = ["host", "proxy-connection", "proxy-authorization"];

/// Path prefix that routes requests into tunnels.
///
/// Always starts and ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePrefix(String);

impl RoutePrefix {
    pub fn new(prefix: impl Into<String>) -> Option<Self> {
        let prefix = prefix.into();
        if prefix.starts_with('/') && prefix.ends_with('/') {
            Some(Self(prefix))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The prefix without its trailing `/`, e.g. `/api/dmos`.
    pub fn bare(&self) -> &str {
        &self.0[..self.0.len() - 1]
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(self.0.as_str())
    }

    /// Remove the prefix, keeping the leading `/`.
    ///
    /// `/api/dmos/a/b` becomes `/a/b`; `/api/dmos/` becomes `/`.
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.matches(path) {
            Some(&path[self.0.len() - 1..])
        } else {
            None
        }
    }
}

/// The inbound request rewritten for the backend. Written exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedRequest {
    method: String,
    target: String,
    version: u8,
    host: String,
    headers: Vec<(String, Vec<u8>)>,
}

impl ForwardedRequest {
    /// Build the forwarded form of `inbound`.
    ///
    /// The target becomes absolute-form with the backend as authority and the
    /// routing prefix removed from the path. Paths outside the prefix keep
    /// their path unchanged.
    pub fn rewrite(inbound: &InboundRequest, prefix: &RoutePrefix, backend: &BackendTarget) -> Self {
        let path = inbound.path();
        let path = prefix.strip(path).unwrap_or(path);

        let mut target = format!("{}://{}{}", backend.scheme(), backend.address(), path);
        if let Some(query) = inbound.query() {
            target.push('?');
            target.push_str(query);
        }

        let headers = inbound
            .headers
            .iter()
            .filter(|(name, _)| !STRIPPED_HEADERS.iter().any(|s| name.eq_ignore_ascii_case(s)))
            .cloned()
            .collect();

        Self {
            method: inbound.method.clone(),
            target,
            version: inbound.version,
            host: backend.address().to_string(),
            headers,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Serialize the request line and headers.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(
            format!(
                "{} {} HTTP/1.{}\r\nHost: {}\r\n",
                self.method, self.target, self.version, self.host
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Write the encoded head to `io` in a single write and flush it.
    pub async fn write_to<W>(&self, io: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        io.write_all(&self.encode()).await?;
        io.flush().await
    }
}
