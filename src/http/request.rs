//! Request head reading.
//!
//! # Responsibilities
//! - Read the request head straight off the accepted socket
//! - Parse method, target, version and headers with httparse
//! - Keep every byte read so the owner of the connection can replay it
//!
//! # Design Decisions
//! - The socket is never handed to an HTTP server before dispatch, so a
//!   tunnel takes the raw connection with nothing written to it yet
//! - Head size and read time are bounded before any parsing result is trusted

use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum number of headers accepted in a request head.
pub const MAX_HEADERS: usize = 64;

/// Errors from reading a request head.
#[derive(Debug, Error)]
pub enum HeadError {
    #[error("connection closed before a request arrived")]
    Closed,

    #[error("connection closed in the middle of the request head")]
    Truncated,

    #[error("timed out waiting for the request head")]
    Timeout,

    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request head: {0}")]
    Malformed(#[from] httparse::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The parsed request line and headers of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: String,
    /// Request target as sent by the client.
    pub target: String,
    /// HTTP/1 minor version.
    pub version: u8,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl InboundRequest {
    /// The target in origin form: absolute-form targets lose their scheme
    /// and authority.
    pub fn origin_form(&self) -> &str {
        let target = self.target.as_str();
        let rest = target
            .strip_prefix("http://")
            .or_else(|| target.strip_prefix("https://"));
        match rest {
            Some(rest) => rest.find('/').map_or("/", |i| &rest[i..]),
            None => target,
        }
    }

    /// Path component of the target.
    pub fn path(&self) -> &str {
        let origin = self.origin_form();
        origin.split_once('?').map_or(origin, |(path, _)| path)
    }

    /// Query component of the target, without the `?`.
    pub fn query(&self) -> Option<&str> {
        self.origin_form().split_once('?').map(|(_, query)| query)
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

/// A parsed head plus every byte read from the socket so far.
#[derive(Debug)]
pub struct RequestHead {
    pub request: InboundRequest,
    /// Head bytes followed by whatever arrived after them.
    pub buffered: BytesMut,
    /// Length of the head within `buffered`.
    pub head_len: usize,
}

/// Read and parse one request head from `io`.
pub async fn read_request_head<S>(
    io: &mut S,
    max_head_bytes: usize,
    deadline: Duration,
) -> Result<RequestHead, HeadError>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(deadline, read_head(io, max_head_bytes))
        .await
        .map_err(|_| HeadError::Timeout)?
}

async fn read_head<S>(io: &mut S, max_head_bytes: usize) -> Result<RequestHead, HeadError>
where
    S: AsyncRead + Unpin,
{
    let mut buffered = BytesMut::with_capacity(4096);
    loop {
        if buffered.capacity() - buffered.len() < 1024 {
            buffered.reserve(4096);
        }
        if io.read_buf(&mut buffered).await? == 0 {
            return Err(if buffered.is_empty() {
                HeadError::Closed
            } else {
                HeadError::Truncated
            });
        }

        match parse_head(&buffered)? {
            Some((request, head_len)) if head_len <= max_head_bytes => {
                return Ok(RequestHead {
                    request,
                    buffered,
                    head_len,
                });
            }
            Some(_) => return Err(HeadError::TooLarge(max_head_bytes)),
            None if buffered.len() >= max_head_bytes => {
                return Err(HeadError::TooLarge(max_head_bytes));
            }
            None => {}
        }
    }
}

fn parse_head(buf: &[u8]) -> Result<Option<(InboundRequest, usize)>, HeadError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let request = InboundRequest {
        method: req.method.unwrap_or_default().to_string(),
        target: req.path.unwrap_or_default().to_string(),
        version: req.version.unwrap_or(1),
        headers: req
            .headers
            .iter()
            .map(|h| (h.name.to_string(), h.value.to_vec()))
            .collect(),
    };
    Ok(Some((request, head_len)))
}
