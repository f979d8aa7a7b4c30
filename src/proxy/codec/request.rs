use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::debug;

use super::line::read_head;
use super::{Headers, ProtocolError, io_with_timeout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Other(String),
}

impl Method {
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Other(other) => other,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Raw request target; not sanitized.
    pub path: String,
    pub headers: Headers,
}

impl Request {
    pub fn content_length(&self) -> u64 {
        self.headers.content_length()
    }
}

/// Reads a request head.
///
/// Returns `Ok(None)` when the request line has fewer than three tokens (or
/// the head is empty). The version token is accepted without validation.
pub async fn read_request_head<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    timeout_dur: Duration,
    max_header_bytes: usize,
) -> Result<Option<Request>, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let Some((request_line, headers)) =
        read_head(reader, peer, timeout_dur, max_header_bytes).await?
    else {
        debug!(peer = %peer, "empty request head");
        return Ok(None);
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path), Some(_version)) = (parts.next(), parts.next(), parts.next())
    else {
        debug!(peer = %peer, line = %request_line, "malformed request line");
        return Ok(None);
    };

    Ok(Some(Request {
        method: Method::parse(method),
        path: path.to_string(),
        headers,
    }))
}

/// Reads exactly `length` body bytes, failing if the stream ends early.
pub async fn read_body<S>(
    reader: &mut BufReader<S>,
    length: u64,
    peer: SocketAddr,
    timeout_dur: Duration,
    max_bytes: usize,
) -> Result<Vec<u8>, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let too_large = ProtocolError::BodyTooLarge {
        length,
        limit: max_bytes,
    };
    let Ok(length) = usize::try_from(length) else {
        return Err(too_large);
    };
    if length > max_bytes {
        return Err(too_large);
    }

    let mut body = vec![0u8; length];
    let mut filled = 0usize;
    while filled < length {
        let read = io_with_timeout(timeout_dur, reader.read(&mut body[filled..]), || {
            format!("reading body from {peer}")
        })
        .await?;
        if read == 0 {
            return Err(ProtocolError::Truncated("body"));
        }
        filled += read;
    }
    Ok(body)
}

/// Encodes the head of a request forwarded to the origin.
pub fn encode_request_head(method: &Method, target: &str, host: &str, content_length: usize) -> Vec<u8> {
    format!(
        "{method} {target} HTTP/1.0\r\nHost: {host}\r\nContent-Length: {content_length}\r\n\r\n"
    )
    .into_bytes()
}
