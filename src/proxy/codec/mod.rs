//! Framing for the HTTP/1.0-style exchange spoken between clients, the edge
//! and the origin: one head terminated by a blank line, then an optional
//! `Content-Length` delimited body.

mod headers;
mod line;
mod request;
mod response;
mod status;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub use headers::Headers;
pub use request::{Method, Request, encode_request_head, read_body, read_request_head};
pub use response::{BodyMode, HTTP_VERSION, Response, read_response};
pub use status::status_text;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the stream before sending a single byte.
    #[error("connection closed before any data was received")]
    NoData,
    #[error("connection closed while reading {0}")]
    Truncated(&'static str),
    #[error("timed out {0}")]
    Timeout(String),
    #[error("failed while {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("line from {peer} contained invalid bytes")]
    InvalidUtf8 { peer: SocketAddr },
    #[error("header block from {peer} exceeds configured limit of {limit} bytes")]
    HeadersTooLarge { peer: SocketAddr, limit: usize },
    #[error("body of {length} bytes exceeds configured limit of {limit} bytes")]
    BodyTooLarge { length: u64, limit: usize },
    #[error("response from {peer} is missing a status line")]
    MissingStatusLine { peer: SocketAddr },
}

impl ProtocolError {
    pub fn is_no_data(&self) -> bool {
        matches!(self, ProtocolError::NoData)
    }
}

pub(crate) async fn io_with_timeout<F, T>(
    duration: Duration,
    future: F,
    context: impl Fn() -> String,
) -> Result<T, ProtocolError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ProtocolError::Io {
            context: context(),
            source,
        }),
        Err(_) => Err(ProtocolError::Timeout(context())),
    }
}

#[cfg(feature = "fuzzing")]
pub mod fuzzing {
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::io::{AsyncRead, BufReader};

    use super::BodyMode;

    pub async fn parse_request_head<S>(
        reader: &mut BufReader<S>,
        peer: SocketAddr,
        timeout: Duration,
        max_header_bytes: usize,
    ) where
        S: AsyncRead + Unpin,
    {
        if let Ok(Some(request)) =
            super::read_request_head(reader, peer, timeout, max_header_bytes).await
        {
            let _ = request.content_length();
            let _ = crate::proxy::cache::CacheKey::from_path(&request.path);
        }
    }

    pub async fn parse_response<S>(
        reader: &mut BufReader<S>,
        peer: SocketAddr,
        timeout: Duration,
        max_header_bytes: usize,
        max_body_bytes: usize,
    ) where
        S: AsyncRead + Unpin,
    {
        if let Ok(response) = super::read_response(
            reader,
            peer,
            timeout,
            max_header_bytes,
            max_body_bytes,
            BodyMode::Framed,
        )
        .await
        {
            let _ = response.encode_head();
        }
    }
}
