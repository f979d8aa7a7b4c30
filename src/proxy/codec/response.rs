use std::net::SocketAddr;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncRead, BufReader};

use super::line::read_head;
use super::request::read_body;
use super::{Headers, ProtocolError, status_text};

pub const HTTP_VERSION: &str = "HTTP/1.0";

/// Whether a response body follows the head on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// Read exactly `Content-Length` bytes after the head.
    Framed,
    /// The response to a HEAD request: the head is the whole message.
    HeadersOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        let code = status.as_u16();
        Self {
            version: HTTP_VERSION.to_string(),
            status: code,
            status_text: status_text(code).to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn build(status: StatusCode, content_type: &str, body: Vec<u8>) -> Self {
        Self::new(status)
            .with_header("Content-Type", content_type)
            .with_body(body)
    }

    /// Plain-text response whose body is the status text.
    pub fn error(status: StatusCode) -> Self {
        let text = status_text(status.as_u16());
        Self::build(status, "text/plain", text.as_bytes().to_vec())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.headers.insert("Content-Length", body.len().to_string());
        self.body = body;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }

    pub fn status_line(&self) -> String {
        format!("{} {} {}", self.version, self.status, self.status_text)
    }

    /// Status line, headers and the terminating blank line. The body is
    /// written separately so HEAD responses can leave it out.
    pub fn encode_head(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(128);
        buffer.extend_from_slice(self.status_line().as_bytes());
        buffer.extend_from_slice(b"\r\n");
        self.headers.encode_into(&mut buffer);
        buffer.extend_from_slice(b"\r\n");
        buffer
    }
}

pub async fn read_response<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    timeout_dur: Duration,
    max_header_bytes: usize,
    max_body_bytes: usize,
    mode: BodyMode,
) -> Result<Response, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let Some((status_line, headers)) =
        read_head(reader, peer, timeout_dur, max_header_bytes).await?
    else {
        return Err(ProtocolError::MissingStatusLine { peer });
    };

    let tokens: Vec<&str> = status_line.split_whitespace().collect();
    let version = tokens.first().copied().unwrap_or(HTTP_VERSION).to_string();
    let status = tokens
        .get(1)
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(0);
    let status_text = tokens.get(2..).map(|rest| rest.join(" ")).unwrap_or_default();

    let body = match mode {
        BodyMode::Framed => {
            read_body(reader, headers.content_length(), peer, timeout_dur, max_body_bytes).await?
        }
        BodyMode::HeadersOnly => Vec::new(),
    };

    Ok(Response {
        version,
        status,
        status_text,
        headers,
        body,
    })
}
