//! Client side of the edge → origin hop: one fresh TCP connection per
//! forwarded request, closed once the response has been read.

use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::cache::CacheKey;
use super::codec::{
    BodyMode, Method, ProtocolError, Response, encode_request_head, io_with_timeout,
    read_response,
};
use super::forward_error::ForwardError;
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct OriginClient {
    addr: String,
    host: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    max_header_bytes: usize,
    max_body_bytes: usize,
}

impl OriginClient {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration, io_timeout: Duration) -> Self {
        let addr = addr.into();
        let host = host_of(&addr).to_string();
        Self {
            addr,
            host,
            connect_timeout,
            io_timeout,
            max_header_bytes: 32 * 1024,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.origin.clone(),
            settings.origin_connect_timeout(),
            settings.origin_timeout(),
        )
        .with_limits(settings.max_header_size, settings.max_body_size)
    }

    pub fn with_limits(mut self, max_header_bytes: usize, max_body_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends `<method> /<key>` with `body` and reads the origin's reply.
    ///
    /// The reply is returned whatever its status; only failures to reach the
    /// origin or to make sense of its bytes are errors.
    pub async fn forward(
        &self,
        method: &Method,
        key: &CacheKey,
        body: &[u8],
    ) -> Result<Response, ForwardError> {
        let stream = self.connect().await?;
        let peer = stream.peer_addr().map_err(|source| self.protocol(ProtocolError::Io {
            context: "resolving origin peer address".to_string(),
            source,
        }))?;
        let mut reader = BufReader::new(stream);

        let target = format!("/{key}");
        let head = encode_request_head(method, &target, &self.host, body.len());
        self.write(reader.get_mut(), &head, "writing request head to origin")
            .await?;
        if !body.is_empty() {
            self.write(reader.get_mut(), body, "writing request body to origin")
                .await?;
        }
        io_with_timeout(self.io_timeout, reader.get_mut().flush(), || {
            "flushing request to origin".to_string()
        })
        .await
        .map_err(|err| self.protocol(err))?;

        let mode = match method {
            Method::Head => BodyMode::HeadersOnly,
            _ => BodyMode::Framed,
        };
        let response = read_response(
            &mut reader,
            peer,
            self.io_timeout,
            self.max_header_bytes,
            self.max_body_bytes,
            mode,
        )
        .await
        .map_err(|err| self.protocol(err))?;

        debug!(
            origin = %self.addr,
            method = %method,
            key = %key,
            status = response.status,
            bytes = response.body.len(),
            "origin responded"
        );
        Ok(response)
    }

    async fn connect(&self) -> Result<TcpStream, ForwardError> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ForwardError::Connect {
                    addr: self.addr.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(ForwardError::ConnectTimeout {
                    addr: self.addr.clone(),
                });
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(origin = %self.addr, error = %err, "failed to set TCP_NODELAY on origin stream");
        }
        Ok(stream)
    }

    async fn write(
        &self,
        stream: &mut TcpStream,
        buf: &[u8],
        context: &'static str,
    ) -> Result<(), ForwardError> {
        io_with_timeout(self.io_timeout, stream.write_all(buf), || context.to_string())
            .await
            .map_err(|err| self.protocol(err))
    }

    fn protocol(&self, source: ProtocolError) -> ForwardError {
        ForwardError::Protocol {
            addr: self.addr.clone(),
            source,
        }
    }
}

/// Host part of a `host:port` pair, without IPv6 brackets.
fn host_of(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    host.trim_start_matches('[').trim_end_matches(']')
}
