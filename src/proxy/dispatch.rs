//! Per-connection request handling for the edge: read one request, answer it
//! from the cache or the origin, write one response and close.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::AppContext;
use super::cache::CacheKey;
use super::codec::{Method, ProtocolError, Request, Response, read_body, read_request_head};
use super::forward_error::{ForwardError, log_forward_error};
use super::mime::{DEFAULT_CONTENT_TYPE, content_type_for};
use super::respond::respond_with_access_log;
use crate::logging::{AccessLogBuilder, CacheLookup};
use crate::metrics;

/// What the edge decided to send back, plus what the access log should say
/// about it.
struct Outcome {
    response: Response,
    bytes_in: u64,
    log: AccessLogBuilder,
}

impl Outcome {
    fn new(response: Response, log: AccessLogBuilder) -> Self {
        Self {
            response,
            bytes_in: 0,
            log,
        }
    }

    fn error(status: StatusCode, log: AccessLogBuilder) -> Self {
        Self::new(Response::error(status), log)
    }

    fn bytes_in(mut self, bytes: u64) -> Self {
        self.bytes_in = bytes;
        self
    }
}

pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, app: AppContext) -> Result<()> {
    handle_stream(stream, peer, app).await
}

pub async fn handle_stream<S>(stream: S, peer: SocketAddr, app: AppContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let client_timeout = app.settings.client_timeout();
    let mut reader = BufReader::new(stream);
    let log = AccessLogBuilder::new(peer);

    let request = match read_request_head(
        &mut reader,
        peer,
        client_timeout,
        app.settings.max_header_size,
    )
    .await
    {
        Ok(Some(request)) => request,
        Ok(None) => {
            debug!(peer = %peer, "malformed request line");
            let outcome = Outcome::error(
                StatusCode::BAD_REQUEST,
                log.error_reason("malformed_request"),
            );
            return finish(&mut reader, outcome, true, client_timeout, started).await;
        }
        Err(ProtocolError::NoData) => {
            debug!(peer = %peer, "client closed connection without sending a request");
            return Ok(());
        }
        Err(err) => {
            debug!(peer = %peer, error = %err, "failed to read request");
            let outcome = Outcome::error(
                StatusCode::BAD_REQUEST,
                log.error_reason("malformed_request")
                    .error_detail(err.to_string()),
            );
            return finish(&mut reader, outcome, true, client_timeout, started).await;
        }
    };

    let include_body = request.method != Method::Head;
    let log = log
        .method(request.method.as_str())
        .path(request.path.as_str());
    let outcome = route(&app, peer, &mut reader, &request, log).await;
    finish(&mut reader, outcome, include_body, client_timeout, started).await
}

async fn route<S>(
    app: &AppContext,
    peer: SocketAddr,
    reader: &mut BufReader<S>,
    request: &Request,
    log: AccessLogBuilder,
) -> Outcome
where
    S: AsyncRead + Unpin,
{
    if let Method::Other(method) = &request.method {
        debug!(peer = %peer, method = %method, "unsupported method");
        return Outcome::error(
            StatusCode::METHOD_NOT_ALLOWED,
            log.cache_lookup(CacheLookup::Bypass)
                .error_reason("method_not_allowed"),
        );
    }

    let Some(key) = CacheKey::from_path(&request.path) else {
        debug!(peer = %peer, path = %request.path, "request path has no usable file name");
        return Outcome::error(StatusCode::BAD_REQUEST, log.error_reason("invalid_key"));
    };
    let log = log.key(key.as_str());

    match request.method {
        Method::Get => serve_get(app, peer, key, log).await,
        Method::Head => serve_head(app, peer, key, log).await,
        _ => forward_write(app, peer, reader, request, key, log).await,
    }
}

async fn serve_get(
    app: &AppContext,
    peer: SocketAddr,
    key: CacheKey,
    log: AccessLogBuilder,
) -> Outcome {
    match app.cache.lookup(&key).await {
        Ok(Some(data)) => {
            metrics::record_cache_lookup(CacheLookup::Hit.as_str());
            let response = Response::build(StatusCode::OK, content_type_for(key.as_str()), data);
            Outcome::new(response, log.cache_lookup(CacheLookup::Hit))
        }
        Ok(None) => {
            metrics::record_cache_lookup(CacheLookup::Miss.as_str());
            fetch_and_store(app, peer, key, log.cache_lookup(CacheLookup::Miss)).await
        }
        Err(err) => {
            warn!(peer = %peer, key = %key, error = ?err, "failed to read cache entry");
            Outcome::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                log.cache_lookup(CacheLookup::Hit)
                    .error_reason("cache_read_failed")
                    .error_detail(format!("{err:#}")),
            )
        }
    }
}

/// Cache miss: fetch from the origin, keep a copy when the origin answered
/// 200, and relay whatever it said.
async fn fetch_and_store(
    app: &AppContext,
    peer: SocketAddr,
    key: CacheKey,
    log: AccessLogBuilder,
) -> Outcome {
    let log = log.origin_addr(app.origin.addr());
    let response = match app.origin.forward(&Method::Get, &key, &[]).await {
        Ok(response) => response,
        Err(err) => return origin_failure(peer, &key, err, log),
    };

    let log = if response.is_ok() {
        match app.cache.add(&key, &response.body).await {
            Ok(()) => {
                metrics::record_cache_store();
                log.cache_store("stored")
            }
            Err(err) => {
                metrics::record_cache_store_error();
                warn!(peer = %peer, key = %key, error = ?err, "failed to store origin response in cache");
                log.cache_store("store_failed")
            }
        }
    } else {
        log.cache_store("skipped")
    };
    Outcome::new(relay(response), log)
}

async fn serve_head(
    app: &AppContext,
    peer: SocketAddr,
    key: CacheKey,
    log: AccessLogBuilder,
) -> Outcome {
    match app.cache.content_length(&key).await {
        Ok(Some(length)) => {
            metrics::record_cache_lookup(CacheLookup::Hit.as_str());
            let response = Response::new(StatusCode::OK)
                .with_header("Content-Type", content_type_for(key.as_str()))
                .with_header("Content-Length", length.to_string());
            Outcome::new(response, log.cache_lookup(CacheLookup::Hit))
        }
        Ok(None) => {
            metrics::record_cache_lookup(CacheLookup::Miss.as_str());
            let log = log
                .cache_lookup(CacheLookup::Miss)
                .origin_addr(app.origin.addr());
            match app.origin.forward(&Method::Head, &key, &[]).await {
                Ok(response) => Outcome::new(relay(response), log),
                Err(err) => origin_failure(peer, &key, err, log),
            }
        }
        Err(err) => {
            warn!(peer = %peer, key = %key, error = ?err, "failed to stat cache entry");
            Outcome::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                log.cache_lookup(CacheLookup::Hit)
                    .error_reason("cache_read_failed")
                    .error_detail(format!("{err:#}")),
            )
        }
    }
}

/// POST and PUT: pass the body through to the origin and drop the cached
/// copy once the origin has accepted the write.
async fn forward_write<S>(
    app: &AppContext,
    peer: SocketAddr,
    reader: &mut BufReader<S>,
    request: &Request,
    key: CacheKey,
    log: AccessLogBuilder,
) -> Outcome
where
    S: AsyncRead + Unpin,
{
    let log = log.cache_lookup(CacheLookup::Bypass);
    let body = match read_body(
        reader,
        request.content_length(),
        peer,
        app.settings.client_timeout(),
        app.settings.max_body_size,
    )
    .await
    {
        Ok(body) => body,
        Err(err) => {
            debug!(peer = %peer, key = %key, error = %err, "failed to read request body");
            return Outcome::error(
                StatusCode::BAD_REQUEST,
                log.error_reason("invalid_body")
                    .error_detail(err.to_string()),
            );
        }
    };
    let bytes_in = body.len() as u64;

    let log = log.origin_addr(app.origin.addr());
    let response = match app.origin.forward(&request.method, &key, &body).await {
        Ok(response) => response,
        Err(err) => return origin_failure(peer, &key, err, log).bytes_in(bytes_in),
    };

    let log = if response.is_ok() {
        match app.cache.remove(&key).await {
            Ok(()) => log.cache_store("invalidated"),
            Err(err) => {
                warn!(peer = %peer, key = %key, error = ?err, "failed to invalidate cache entry");
                log.cache_store("invalidate_failed")
            }
        }
    } else {
        log
    };
    Outcome::new(relay(response), log).bytes_in(bytes_in)
}

fn origin_failure(
    peer: SocketAddr,
    key: &CacheKey,
    err: ForwardError,
    log: AccessLogBuilder,
) -> Outcome {
    log_forward_error(peer, key.as_str(), &err);
    Outcome::error(
        StatusCode::BAD_GATEWAY,
        log.error_reason(format!("origin_{}", err.kind().as_label()))
            .error_detail(err.to_string()),
    )
}

/// Passes the origin's status, headers and body through, filling in the
/// framing headers every edge response carries when the origin left them out.
/// A HEAD reply has no body, so a missing length becomes 0.
fn relay(mut response: Response) -> Response {
    if !response.headers.contains_ignore_case("Content-Type") {
        response.headers.insert("Content-Type", DEFAULT_CONTENT_TYPE);
    }
    if !response.headers.contains_ignore_case("Content-Length") {
        let length = response.body.len();
        response.headers.insert("Content-Length", length.to_string());
    }
    response
}

async fn finish<S>(
    reader: &mut BufReader<S>,
    outcome: Outcome,
    include_body: bool,
    timeout_dur: Duration,
    started: Instant,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    respond_with_access_log(
        reader.get_mut(),
        &outcome.response,
        include_body,
        timeout_dur,
        outcome.bytes_in,
        started,
        outcome.log,
    )
    .await
}
