//! The origin role: a flat file store speaking the same framing as the edge.
//! It is the authority the edge forwards misses and writes to.

mod storage;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::logging::AccessLogBuilder;
use crate::proxy::cache::CacheKey;
use crate::proxy::codec::{Method, ProtocolError, Request, Response, read_body, read_request_head};
use crate::proxy::listener::{accept_loop, bind};
use crate::proxy::mime::content_type_for;
use crate::proxy::respond::respond_with_access_log;
use crate::settings::Settings;

pub use storage::Storage;

#[derive(Clone)]
pub struct OriginContext {
    pub settings: Arc<Settings>,
    pub storage: Storage,
}

impl OriginContext {
    pub fn new(settings: Arc<Settings>, storage: Storage) -> Self {
        Self { settings, storage }
    }
}

pub async fn run(settings: Arc<Settings>) -> Result<()> {
    let storage = Storage::open(settings.storage_dir.clone()).await?;
    info!(dir = %storage.dir().display(), "origin storage ready");
    let listener = bind(settings.origin_listen, "origin").await?;
    serve(listener, OriginContext::new(settings, storage)).await
}

pub async fn serve(listener: TcpListener, ctx: OriginContext) -> Result<()> {
    accept_loop(listener, "origin", move |stream, peer| {
        handle_stream(stream, peer, ctx.clone())
    })
    .await
}

pub async fn handle_stream<S>(stream: S, peer: SocketAddr, ctx: OriginContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let timeout_dur = ctx.settings.client_timeout();
    let mut reader = BufReader::new(stream);
    let log = AccessLogBuilder::new(peer);

    let request = match read_request_head(
        &mut reader,
        peer,
        timeout_dur,
        ctx.settings.max_header_size,
    )
    .await
    {
        Ok(Some(request)) => request,
        Ok(None) => {
            let response = Response::error(StatusCode::BAD_REQUEST);
            let log = log.error_reason("malformed_request");
            return respond_with_access_log(
                reader.get_mut(),
                &response,
                true,
                timeout_dur,
                0,
                started,
                log,
            )
            .await;
        }
        Err(ProtocolError::NoData) => {
            debug!(peer = %peer, "client closed connection without sending a request");
            return Ok(());
        }
        Err(err) => {
            debug!(peer = %peer, error = %err, "failed to read request");
            let response = Response::error(StatusCode::BAD_REQUEST);
            let log = log
                .error_reason("malformed_request")
                .error_detail(err.to_string());
            return respond_with_access_log(
                reader.get_mut(),
                &response,
                true,
                timeout_dur,
                0,
                started,
                log,
            )
            .await;
        }
    };

    let include_body = request.method != Method::Head;
    let log = log
        .method(request.method.as_str())
        .path(request.path.as_str());
    let (response, bytes_in, log) = answer(&ctx, peer, &mut reader, &request, log).await;
    respond_with_access_log(
        reader.get_mut(),
        &response,
        include_body,
        timeout_dur,
        bytes_in,
        started,
        log,
    )
    .await
}

async fn answer<S>(
    ctx: &OriginContext,
    peer: SocketAddr,
    reader: &mut BufReader<S>,
    request: &Request,
    log: AccessLogBuilder,
) -> (Response, u64, AccessLogBuilder)
where
    S: AsyncRead + Unpin,
{
    if matches!(request.method, Method::Other(_)) {
        let log = log.error_reason("method_not_allowed");
        return (Response::error(StatusCode::METHOD_NOT_ALLOWED), 0, log);
    }
    let Some(key) = CacheKey::from_path(&request.path) else {
        let log = log.error_reason("invalid_key");
        return (Response::error(StatusCode::BAD_REQUEST), 0, log);
    };
    let log = log.key(key.as_str());
    let storage = &ctx.storage;

    match request.method {
        Method::Get => match storage.read(&key).await {
            Ok(data) => {
                let response =
                    Response::build(StatusCode::OK, content_type_for(key.as_str()), data);
                (response, 0, log)
            }
            Err(err) => (io_failure(peer, &key, &err), 0, log),
        },
        Method::Head => match storage.size(&key).await {
            Ok(size) => {
                let response = Response::new(StatusCode::OK)
                    .with_header("Content-Type", content_type_for(key.as_str()))
                    .with_header("Content-Length", size.to_string());
                (response, 0, log)
            }
            Err(err) => (io_failure(peer, &key, &err), 0, log),
        },
        _ => {
            let body = match read_body(
                reader,
                request.content_length(),
                peer,
                ctx.settings.client_timeout(),
                ctx.settings.max_body_size,
            )
            .await
            {
                Ok(body) => body,
                Err(err) => {
                    debug!(peer = %peer, key = %key, error = %err, "failed to read request body");
                    let log = log
                        .error_reason("invalid_body")
                        .error_detail(err.to_string());
                    return (Response::error(StatusCode::BAD_REQUEST), 0, log);
                }
            };
            let bytes_in = body.len() as u64;
            let response = if request.method == Method::Post {
                create(storage, peer, &key, &body).await
            } else {
                replace(storage, peer, &key, &body).await
            };
            (response, bytes_in, log)
        }
    }
}

async fn create(storage: &Storage, peer: SocketAddr, key: &CacheKey, body: &[u8]) -> Response {
    match storage.create(key, body).await {
        Ok(true) => {
            info!(peer = %peer, key = %key, bytes = body.len(), "file created");
            text(StatusCode::OK, format!("Created: {key}"))
        }
        Ok(false) => text(StatusCode::BAD_REQUEST, "Error: File already exists".to_string()),
        Err(err) => io_failure(peer, key, &err),
    }
}

async fn replace(storage: &Storage, peer: SocketAddr, key: &CacheKey, body: &[u8]) -> Response {
    match storage.put(key, body).await {
        Ok(()) => {
            info!(peer = %peer, key = %key, bytes = body.len(), "file updated");
            text(StatusCode::OK, format!("Updated: {key}"))
        }
        Err(err) => io_failure(peer, key, &err),
    }
}

fn text(status: StatusCode, message: String) -> Response {
    Response::build(status, "text/plain", message.into_bytes())
}

fn io_failure(peer: SocketAddr, key: &CacheKey, err: &io::Error) -> Response {
    if err.kind() == io::ErrorKind::NotFound {
        return Response::error(StatusCode::NOT_FOUND);
    }
    warn!(peer = %peer, key = %key, error = %err, "storage operation failed");
    Response::error(StatusCode::INTERNAL_SERVER_ERROR)
}
