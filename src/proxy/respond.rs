use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::codec::Response;
use crate::io_util::{flush_with_timeout, write_all_with_timeout};
use crate::logging::AccessLogBuilder;
use crate::util::timeout_with_context;

/// Writes the response, closes the write side and emits the access log line.
/// A failed write is still logged, with the error attached.
pub async fn respond_with_access_log<S>(
    stream: &mut S,
    response: &Response,
    include_body: bool,
    timeout_dur: Duration,
    bytes_in: u64,
    started: Instant,
    log_builder: AccessLogBuilder,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let result = async {
        let written = send_response(stream, response, include_body, timeout_dur).await?;
        shutdown_stream(stream, timeout_dur).await?;
        Ok::<_, anyhow::Error>(written)
    }
    .await;

    let log_builder = log_builder.status(response.status);
    match result {
        Ok(bytes_out) => {
            log_builder
                .bytes(bytes_in, bytes_out as u64)
                .elapsed(started.elapsed())
                .log();
            Ok(())
        }
        Err(err) => {
            log_builder
                .bytes(bytes_in, 0)
                .elapsed(started.elapsed())
                .error_reason("client_write_failed")
                .error_detail(format!("{err:#}"))
                .log();
            Err(err)
        }
    }
}

/// Writes the head and, unless this answers a HEAD request, the body.
/// Returns the number of bytes written.
pub async fn send_response<S>(
    stream: &mut S,
    response: &Response,
    include_body: bool,
    timeout_dur: Duration,
) -> Result<usize>
where
    S: AsyncWrite + Unpin,
{
    let head = response.encode_head();
    write_all_with_timeout(stream, &head, timeout_dur, "writing response head").await?;
    let mut written = head.len();
    if include_body && !response.body.is_empty() {
        write_all_with_timeout(stream, &response.body, timeout_dur, "writing response body")
            .await?;
        written += response.body.len();
    }
    flush_with_timeout(stream, timeout_dur, "flushing response").await?;
    Ok(written)
}

pub async fn shutdown_stream<S>(stream: &mut S, timeout_dur: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(
        timeout_dur,
        stream.shutdown(),
        "shutting down client stream",
    )
    .await
}
