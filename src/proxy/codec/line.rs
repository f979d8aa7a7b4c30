use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::{Headers, ProtocolError, io_with_timeout};

/// Reads one LF-terminated line, charging its length against `budget`.
///
/// Returns `Ok(None)` when the stream ends before any byte of the line was
/// read. A stream that ends part-way through a line is an error.
pub(super) async fn read_line<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    timeout_dur: Duration,
    budget: &mut usize,
    limit: usize,
) -> Result<Option<String>, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut collected = Vec::new();

    loop {
        let available = io_with_timeout(timeout_dur, reader.fill_buf(), || {
            format!("reading line from {peer}")
        })
        .await?;

        if available.is_empty() {
            if collected.is_empty() {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated("line"));
        }

        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());

        if consume > *budget {
            return Err(ProtocolError::HeadersTooLarge { peer, limit });
        }
        *budget -= consume;

        collected.extend_from_slice(&available[..consume]);
        reader.consume(consume);

        if newline_pos.is_some() {
            break;
        }
    }

    String::from_utf8(collected)
        .map(Some)
        .map_err(|_| ProtocolError::InvalidUtf8 { peer })
}

/// Reads a message head: the first line plus header lines up to the blank
/// line.
///
/// `Ok(None)` means the head was empty (a blank line arrived before any
/// content). End of stream before any byte is `ProtocolError::NoData`.
pub(super) async fn read_head<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    timeout_dur: Duration,
    max_bytes: usize,
) -> Result<Option<(String, Headers)>, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut budget = max_bytes;
    let mut first_line: Option<String> = None;
    let mut headers = Headers::new();

    loop {
        let Some(line) = read_line(reader, peer, timeout_dur, &mut budget, max_bytes).await? else {
            if first_line.is_none() {
                return Err(ProtocolError::NoData);
            }
            return Err(ProtocolError::Truncated("header block"));
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        match first_line {
            None => first_line = Some(line.to_string()),
            Some(_) => {
                headers.push_line(line);
            }
        }
    }

    Ok(first_line.map(|line| (line, headers)))
}
