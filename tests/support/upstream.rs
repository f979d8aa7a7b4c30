use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone, Copy)]
enum OriginBehavior {
    /// Answers from an in-memory file map, like the real origin.
    Files,
    /// Accepts and immediately closes every connection.
    Close,
}

#[derive(Default)]
struct OriginState {
    files: HashMap<String, Vec<u8>>,
    requests: Vec<String>,
}

/// Origin double that records every request line it receives.
pub struct MockOrigin {
    addr: SocketAddr,
    state: Arc<Mutex<OriginState>>,
    handle: JoinHandle<()>,
}

impl MockOrigin {
    pub async fn start() -> Result<Self> {
        Self::spawn(OriginBehavior::Files).await
    }

    pub async fn with_files<D: AsRef<[u8]>>(files: &[(&str, D)]) -> Result<Self> {
        let origin = Self::start().await?;
        for (name, data) in files {
            origin.set_file(name, data.as_ref());
        }
        Ok(origin)
    }

    pub async fn closing() -> Result<Self> {
        Self::spawn(OriginBehavior::Close).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn set_file(&self, name: &str, data: &[u8]) {
        self.lock().files.insert(name.to_string(), data.to_vec());
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().files.get(name).cloned()
    }

    /// Request lines seen so far, e.g. `GET /a.txt HTTP/1.0`.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OriginState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    async fn spawn(behavior: OriginBehavior) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(OriginState::default()));
        let shared = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let state = shared.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, behavior, state).await;
                });
            }
        });
        Ok(Self {
            addr,
            state,
            handle,
        })
    }
}

impl Drop for MockOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    behavior: OriginBehavior,
    state: Arc<Mutex<OriginState>>,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    if let OriginBehavior::Close = behavior {
        reader.get_mut().shutdown().await.ok();
        return Ok(());
    }

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(());
    }
    let request_line = request_line.trim().to_string();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse()?;
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let name = parts
        .next()
        .and_then(|path| path.rsplit('/').next())
        .ok_or_else(|| anyhow!("request line without a path"))?
        .to_string();

    let (head, payload) = {
        let mut state = state.lock().unwrap_or_else(|err| err.into_inner());
        state.requests.push(request_line.clone());
        match method.as_str() {
            "GET" | "HEAD" => match state.files.get(&name) {
                Some(data) => (
                    format!(
                        "HTTP/1.0 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
                        data.len()
                    ),
                    if method == "GET" { data.clone() } else { Vec::new() },
                ),
                None => (
                    "HTTP/1.0 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 9\r\n\r\n"
                        .to_string(),
                    if method == "GET" { b"Not Found".to_vec() } else { Vec::new() },
                ),
            },
            "POST" | "PUT" => {
                state.files.insert(name.clone(), body);
                let message = format!("Updated: {name}");
                (
                    format!(
                        "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
                        message.len()
                    ),
                    message.into_bytes(),
                )
            }
            _ => (
                "HTTP/1.0 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n".to_string(),
                Vec::new(),
            ),
        }
    };

    let stream = reader.get_mut();
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.shutdown().await.ok();
    Ok(())
}
