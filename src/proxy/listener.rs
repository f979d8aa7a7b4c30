use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use super::{AppContext, dispatch};

pub async fn start_listener(app: AppContext) -> Result<()> {
    let listener = bind(app.settings.listen, "edge").await?;
    serve(listener, app).await
}

pub async fn bind(addr: SocketAddr, role: &'static str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {role} listener on {addr}"))?;
    let local_addr = listener.local_addr().unwrap_or(addr);
    info!(address = %local_addr, role, "listener started");
    Ok(listener)
}

/// Runs the edge accept loop on an already bound listener.
pub async fn serve(listener: TcpListener, app: AppContext) -> Result<()> {
    accept_loop(listener, "edge", move |stream, peer| {
        dispatch::handle_connection(stream, peer, app.clone())
    })
    .await
}

/// Accepts connections forever, running `handler` for each one on its own
/// task. Accept failures and per-connection errors are logged and never stop
/// the loop.
pub async fn accept_loop<H, Fut>(listener: TcpListener, role: &'static str, handler: H) -> Result<()>
where
    H: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(role, error = %err, "failed to accept incoming connection");
                continue;
            }
        };
        debug!(peer = %peer_addr, role, "accepted connection");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer_addr, error = %err, "failed to set TCP_NODELAY on downstream stream");
        }
        let connection = handler(stream, peer_addr);
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(peer = %peer_addr, role, error = ?err, "connection closed with error");
            }
        });
    }
}
