pub mod cli;
pub mod io_util;
pub mod logging;
pub mod metrics;
pub mod origin;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::Result;

use crate::{
    cli::Command,
    proxy::{cache::CacheStore, origin::OriginClient},
    settings::Settings,
};

pub async fn run(settings: Settings, command: Command) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        tokio::spawn(async move {
            tracing::info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = crate::metrics::serve(addr).await {
                tracing::error!(error = %err, "metrics endpoint failed");
            }
        });
    }

    match command {
        Command::Edge => run_edge(settings).await,
        Command::Origin => origin::run(settings).await,
    }
}

pub async fn run_edge(settings: Arc<Settings>) -> Result<()> {
    let cache = CacheStore::open(settings.cache_dir.clone(), settings.cache_capacity).await?;
    let origin = OriginClient::from_settings(&settings);
    tracing::info!(origin = %origin.addr(), "forwarding cache misses to origin");
    let app = proxy::AppContext::new(settings, cache, origin);
    proxy::run(app).await
}
