pub mod cache;
pub mod codec;
pub mod dispatch;
pub mod forward_error;
pub mod listener;
pub mod mime;
pub mod origin;
pub mod respond;

use anyhow::Result;
use std::sync::Arc;

use crate::settings::Settings;
use cache::CacheStore;
use origin::OriginClient;

/// Shared state handed to every edge connection.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub cache: CacheStore,
    pub origin: OriginClient,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, cache: CacheStore, origin: OriginClient) -> Self {
        Self {
            settings,
            cache,
            origin,
        }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}

/// Edge context backed by a cache in `dir` and an origin address nothing
/// listens on.
#[cfg(test)]
pub(crate) async fn test_context(dir: &std::path::Path) -> AppContext {
    use crate::cli::LogFormat;

    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let origin = closed.local_addr().unwrap().to_string();
    drop(closed);

    let settings = Settings {
        listen: "127.0.0.1:0".parse().unwrap(),
        origin,
        origin_listen: "127.0.0.1:0".parse().unwrap(),
        cache_dir: dir.to_path_buf(),
        storage_dir: dir.join("storage"),
        cache_capacity: 5,
        log: LogFormat::Text,
        client_timeout: 2,
        origin_connect_timeout: 1,
        origin_timeout: 2,
        max_header_size: 4096,
        max_body_size: 1024 * 1024,
        metrics_listen: None,
    };
    let cache = CacheStore::open(settings.cache_dir.clone(), settings.cache_capacity)
        .await
        .unwrap();
    let origin = OriginClient::from_settings(&settings);
    AppContext::new(Arc::new(settings), cache, origin)
}
