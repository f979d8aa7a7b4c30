use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;

use edgecache::{
    cli::LogFormat,
    origin::{self, OriginContext, Storage},
    proxy::{self, AppContext, cache::CacheStore, origin::OriginClient},
    settings::Settings,
};

use super::dirs::TestDirs;
use super::net::{find_free_port, wait_for_listener};

pub fn test_settings(listen: SocketAddr, origin: SocketAddr, dirs: &TestDirs) -> Settings {
    Settings {
        listen,
        origin: origin.to_string(),
        origin_listen: origin,
        cache_dir: dirs.cache_dir.clone(),
        storage_dir: dirs.storage_dir.clone(),
        cache_capacity: 5,
        log: LogFormat::Text,
        client_timeout: 5,
        origin_connect_timeout: 2,
        origin_timeout: 5,
        max_header_size: 8 * 1024,
        max_body_size: 1024 * 1024,
        metrics_listen: None,
    }
}

pub struct EdgeHarness {
    pub dirs: TestDirs,
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    pub cache: CacheStore,
    handle: JoinHandle<()>,
}

impl EdgeHarness {
    /// Stops the edge and hands back its directories so a new edge can be
    /// started over the same cache.
    pub async fn shutdown(self) -> TestDirs {
        self.handle.abort();
        let _ = self.handle.await;
        self.dirs
    }
}

pub struct EdgeHarnessBuilder {
    dirs: TestDirs,
    origin: SocketAddr,
    settings_override: Option<Box<dyn FnOnce(&mut Settings) + Send>>,
}

impl EdgeHarnessBuilder {
    pub fn new(origin: SocketAddr) -> Result<Self> {
        Ok(Self::with_dirs(TestDirs::new()?, origin))
    }

    pub fn with_dirs(dirs: TestDirs, origin: SocketAddr) -> Self {
        Self {
            dirs,
            origin,
            settings_override: None,
        }
    }

    pub fn with_settings<F>(mut self, func: F) -> Self
    where
        F: FnOnce(&mut Settings) + Send + 'static,
    {
        self.settings_override = Some(Box::new(func));
        self
    }

    pub async fn spawn(mut self) -> Result<EdgeHarness> {
        let port = find_free_port()?;
        let listen: SocketAddr = format!("127.0.0.1:{port}").parse()?;

        let mut settings = test_settings(listen, self.origin, &self.dirs);
        if let Some(override_fn) = self.settings_override.take() {
            override_fn(&mut settings);
        }
        let addr = settings.listen;
        let settings = Arc::new(settings);

        let cache = CacheStore::open(settings.cache_dir.clone(), settings.cache_capacity).await?;
        let client = OriginClient::from_settings(&settings);
        let app = AppContext::new(settings.clone(), cache.clone(), client);

        let handle = tokio::spawn(async move {
            if let Err(err) = proxy::run(app).await {
                tracing::error!(error = ?err, "edge run failed");
            }
        });

        wait_for_listener(addr).await?;

        Ok(EdgeHarness {
            dirs: self.dirs,
            addr,
            settings,
            cache,
            handle,
        })
    }
}

/// The real origin role serving `storage_dir`.
pub struct OriginHarness {
    pub addr: SocketAddr,
    pub storage: Storage,
    handle: JoinHandle<()>,
}

impl OriginHarness {
    pub async fn spawn(dirs: &TestDirs) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let settings = Arc::new(test_settings(addr, addr, dirs));
        let storage = Storage::open(dirs.storage_dir.clone()).await?;
        let ctx = OriginContext::new(settings, storage.clone());

        let handle = tokio::spawn(async move {
            if let Err(err) = origin::serve(listener, ctx).await {
                tracing::error!(error = ?err, "origin run failed");
            }
        });

        Ok(Self {
            addr,
            storage,
            handle,
        })
    }
}

impl Drop for OriginHarness {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
