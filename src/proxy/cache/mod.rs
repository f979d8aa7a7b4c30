//! Bounded FIFO cache of origin files, persisted one file per key.
//!
//! The queue, the presence set and the files they describe are only touched
//! while holding the store's single lock, so concurrent connections always
//! observe a queue and presence set that agree.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, ensure};
use tokio::sync::Mutex;
use tokio::{fs as async_fs, task};
use tracing::{debug, info, trace, warn};

mod index;
mod key;
mod store;

use index::{Admission, FifoIndex};
pub use key::{CacheKey, MANIFEST_FILE, MARKER_FILE};
use store::CacheDisk;

#[derive(Clone)]
pub struct CacheStore {
    state: Arc<CacheState>,
}

#[derive(Debug)]
struct CacheState {
    index: Mutex<FifoIndex>,
    disk: CacheDisk,
}

impl CacheStore {
    /// Opens the cache directory, creating it if needed, and restores the
    /// FIFO queue from the files already present.
    pub async fn open(dir: PathBuf, capacity: usize) -> Result<Self> {
        ensure!(capacity > 0, "cache capacity must be greater than zero");
        async_fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create cache dir {}", dir.display()))?;

        let disk = CacheDisk::new(dir);
        let (disk, scanned) = task::spawn_blocking(move || {
            let scanned = disk.scan();
            (disk, scanned)
        })
        .await
        .map_err(|err| anyhow!("cache rebuild task failed: {err}"))?;
        let scanned = scanned?;

        let mut index = FifoIndex::new(capacity);
        let overflow = scanned.len().saturating_sub(capacity);
        for (position, key) in scanned.into_iter().enumerate() {
            if position < overflow {
                debug!(key = %key, "evicting restored entry beyond capacity");
                disk.remove(&key).await?;
                continue;
            }
            index.admit(&key);
        }
        disk.write_manifest(index.keys()).await?;
        crate::metrics::set_cache_entries(index.len());
        info!(
            dir = %disk.dir().display(),
            entries = index.len(),
            capacity,
            "cache restored"
        );

        Ok(Self {
            state: Arc::new(CacheState {
                index: Mutex::new(index),
                disk,
            }),
        })
    }

    pub async fn has(&self, key: &CacheKey) -> bool {
        self.state.index.lock().await.contains(key)
    }

    /// Reads a cached entry. Only meaningful after `has` returned true.
    pub async fn get(&self, key: &CacheKey) -> Result<Vec<u8>> {
        let _index = self.state.index.lock().await;
        self.read_entry(key).await
    }

    /// `has` and `get` under one lock acquisition.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let index = self.state.index.lock().await;
        if !index.contains(key) {
            return Ok(None);
        }
        self.read_entry(key).await.map(Some)
    }

    /// Size of the cached file, if the key is present.
    pub async fn content_length(&self, key: &CacheKey) -> Result<Option<u64>> {
        let index = self.state.index.lock().await;
        if !index.contains(key) {
            return Ok(None);
        }
        let path = self.state.disk.entry_path(key);
        self.state
            .disk
            .content_length(key)
            .await
            .map(Some)
            .with_context(|| format!("failed to stat cache file {}", path.display()))
    }

    /// Stores `data` under `key`.
    ///
    /// A present key only has its content replaced. A new key evicts the
    /// oldest entry first when the cache is full, then joins the back of the
    /// queue.
    pub async fn add(&self, key: &CacheKey, data: &[u8]) -> Result<()> {
        let mut index = self.state.index.lock().await;
        let disk = &self.state.disk;

        disk.write(key, data).await?;
        match index.admit(key) {
            Admission::Present => {
                trace!(key = %key, bytes = data.len(), "cache entry overwritten in place");
                return Ok(());
            }
            Admission::Inserted { evicted } => {
                if let Some(evicted) = evicted {
                    crate::metrics::record_cache_eviction();
                    debug!(key = %evicted, "evicted oldest cache entry");
                    if let Err(err) = disk.remove(&evicted).await {
                        warn!(key = %evicted, error = ?err, "failed to delete evicted cache file");
                    }
                }
            }
        }

        if let Err(err) = disk.write_manifest(index.keys()).await {
            warn!(error = ?err, "failed to persist cache order");
        }
        crate::metrics::set_cache_entries(index.len());
        trace!(key = %key, bytes = data.len(), entries = index.len(), "cache entry added");
        Ok(())
    }

    /// Drops `key` from the queue, the presence set and the disk. Absent keys
    /// are left alone.
    pub async fn remove(&self, key: &CacheKey) -> Result<()> {
        let mut index = self.state.index.lock().await;
        if !index.remove(key) {
            return Ok(());
        }
        crate::metrics::record_cache_invalidation();
        crate::metrics::set_cache_entries(index.len());
        let removed = self.state.disk.remove(key).await;
        if let Err(err) = self.state.disk.write_manifest(index.keys()).await {
            warn!(error = ?err, "failed to persist cache order");
        }
        debug!(key = %key, "cache entry invalidated");
        removed
    }

    /// Cached keys, oldest first.
    pub async fn snapshot(&self) -> Vec<String> {
        self.state
            .index
            .lock()
            .await
            .keys()
            .map(|key| key.as_str().to_string())
            .collect()
    }

    async fn read_entry(&self, key: &CacheKey) -> Result<Vec<u8>> {
        let path = self.state.disk.entry_path(key);
        self.state
            .disk
            .read(key)
            .await
            .with_context(|| format!("failed to read cache file {}", path.display()))
    }
}
