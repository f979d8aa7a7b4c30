use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::key::{MANIFEST_FILE, TEMP_PREFIX, is_reserved};
use super::CacheKey;

/// On-disk layout of the cache directory: one file per key, named by the key,
/// plus the order manifest.
#[derive(Debug)]
pub(super) struct CacheDisk {
    dir: PathBuf,
    next_temp: AtomicU64,
}

impl CacheDisk {
    pub(super) fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            next_temp: AtomicU64::new(0),
        }
    }

    pub(super) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(super) fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        let seq = self.next_temp.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("{TEMP_PREFIX}{}-{seq}", std::process::id()))
    }

    pub(super) async fn read(&self, key: &CacheKey) -> io::Result<Vec<u8>> {
        async_fs::read(self.entry_path(key)).await
    }

    pub(super) async fn content_length(&self, key: &CacheKey) -> io::Result<u64> {
        Ok(async_fs::metadata(self.entry_path(key)).await?.len())
    }

    pub(super) async fn write(&self, key: &CacheKey, data: &[u8]) -> Result<()> {
        let path = self.entry_path(key);
        self.write_atomic(&path, data)
            .await
            .with_context(|| format!("failed to write cache file {}", path.display()))
    }

    pub(super) async fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.entry_path(key);
        match async_fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove cache file {}", path.display())),
        }
    }

    pub(super) async fn write_manifest<'a, I>(&self, keys: I) -> Result<()>
    where
        I: Iterator<Item = &'a CacheKey>,
    {
        let mut contents = String::new();
        for key in keys {
            contents.push_str(key.as_str());
            contents.push('\n');
        }
        let path = self.manifest_path();
        self.write_atomic(&path, contents.as_bytes())
            .await
            .with_context(|| format!("failed to write cache manifest {}", path.display()))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let temp = self.temp_path();
        let result = async {
            let mut options = async_fs::OpenOptions::new();
            options.create(true).truncate(true).write(true);
            #[cfg(unix)]
            {
                options.mode(0o644);
            }
            let mut file = options.open(&temp).await?;
            file.write_all(data).await?;
            file.flush().await?;
            drop(file);
            async_fs::rename(&temp, path).await
        }
        .await;
        if result.is_err() {
            let _ = async_fs::remove_file(&temp).await;
        }
        result
    }

    /// Lists entries in their persisted insertion order.
    ///
    /// Keys from the manifest come first (when their file still exists),
    /// followed by files the manifest does not know about, oldest
    /// modification time first. Leftover temp files are deleted.
    pub(super) fn scan(&self) -> Result<Vec<CacheKey>> {
        let mut on_disk: Vec<(SystemTime, CacheKey)> = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read cache dir {}", self.dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(path = %entry.path().display(), "ignoring cache file with non UTF-8 name");
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                if let Err(err) = fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), error = %err, "failed to remove stale cache temp file");
                }
                continue;
            }
            if is_reserved(name) {
                continue;
            }
            let Some(key) = CacheKey::from_name(name) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            on_disk.push((modified, key));
        }

        let manifest = match fs::read_to_string(self.manifest_path()) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => {
                warn!(error = %err, "failed to read cache manifest; falling back to file times");
                String::new()
            }
        };

        let mut ordered = Vec::with_capacity(on_disk.len());
        for line in manifest.lines() {
            let Some(key) = CacheKey::from_name(line.trim()) else {
                continue;
            };
            if let Some(pos) = on_disk.iter().position(|(_, existing)| *existing == key) {
                ordered.push(on_disk.swap_remove(pos).1);
            }
        }

        on_disk.sort();
        ordered.extend(on_disk.into_iter().map(|(_, key)| key));
        Ok(ordered)
    }
}
