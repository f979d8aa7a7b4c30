use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self as async_fs, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::proxy::cache::CacheKey;

/// Flat directory of files served by the origin, one file per key.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn open(dir: PathBuf) -> Result<Self> {
        async_fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create storage dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    pub async fn read(&self, key: &CacheKey) -> io::Result<Vec<u8>> {
        async_fs::read(self.path(key)).await
    }

    /// Size of a stored file; anything that is not a regular file reads as
    /// missing.
    pub async fn size(&self, key: &CacheKey) -> io::Result<u64> {
        let metadata = async_fs::metadata(self.path(key)).await?;
        if !metadata.is_file() {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(metadata.len())
    }

    /// Writes a new file. Returns `false` without touching anything if the key
    /// already exists.
    pub async fn create(&self, key: &CacheKey, data: &[u8]) -> io::Result<bool> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o644);
        let mut file = match options.open(self.path(key)).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(err),
        };
        file.write_all(data).await?;
        file.flush().await?;
        Ok(true)
    }

    /// Creates or replaces a file.
    pub async fn put(&self, key: &CacheKey, data: &[u8]) -> io::Result<()> {
        async_fs::write(self.path(key), data).await
    }
}
