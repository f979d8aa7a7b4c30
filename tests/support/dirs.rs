use std::path::PathBuf;

use anyhow::Result;
use tempfile::TempDir;

/// Scratch directories for one test; removed when dropped.
pub struct TestDirs {
    _temp: TempDir,
    pub cache_dir: PathBuf,
    pub storage_dir: PathBuf,
}

impl TestDirs {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let workspace = temp.path();
        let cache_dir = workspace.join("cache");
        let storage_dir = workspace.join("storage");
        std::fs::create_dir_all(&cache_dir)?;
        std::fs::create_dir_all(&storage_dir)?;

        Ok(Self {
            _temp: temp,
            cache_dir,
            storage_dir,
        })
    }

    pub fn cache_file(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    pub fn storage_file(&self, name: &str) -> PathBuf {
        self.storage_dir.join(name)
    }
}
