use std::fmt;

/// Marker file kept in cache and storage directories; never an entry.
pub const MARKER_FILE: &str = ".gitkeep";
/// Persisted FIFO order of the cache directory; never an entry.
pub const MANIFEST_FILE: &str = ".fifo-order";
pub(super) const TEMP_PREFIX: &str = ".tmp-";

/// Sanitized base name of a request path.
///
/// The key doubles as the file name in the cache and storage directories, so
/// it never contains a path separator and is never `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Takes the last `/`-separated segment of `path`, ignoring trailing
    /// slashes.
    pub fn from_path(path: &str) -> Option<Self> {
        let trimmed = path.trim_end_matches('/');
        let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
        Self::from_name(base)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        if !is_valid_name(name) {
            return None;
        }
        Some(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(super) fn is_reserved(name: &str) -> bool {
    name == MARKER_FILE || name == MANIFEST_FILE || name.starts_with(TEMP_PREFIX)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !is_reserved(name)
        && !name.contains(['/', '\\', '\0'])
}
