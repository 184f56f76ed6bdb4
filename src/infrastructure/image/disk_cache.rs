//! Disk-based image cache with a fixed time-to-live.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, error, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::ports::{CacheError, CacheResult};

/// Default lifetime of a cached file.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Default name of the cache directory.
pub const DEFAULT_DIR_NAME: &str = "images";

/// State of a disk cache entry at lookup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No readable file for the key.
    Missing,
    /// File exists and is within the TTL.
    Fresh(Duration),
    /// File exists but is older than the TTL.
    Stale(Duration),
}

impl Freshness {
    /// Classifies an existing file of the given age. An age equal to the TTL
    /// is still fresh.
    #[must_use]
    pub fn from_age(age: Duration, ttl: Duration) -> Self {
        if age <= ttl {
            Self::Fresh(age)
        } else {
            Self::Stale(age)
        }
    }
}

/// Disk-based image cache that persists raw image bytes.
///
/// The file modification time is the only expiry signal. Stale files are
/// bypassed, not deleted; the next successful fetch overwrites them.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    ttl: Duration,
}

impl DiskImageCache {
    /// Creates a disk cache rooted at `cache_dir`.
    ///
    /// The directory is created lazily on the first write.
    #[must_use]
    pub const fn new(cache_dir: PathBuf, ttl: Duration) -> Self {
        Self { cache_dir, ttl }
    }

    /// Creates a cache in the platform cache location (`~/.cache/photocache/<dir_name>/`).
    #[must_use]
    pub fn default_location(dir_name: &str, ttl: Duration) -> Self {
        Self::new(dirs_cache_path(dir_name), ttl)
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the configured time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the path for a cached image.
    #[must_use]
    pub fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.as_str())
    }

    /// Checks the age of the file for `key` against the TTL.
    pub async fn freshness(&self, key: &CacheKey) -> Freshness {
        let Ok(meta) = fs::metadata(self.cache_path(key)).await else {
            return Freshness::Missing;
        };
        if !meta.is_file() {
            return Freshness::Missing;
        }
        let Ok(modified) = meta.modified() else {
            return Freshness::Missing;
        };
        // A timestamp in the future counts as brand new.
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Freshness::from_age(age, self.ttl)
    }

    /// Gets raw image bytes if a fresh entry exists.
    pub async fn get_bytes(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.freshness(key).await {
            Freshness::Missing => {
                trace!(key = %key, "Disk cache miss");
                return None;
            }
            Freshness::Stale(age) => {
                trace!(key = %key, age_secs = age.as_secs(), "Disk cache entry stale");
                return None;
            }
            Freshness::Fresh(_) => {}
        }

        let path = self.cache_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Some(bytes)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to read cache file");
                None
            }
        }
    }

    /// Loads and decodes a fresh image from disk cache.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let bytes = self.get_bytes(key).await?;

        let result = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await;

        match result {
            Ok(Ok(img)) => {
                debug!(key = %key, "Decoded image from disk cache");
                Some(Arc::new(img))
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Failed to decode cached image");
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                None
            }
        }
    }

    /// Stores raw bytes in the disk cache, replacing any existing file.
    ///
    /// The write goes to a temporary file in the cache directory which is
    /// then renamed over the target, so readers never see a partial file.
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be created or written.
    pub async fn put_bytes(&self, key: &CacheKey, bytes: &[u8]) -> CacheResult<()> {
        let dir = self.cache_dir.clone();
        let path = self.cache_path(key);
        let data = bytes.to_vec();

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &data))
            .await
            .map_err(|e| CacheError::IoError(format!("Write task panicked: {e}")))??;

        debug!(key = %key, size = bytes.len(), "Stored image in disk cache");
        Ok(())
    }

    /// Removes an image from disk cache.
    pub async fn evict(&self, key: &CacheKey) {
        if let Err(e) = fs::remove_file(self.cache_path(key)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to evict from disk cache");
            }
        } else {
            debug!(key = %key, "Evicted from disk cache");
        }
    }

    /// Clears the entire disk cache.
    ///
    /// A cache directory that was never created counts as empty.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn clear(&self) -> CacheResult<()> {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(CacheError::IoError(format!("Failed to read cache dir: {e}")));
            }
        };

        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
                continue;
            }
            if fs::remove_file(&path).await.is_err() {
                warn!(path = %path.display(), "Failed to remove cache file");
            } else {
                removed += 1;
            }
        }
        debug!(removed = removed, "Cleared disk cache");
        Ok(())
    }

    /// Returns the number of cached files, fresh or stale.
    pub async fn len(&self) -> usize {
        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return 0;
        };
        let mut count = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.is_ok_and(|t| t.is_file()) {
                count += 1;
            }
        }
        count
    }

    /// Returns true if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Checks if a file exists for the key, regardless of age.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.cache_path(key)).await.unwrap_or(false)
    }
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> CacheResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;
    let mut temp_file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to create cache file: {e}")))?;
    temp_file
        .write_all(data)
        .map_err(|e| CacheError::IoError(format!("Failed to write cache file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| CacheError::IoError(format!("Failed to persist cache file: {}", e.error)))?;
    Ok(())
}

/// Returns the default cache directory path.
fn dirs_cache_path(dir_name: &str) -> PathBuf {
    directories::ProjectDirs::from("com", "photocache", "photocache").map_or_else(
        || {
            std::env::temp_dir()
                .join("photocache")
                .join("cache")
                .join(dir_name)
        },
        |dirs| dirs.cache_dir().join(dir_name),
    )
}
