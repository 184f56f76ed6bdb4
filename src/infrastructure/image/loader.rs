//! Async image loading orchestrator.
//!
//! Implements a three-tier cache: Memory -> Disk -> Network

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, ImageSource, LoadedImage, SlotId};
use crate::domain::ports::{CacheError, CacheResult, ImageCachePort, ImageFetcherPort};

use super::cache_key::CacheKeyStrategy;
use super::disk_cache::{DEFAULT_DIR_NAME, DiskImageCache, Freshness};
use super::fetcher::HttpImageFetcher;
use super::in_flight::{InFlightRegistry, Subscription};
use super::memory_cache::{CacheStats, DEFAULT_CACHE_SIZE, EvictionPolicy, MemoryImageCache};

/// Message sent when a pending slot's image finishes loading.
#[derive(Debug, Clone)]
pub struct SlotReadyEvent {
    /// The slot that asked for the image.
    pub slot: SlotId,
    /// Cache key of the image.
    pub key: CacheKey,
    /// URL the image was fetched from.
    pub url: String,
    /// The decoded image.
    pub image: Arc<image::DynamicImage>,
}

/// Result of [`ImageLoader::resolve`].
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Served from memory or disk.
    Ready(LoadedImage),
    /// A network fetch is in flight; a [`SlotReadyEvent`] follows on success.
    Pending,
}

impl Resolution {
    /// Returns the image if it was available immediately.
    #[must_use]
    pub const fn image(&self) -> Option<&Arc<image::DynamicImage>> {
        match self {
            Self::Ready(loaded) => Some(&loaded.image),
            Self::Pending => None,
        }
    }

    /// Returns the tier the image came from.
    #[must_use]
    pub const fn source(&self) -> Option<ImageSource> {
        match self {
            Self::Ready(loaded) => Some(loaded.source),
            Self::Pending => None,
        }
    }

    /// Returns true if the caller has to wait for a slot event.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Configuration for the image loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageLoaderConfig {
    /// Maximum images in memory cache.
    pub memory_cache_size: usize,
    /// What to drop when the memory cache is full.
    pub eviction: EvictionPolicy,
    /// Lifetime of disk cache files in seconds.
    pub disk_ttl_secs: u64,
    /// Name of the cache directory under the platform cache location.
    pub cache_dir_name: String,
    /// Explicit cache directory, overrides `cache_dir_name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// How URLs map to cache keys.
    pub key_strategy: CacheKeyStrategy,
    /// Maximum concurrent downloads.
    pub max_concurrent_downloads: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: DEFAULT_CACHE_SIZE,
            eviction: EvictionPolicy::default(),
            disk_ttl_secs: 60 * 60,
            cache_dir_name: DEFAULT_DIR_NAME.to_string(),
            cache_dir: None,
            key_strategy: CacheKeyStrategy::default(),
            max_concurrent_downloads: 4,
            timeout_secs: 30,
        }
    }
}

impl ImageLoaderConfig {
    /// Returns the disk cache TTL.
    #[must_use]
    pub const fn disk_ttl(&self) -> Duration {
        Duration::from_secs(self.disk_ttl_secs)
    }

    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Builds the disk cache this configuration describes.
    #[must_use]
    pub fn disk_cache(&self) -> DiskImageCache {
        match &self.cache_dir {
            Some(dir) => DiskImageCache::new(dir.clone(), self.disk_ttl()),
            None => DiskImageCache::default_location(&self.cache_dir_name, self.disk_ttl()),
        }
    }
}

/// Orchestrates image loading from memory, disk, and network.
pub struct ImageLoader {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Arc<DiskImageCache>,
    in_flight: Arc<InFlightRegistry>,
    fetcher: Arc<dyn ImageFetcherPort>,
    event_tx: mpsc::UnboundedSender<SlotReadyEvent>,
    semaphore: Arc<Semaphore>,
    config: ImageLoaderConfig,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a new image loader.
    ///
    /// Slot events go to `event_tx`; once its receiver is dropped, events are
    /// discarded and loading carries on.
    #[must_use]
    pub fn new(
        config: ImageLoaderConfig,
        event_tx: &mpsc::UnboundedSender<SlotReadyEvent>,
        disk_cache: Arc<DiskImageCache>,
        fetcher: Arc<dyn ImageFetcherPort>,
    ) -> Self {
        let memory_cache = Arc::new(MemoryImageCache::new(
            config.memory_cache_size,
            config.eviction,
        ));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1)));

        Self {
            memory_cache,
            disk_cache,
            in_flight: Arc::new(InFlightRegistry::new()),
            fetcher,
            event_tx: event_tx.clone(),
            semaphore,
            config,
        }
    }

    /// Creates a loader backed by HTTP and the configured disk location.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn with_http(
        config: ImageLoaderConfig,
        event_tx: &mpsc::UnboundedSender<SlotReadyEvent>,
    ) -> CacheResult<Self> {
        let fetcher = Arc::new(HttpImageFetcher::new(config.timeout())?);
        let disk_cache = Arc::new(config.disk_cache());
        info!(
            dir = %disk_cache.cache_dir().display(),
            ttl_secs = config.disk_ttl_secs,
            memory_cache_size = config.memory_cache_size,
            eviction = %config.eviction,
            "Image loader ready"
        );
        Ok(Self::new(config, event_tx, disk_cache, fetcher))
    }

    /// Returns the loader configuration.
    #[must_use]
    pub const fn config(&self) -> &ImageLoaderConfig {
        &self.config
    }

    /// Returns the disk cache.
    #[must_use]
    pub fn disk_cache(&self) -> &DiskImageCache {
        &self.disk_cache
    }

    /// Derives the cache key for a URL.
    #[must_use]
    pub fn cache_key(&self, url: &str) -> CacheKey {
        self.config.key_strategy.derive(url)
    }

    /// Checks memory cache only, without promoting or counting.
    #[must_use]
    pub fn peek(&self, url: &str) -> Option<Arc<image::DynamicImage>> {
        self.memory_cache.peek(&self.cache_key(url))
    }

    /// Resolves the image for a display slot.
    ///
    /// Memory and fresh disk entries are returned as `Ready`. Otherwise the
    /// slot is subscribed to a network fetch and `Pending` is returned; a
    /// [`SlotReadyEvent`] is sent if the fetch succeeds while the slot still
    /// wants this URL. Failures are logged and never reported to the slot.
    pub async fn resolve(&self, slot: SlotId, url: &str) -> Resolution {
        let key = self.cache_key(url);

        if let Some(loaded) = self.lookup_cached(&key).await {
            self.in_flight.detach_slot(slot);
            trace!(slot = %slot, key = %key, source = %loaded.source, "Resolved from cache");
            return Resolution::Ready(loaded);
        }

        let cached = || self.memory_cache.peek(&key);
        match self.in_flight.subscribe_slot(&key, url, slot, cached) {
            Subscription::Started => self.spawn_fetch(key, url.to_string()),
            Subscription::Joined => trace!(slot = %slot, key = %key, "Joined in-flight fetch"),
            Subscription::Cached(image) => {
                trace!(slot = %slot, key = %key, "Fetch finished during lookup");
                return Resolution::Ready(LoadedImage {
                    key,
                    image,
                    source: ImageSource::MemoryCache,
                });
            }
        }
        Resolution::Pending
    }

    /// Loads an image, awaiting the network tier if both caches miss.
    ///
    /// # Errors
    /// Returns the fetch or decode error if the image cannot be loaded.
    pub async fn load(&self, url: &str) -> CacheResult<LoadedImage> {
        let key = self.cache_key(url);

        if let Some(loaded) = self.lookup_cached(&key).await {
            return Ok(loaded);
        }

        let (rx, started) = self.in_flight.subscribe_waiter(&key, url);
        if started {
            self.spawn_fetch(key.clone(), url.to_string());
        }

        let image = rx
            .await
            .map_err(|_| CacheError::NetworkError("Fetch task dropped".to_string()))??;

        Ok(LoadedImage {
            key,
            image,
            source: ImageSource::Network,
        })
    }

    /// Warms the caches for a batch of URLs without subscribing any slot.
    pub async fn prefetch<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for url in urls {
            let url = url.as_ref();
            let key = self.cache_key(url);
            if self.memory_cache.contains(&key)
                || matches!(self.disk_cache.freshness(&key).await, Freshness::Fresh(_))
            {
                continue;
            }
            if self.in_flight.register(&key, url) {
                self.spawn_fetch(key, url.to_string());
            }
        }
    }

    /// The slot no longer wants its pending image.
    ///
    /// The fetch still completes and populates both caches.
    pub fn cancel_slot(&self, slot: SlotId) {
        if let Some(key) = self.in_flight.detach_slot(slot) {
            debug!(slot = %slot, key = %key, "Cancelled slot interest");
        }
    }

    /// Returns true if a fetch for the URL is in flight.
    #[must_use]
    pub fn is_loading(&self, url: &str) -> bool {
        self.in_flight.contains(&self.cache_key(url))
    }

    /// Returns the number of fetches in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.memory_cache.stats()
    }

    /// Drops every image held in memory, e.g. on a full data refresh.
    pub fn clear_memory(&self) {
        self.memory_cache.clear();
    }

    /// Clears all caches.
    pub async fn clear_all(&self) {
        self.memory_cache.clear();
        if let Err(e) = self.disk_cache.clear().await {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!("Cleared all image caches");
    }

    async fn lookup_cached(&self, key: &CacheKey) -> Option<LoadedImage> {
        if let Some(image) = self.memory_cache.get(key) {
            return Some(LoadedImage {
                key: key.clone(),
                image,
                source: ImageSource::MemoryCache,
            });
        }

        let image = self.disk_cache.get(key).await?;
        self.memory_cache.put(key.clone(), image.clone());
        Some(LoadedImage {
            key: key.clone(),
            image,
            source: ImageSource::DiskCache,
        })
    }

    fn spawn_fetch(&self, key: CacheKey, url: String) {
        let handle = ImageLoaderHandle {
            memory_cache: self.memory_cache.clone(),
            disk_cache: self.disk_cache.clone(),
            in_flight: self.in_flight.clone(),
            fetcher: self.fetcher.clone(),
            event_tx: self.event_tx.clone(),
            semaphore: self.semaphore.clone(),
        };
        tokio::spawn(async move { handle.fetch_and_store(key, url).await });
    }
}

/// Internal handle for async loading tasks.
struct ImageLoaderHandle {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Arc<DiskImageCache>,
    in_flight: Arc<InFlightRegistry>,
    fetcher: Arc<dyn ImageFetcherPort>,
    event_tx: mpsc::UnboundedSender<SlotReadyEvent>,
    semaphore: Arc<Semaphore>,
}

impl ImageLoaderHandle {
    async fn fetch_and_store(self, key: CacheKey, url: String) {
        let result = self.download_and_decode(&key, &url).await;

        if let Ok((_, image)) = &result {
            self.memory_cache.put(key.clone(), image.clone());
        }

        let Some(done) = self.in_flight.complete(&key) else {
            return;
        };

        let (bytes, image) = match result {
            Ok(ok) => ok,
            Err(e) => {
                warn!(key = %key, url = %url, error = %e, "Image fetch failed");
                for waiter in done.waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
                return;
            }
        };

        for waiter in done.waiters {
            let _ = waiter.send(Ok(image.clone()));
        }
        for slot in done.slots {
            let event = SlotReadyEvent {
                slot,
                key: key.clone(),
                url: done.url.clone(),
                image: image.clone(),
            };
            if self.event_tx.send(event).is_err() {
                trace!(slot = %slot, key = %key, "Slot receiver gone, event dropped");
            }
        }

        if let Err(e) = self.disk_cache.put_bytes(&key, &bytes).await {
            warn!(key = %key, error = %e, "Failed to cache to disk");
        }

        debug!(key = %key, source = "network", "Image loaded successfully");
    }

    async fn download_and_decode(
        &self,
        key: &CacheKey,
        url: &str,
    ) -> CacheResult<(Bytes, Arc<image::DynamicImage>)> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Download slots closed: {e}")))?;

        debug!(key = %key, url = %url, "Downloading image from network");
        let bytes = self.fetcher.fetch(url).await?;

        let bytes_for_decode = bytes.clone();
        let decoded =
            tokio::task::spawn_blocking(move || image::load_from_memory(&bytes_for_decode))
                .await
                .map_err(|e| CacheError::DecodeError(format!("Decode task panicked: {e}")))?
                .map_err(|e| CacheError::DecodeError(format!("Failed to decode image: {e}")))?;

        Ok((bytes, Arc::new(decoded)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::time::timeout;

    use super::*;
    use crate::domain::ports::mocks::MockImageFetcherPort;
    use crate::infrastructure::image::disk_cache::test_support::{age_file, png_bytes};

    const PICSUM_URL: &str = "https://picsum.photos/id/1/5616/3744";
    const WAIT: Duration = Duration::from_secs(5);

    /// Fetcher serving canned responses, optionally held until the test
    /// releases permits on `gate`.
    #[derive(Default)]
    struct FakeFetcher {
        responses: HashMap<String, CacheResult<Bytes>>,
        calls: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeFetcher {
        fn with(mut self, url: &str, response: CacheResult<Vec<u8>>) -> Self {
            self.responses
                .insert(url.to_string(), response.map(Bytes::from));
            self
        }

        fn gated(mut self, gate: &Arc<Semaphore>) -> Self {
            self.gate = Some(gate.clone());
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageFetcherPort for FakeFetcher {
        async fn fetch(&self, url: &str) -> CacheResult<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }
            self.responses
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(CacheError::NetworkError(format!("no route to {url}"))))
        }
    }

    struct Harness {
        loader: ImageLoader,
        fetcher: Arc<FakeFetcher>,
        events: mpsc::UnboundedReceiver<SlotReadyEvent>,
        _temp: TempDir,
    }

    fn harness_with(config: ImageLoaderConfig, fetcher: FakeFetcher) -> Harness {
        let temp = TempDir::new().unwrap();
        let config = ImageLoaderConfig {
            cache_dir: Some(temp.path().join("images")),
            ..config
        };
        let (tx, events) = mpsc::unbounded_channel();
        let disk_cache = Arc::new(config.disk_cache());
        let fetcher = Arc::new(fetcher);
        let loader = ImageLoader::new(config, &tx, disk_cache, fetcher.clone());
        Harness {
            loader,
            fetcher,
            events,
            _temp: temp,
        }
    }

    fn harness(fetcher: FakeFetcher) -> Harness {
        harness_with(ImageLoaderConfig::default(), fetcher)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_event(h: &mut Harness) -> SlotReadyEvent {
        timeout(WAIT, h.events.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_cold_resolve_fetches_then_serves_from_memory() {
        let png = png_bytes(6, 4, [1, 2, 3]);
        let mut h = harness(FakeFetcher::default().with(PICSUM_URL, Ok(png.clone())));

        let first = h.loader.resolve(SlotId(0), PICSUM_URL).await;
        assert!(first.is_pending());
        assert!(first.image().is_none());

        let event = next_event(&mut h).await;
        assert_eq!(event.slot, SlotId(0));
        assert_eq!(event.url, PICSUM_URL);
        assert_eq!((event.image.width(), event.image.height()), (6, 4));

        let second = h.loader.resolve(SlotId(0), PICSUM_URL).await;
        assert_eq!(second.source(), Some(ImageSource::MemoryCache));
        assert_eq!(h.fetcher.calls(), 1);

        let key = h.loader.cache_key(PICSUM_URL);
        let path = h.loader.disk_cache().cache_path(&key);
        wait_until(|| path.is_file()).await;
        assert_eq!(std::fs::read(&path).unwrap(), png);
    }

    #[tokio::test]
    async fn test_memory_hit_skips_disk_and_network() {
        let h = harness(FakeFetcher::default().with(PICSUM_URL, Ok(png_bytes(2, 2, [9, 9, 9]))));
        h.loader.load(PICSUM_URL).await.unwrap();
        let key = h.loader.cache_key(PICSUM_URL);
        let path = h.loader.disk_cache().cache_path(&key);
        wait_until(|| path.is_file()).await;

        std::fs::remove_file(&path).unwrap();
        let resolution = h.loader.resolve(SlotId(1), PICSUM_URL).await;

        assert_eq!(resolution.source(), Some(ImageSource::MemoryCache));
        assert_eq!(h.fetcher.calls(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_fresh_disk_hit_is_promoted_to_memory() {
        let h = harness(FakeFetcher::default());
        let key = h.loader.cache_key(PICSUM_URL);
        h.loader
            .disk_cache()
            .put_bytes(&key, &png_bytes(3, 3, [50, 60, 70]))
            .await
            .unwrap();
        assert!(h.loader.peek(PICSUM_URL).is_none());

        let resolution = h.loader.resolve(SlotId(0), PICSUM_URL).await;

        assert_eq!(resolution.source(), Some(ImageSource::DiskCache));
        let img = resolution.image().unwrap();
        assert_eq!(img.to_rgb8().get_pixel(0, 0).0, [50, 60, 70]);
        assert!(h.loader.peek(PICSUM_URL).is_some());
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_disk_entry_goes_to_network_and_is_overwritten() {
        let fresh = png_bytes(2, 2, [0, 0, 255]);
        let mut h = harness(FakeFetcher::default().with(PICSUM_URL, Ok(fresh.clone())));
        let key = h.loader.cache_key(PICSUM_URL);
        let path = h.loader.disk_cache().cache_path(&key);
        h.loader
            .disk_cache()
            .put_bytes(&key, &png_bytes(2, 2, [255, 0, 0]))
            .await
            .unwrap();
        age_file(&path, Duration::from_secs(60 * 60 + 60));

        let resolution = h.loader.resolve(SlotId(0), PICSUM_URL).await;
        assert!(resolution.is_pending());

        let event = next_event(&mut h).await;
        assert_eq!(event.image.to_rgb8().get_pixel(0, 0).0, [0, 0, 255]);
        wait_until(|| std::fs::read(&path).is_ok_and(|b| b == fresh)).await;
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_caches_untouched() {
        let mut mock = MockImageFetcherPort::new();
        mock.expect_fetch()
            .times(1)
            .returning(|_| Err(CacheError::NetworkError("connection reset".to_string())));

        let temp = TempDir::new().unwrap();
        let config = ImageLoaderConfig {
            cache_dir: Some(temp.path().join("images")),
            ..ImageLoaderConfig::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let disk_cache = Arc::new(config.disk_cache());
        let loader = ImageLoader::new(config, &tx, disk_cache, Arc::new(mock));

        let resolution = loader.resolve(SlotId(0), PICSUM_URL).await;
        assert!(resolution.is_pending());
        wait_until(|| loader.pending_count() == 0).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(loader.memory_cache_stats().size, 0);
        assert!(loader.disk_cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_disk_write_failure_still_notifies_and_fills_memory() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let config = ImageLoaderConfig {
            cache_dir: Some(blocker.join("images")),
            ..ImageLoaderConfig::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let disk_cache = Arc::new(config.disk_cache());
        let fetcher = Arc::new(
            FakeFetcher::default().with(PICSUM_URL, Ok(png_bytes(2, 2, [1, 2, 3]))),
        );
        let loader = ImageLoader::new(config, &tx, disk_cache, fetcher.clone());

        assert!(loader.resolve(SlotId(0), PICSUM_URL).await.is_pending());

        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.slot, SlotId(0));
        assert!(loader.peek(PICSUM_URL).is_some());
        wait_until(|| loader.pending_count() == 0).await;

        let again = loader.resolve(SlotId(0), PICSUM_URL).await;
        assert_eq!(again.source(), Some(ImageSource::MemoryCache));
        assert!(!loader.disk_cache().cache_dir().exists());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_not_cached() {
        let mut h = harness(FakeFetcher::default().with(PICSUM_URL, Ok(b"<html>".to_vec())));

        let result = h.loader.load(PICSUM_URL).await;

        assert!(matches!(result, Err(CacheError::DecodeError(_))));
        assert!(h.events.try_recv().is_err());
        assert!(h.loader.peek(PICSUM_URL).is_none());
        assert!(h.loader.disk_cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_load_reports_fetch_error() {
        let url = "https://picsum.photos/id/2/10/10";
        let h = harness(
            FakeFetcher::default().with(url, Err(CacheError::InvalidUrl("bad".to_string()))),
        );

        let result = h.loader.load(url).await;
        assert_eq!(result.unwrap_err(), CacheError::InvalidUrl("bad".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let gate = Arc::new(Semaphore::new(0));
        let mut h = harness(
            FakeFetcher::default()
                .with(PICSUM_URL, Ok(png_bytes(2, 2, [7, 7, 7])))
                .gated(&gate),
        );

        assert!(h.loader.resolve(SlotId(0), PICSUM_URL).await.is_pending());
        assert!(h.loader.resolve(SlotId(1), PICSUM_URL).await.is_pending());
        assert!(h.loader.is_loading(PICSUM_URL));
        assert_eq!(h.loader.pending_count(), 1);

        gate.add_permits(10);
        let mut slots = vec![next_event(&mut h).await.slot, next_event(&mut h).await.slot];
        slots.sort();

        assert_eq!(slots, vec![SlotId(0), SlotId(1)]);
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_slot_is_not_notified_but_cache_fills() {
        let gate = Arc::new(Semaphore::new(0));
        let mut h = harness(
            FakeFetcher::default()
                .with(PICSUM_URL, Ok(png_bytes(2, 2, [3, 3, 3])))
                .gated(&gate),
        );

        h.loader.resolve(SlotId(0), PICSUM_URL).await;
        h.loader.resolve(SlotId(1), PICSUM_URL).await;
        h.loader.cancel_slot(SlotId(0));
        gate.add_permits(10);

        let event = next_event(&mut h).await;
        assert_eq!(event.slot, SlotId(1));
        wait_until(|| h.loader.pending_count() == 0).await;
        assert!(h.events.try_recv().is_err());
        assert!(h.loader.peek(PICSUM_URL).is_some());
    }

    #[tokio::test]
    async fn test_recycled_slot_only_gets_latest_url() {
        let other = "https://picsum.photos/id/2/100/100";
        let gate = Arc::new(Semaphore::new(0));
        let mut h = harness(
            FakeFetcher::default()
                .with(PICSUM_URL, Ok(png_bytes(2, 2, [1, 1, 1])))
                .with(other, Ok(png_bytes(3, 3, [2, 2, 2])))
                .gated(&gate),
        );

        h.loader.resolve(SlotId(0), PICSUM_URL).await;
        h.loader.resolve(SlotId(0), other).await;
        gate.add_permits(10);

        let event = next_event(&mut h).await;
        assert_eq!(event.slot, SlotId(0));
        assert_eq!(event.url, other);
        wait_until(|| h.loader.pending_count() == 0).await;
        assert!(h.events.try_recv().is_err());
        // Both fetches still populated memory.
        assert!(h.loader.peek(PICSUM_URL).is_some());
        assert!(h.loader.peek(other).is_some());
    }

    #[tokio::test]
    async fn test_dropped_receiver_still_populates_caches() {
        let h = harness(FakeFetcher::default().with(PICSUM_URL, Ok(png_bytes(2, 2, [4, 4, 4]))));
        let Harness {
            loader,
            events,
            _temp,
            ..
        } = h;
        drop(events);

        assert!(loader.resolve(SlotId(5), PICSUM_URL).await.is_pending());

        let path = loader.disk_cache().cache_path(&loader.cache_key(PICSUM_URL));
        wait_until(|| path.is_file()).await;
        assert!(loader.peek(PICSUM_URL).is_some());
    }

    #[tokio::test]
    async fn test_clear_all_eviction_through_loader() {
        let urls: Vec<String> = (0..3)
            .map(|i| format!("https://picsum.photos/id/{i}/10/10"))
            .collect();
        let fetcher = urls.iter().fold(FakeFetcher::default(), |f, url| {
            f.with(url, Ok(png_bytes(1, 1, [0, 0, 0])))
        });
        let config = ImageLoaderConfig {
            memory_cache_size: 2,
            eviction: EvictionPolicy::ClearAll,
            ..ImageLoaderConfig::default()
        };
        let h = harness_with(config, fetcher);

        for url in &urls {
            h.loader.load(url).await.unwrap();
        }

        assert_eq!(h.loader.memory_cache_stats().size, 1);
        assert!(h.loader.peek(&urls[2]).is_some());
    }

    #[tokio::test]
    async fn test_path_segment_keys_share_disk_file_across_sizes() {
        let small = "https://picsum.photos/id/1/200/300";
        let config = ImageLoaderConfig {
            key_strategy: CacheKeyStrategy::PathSegment,
            ..ImageLoaderConfig::default()
        };
        let h = harness_with(config, FakeFetcher::default());
        h.loader
            .disk_cache()
            .put_bytes(&CacheKey::new("1"), &png_bytes(2, 2, [8, 8, 8]))
            .await
            .unwrap();

        let resolution = h.loader.resolve(SlotId(0), small).await;
        assert_eq!(resolution.source(), Some(ImageSource::DiskCache));
        assert!(h.loader.peek(PICSUM_URL).is_some());
    }

    #[tokio::test]
    async fn test_prefetch_warms_caches_without_events() {
        let other = "https://picsum.photos/id/3/10/10";
        let mut h = harness(
            FakeFetcher::default()
                .with(PICSUM_URL, Ok(png_bytes(1, 1, [5, 5, 5])))
                .with(other, Ok(png_bytes(1, 1, [6, 6, 6]))),
        );

        h.loader.prefetch([PICSUM_URL, other]).await;
        wait_until(|| h.loader.pending_count() == 0).await;

        assert!(h.loader.peek(PICSUM_URL).is_some());
        assert!(h.loader.peek(other).is_some());
        assert!(h.events.try_recv().is_err());

        h.loader.prefetch([PICSUM_URL]).await;
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_memory_and_clear_all() {
        let h = harness(FakeFetcher::default().with(PICSUM_URL, Ok(png_bytes(1, 1, [1, 1, 1]))));
        h.loader.load(PICSUM_URL).await.unwrap();
        let path = h.loader.disk_cache().cache_path(&h.loader.cache_key(PICSUM_URL));
        wait_until(|| path.is_file()).await;

        h.loader.clear_memory();
        assert!(h.loader.peek(PICSUM_URL).is_none());
        let again = h.loader.resolve(SlotId(0), PICSUM_URL).await;
        assert_eq!(again.source(), Some(ImageSource::DiskCache));

        h.loader.clear_all().await;
        assert!(h.loader.peek(PICSUM_URL).is_none());
        assert!(h.loader.disk_cache().is_empty().await);
    }

    #[test]
    fn test_config_defaults() {
        let config = ImageLoaderConfig::default();
        assert_eq!(config.memory_cache_size, 20);
        assert_eq!(config.disk_ttl(), Duration::from_secs(3600));
        assert_eq!(config.cache_dir_name, "images");
        assert_eq!(config.eviction, EvictionPolicy::Lru);
        assert_eq!(config.key_strategy, CacheKeyStrategy::UrlHash);
    }
}
