//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (caching, loading, fetching).
pub mod image;

pub use config::{AppConfig, CliArgs, ConfigError, LogLevel, StorageManager};
pub use image::{
    CacheKeyStrategy, CacheStats, DiskImageCache, EvictionPolicy, HttpImageFetcher, ImageLoader,
    ImageLoaderConfig, MemoryImageCache, Resolution, SlotReadyEvent,
};
