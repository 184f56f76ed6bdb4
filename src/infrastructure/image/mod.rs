//! Image handling infrastructure.
//!
//! This module provides:
//! - Cache key derivation from URLs
//! - Memory caching with a bounded entry count
//! - Disk caching with a time-to-live
//! - HTTP fetching and per-key request coalescing
//! - Async image loading pipeline

pub mod cache_key;
pub mod disk_cache;
pub mod fetcher;
pub mod in_flight;
pub mod loader;
pub mod memory_cache;

pub use cache_key::{CacheKeyStrategy, path_segment_key};
pub use disk_cache::{DiskImageCache, Freshness};
pub use fetcher::HttpImageFetcher;
pub use in_flight::{InFlightRegistry, Subscription};
pub use loader::{ImageLoader, ImageLoaderConfig, Resolution, SlotReadyEvent};
pub use memory_cache::{CacheStats, EvictionPolicy, MemoryImageCache};
