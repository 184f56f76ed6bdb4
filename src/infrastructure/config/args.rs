//! Command-line arguments.

use super::app_config::LogLevel;
use crate::infrastructure::image::{CacheKeyStrategy, EvictionPolicy};
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments; any flag given overrides `config.toml`.
#[derive(Debug, Parser)]
#[command(
    name = "photocache",
    version,
    about = "Resolve image URLs through a memory, disk and network cache",
    long_about = None
)]
pub struct CliArgs {
    /// Image URLs to resolve; each one gets its own display slot.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Maximum number of images kept in memory.
    #[arg(long, value_name = "N")]
    pub memory_cache_size: Option<usize>,

    /// Memory cache eviction policy.
    #[arg(long, value_enum)]
    pub eviction: Option<EvictionPolicy>,

    /// Disk cache time-to-live in seconds.
    #[arg(long, value_name = "SECS")]
    pub ttl_secs: Option<u64>,

    /// How URLs are mapped to cache file names.
    #[arg(long, value_enum)]
    pub key_strategy: Option<CacheKeyStrategy>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Clear memory and disk caches before resolving.
    #[arg(long)]
    pub clear: bool,

    /// Seconds to wait for pending network loads.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub wait_secs: u64,
}
