//! Cache key derivation from image URLs.

use serde::{Deserialize, Serialize};

use crate::domain::entities::CacheKey;

/// Index of the image identifier among the non-empty `/`-separated
/// components of `https://picsum.photos/id/<N>/<w>/<h>`.
pub const ID_SEGMENT_INDEX: usize = 3;

/// Key used when the identifier segment cannot be extracted.
pub const FALLBACK_KEY: &str = "default";

/// How a URL is mapped to a [`CacheKey`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CacheKeyStrategy {
    /// Truncated SHA-256 of the full URL.
    #[default]
    UrlHash,
    /// Fixed path segment of the URL, compatible with files written by
    /// earlier picsum-only builds.
    PathSegment,
}

impl CacheKeyStrategy {
    /// Derives the cache key for `url`.
    #[must_use]
    pub fn derive(self, url: &str) -> CacheKey {
        match self {
            Self::UrlHash => CacheKey::from_url_hash(url),
            Self::PathSegment => path_segment_key(url),
        }
    }
}

impl std::fmt::Display for CacheKeyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UrlHash => write!(f, "url-hash"),
            Self::PathSegment => write!(f, "path-segment"),
        }
    }
}

/// Extracts the identifier segment of a picsum-style URL.
///
/// Anything that would not make a safe file name falls back to
/// [`FALLBACK_KEY`].
#[must_use]
pub fn path_segment_key(url: &str) -> CacheKey {
    let segment = url
        .split('/')
        .filter(|part| !part.is_empty())
        .nth(ID_SEGMENT_INDEX)
        .map(|part| part.split(['?', '#']).next().unwrap_or(""))
        .filter(|part| is_safe_file_name(part));

    CacheKey::new(segment.unwrap_or(FALLBACK_KEY))
}

fn is_safe_file_name(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
