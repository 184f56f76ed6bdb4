//! photocache - a three-tier image cache loader for photo browsers.
//!
//! Resolves image URLs from an in-memory cache, a disk cache with a
//! time-to-live, or the network, and routes results back to display slots.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, fetchers and configuration.
pub mod infrastructure;
/// Presentation layer containing the command-line front end.
pub mod presentation;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "photocache";
