//! Two-tier object cache
//!
//! Values live in an in-process memory tier in front of a per-name directory
//! on disk. Lookups check memory first and promote disk hits. A process-wide
//! registry hands out a shared cache and named caches, and [`TypedCache`]
//! layers a codec (such as [`ImageCodec`]) and remote fetching on top.

mod cache;
mod codec;
mod config;
mod disk;
mod error;
mod fetch;
mod memory;
mod registry;
mod typed;
mod types;

pub use cache::ObjectCache;
pub use codec::{Codec, Image, ImageCodec, ImageFormat};
pub use config::CacheConfig;
pub use disk::DiskStore;
pub use error::{CacheError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use memory::{MemoryEntry, MemoryStore};
pub use registry::{cache_named, shared_cache, CacheRegistry, SHARED_CACHE_NAME};
pub use typed::TypedCache;
pub use types::{CacheStats, DiskEntry};
