//! Process-wide table of named caches

use crate::cache::ObjectCache;
use crate::config::CacheConfig;
use crate::disk::DiskStore;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Name reserved for the shared cache
pub const SHARED_CACHE_NAME: &str = "shared";

lazy_static::lazy_static! {
    static ref GLOBAL: CacheRegistry = CacheRegistry::new(CacheConfig::from_env());
}

/// Hands out cache instances rooted at one directory.
///
/// Each name maps to exactly one instance for the life of the registry, so
/// every caller asking for the same name shares its memory tier.
pub struct CacheRegistry {
    config: CacheConfig,
    shared: Mutex<Option<ObjectCache>>,
    caches: Mutex<HashMap<String, ObjectCache>>,
}

impl CacheRegistry {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            shared: Mutex::new(None),
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Registry configured from the environment, created on first use
    pub fn global() -> &'static CacheRegistry {
        &GLOBAL
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The shared cache, created on the first call
    pub fn shared(&self) -> ObjectCache {
        let mut slot = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert_with(|| {
            let disk = DiskStore::new_unchecked(&self.config.root_dir, SHARED_CACHE_NAME);
            ObjectCache::with_disk(SHARED_CACHE_NAME, disk)
        })
        .clone()
    }

    /// The cache called `name`, created if this registry has not seen it yet
    pub fn named(&self, name: &str) -> Result<ObjectCache> {
        if name == SHARED_CACHE_NAME {
            return Ok(self.shared());
        }

        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = caches.get(name) {
            debug!(cache = %name, "Reusing registered cache");
            return Ok(cache.clone());
        }

        let cache = ObjectCache::new(name, &self.config)?;
        caches.insert(name.to_string(), cache.clone());
        Ok(cache)
    }
}

/// The process-wide shared cache
pub fn shared_cache() -> ObjectCache {
    CacheRegistry::global().shared()
}

/// A process-wide cache by name
pub fn cache_named(name: &str) -> Result<ObjectCache> {
    CacheRegistry::global().named(name)
}
