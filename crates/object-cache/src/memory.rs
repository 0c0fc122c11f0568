//! In-process memory tier

use bytes::Bytes;
use moka::sync::Cache;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value held in the memory tier.
///
/// `bytes` is the same representation that is persisted on disk. `object` is a
/// decoded form attached by a typed accessor; it always decodes from `bytes`.
#[derive(Clone)]
pub struct MemoryEntry {
    pub bytes: Bytes,
    pub object: Option<Arc<dyn Any + Send + Sync>>,
}

impl MemoryEntry {
    pub fn raw(bytes: Bytes) -> Self {
        Self {
            bytes,
            object: None,
        }
    }

    pub fn with_object(bytes: Bytes, object: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            bytes,
            object: Some(object),
        }
    }

    /// Borrow the attached object if it has type `T`
    pub fn object_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.object.as_ref().and_then(|o| o.downcast_ref::<T>())
    }
}

impl fmt::Debug for MemoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEntry")
            .field("len", &self.bytes.len())
            .field("has_object", &self.object.is_some())
            .finish()
    }
}

/// Unbounded concurrent key to entry map.
///
/// Built without a capacity, TTL or TTI so nothing is ever evicted; entries
/// live until removed or the process exits.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Cache<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<MemoryEntry> {
        self.entries.get(key)
    }

    pub fn set(&self, key: &str, entry: MemoryEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) {
        self.entries.invalidate(key);
    }

    pub fn remove_all(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live entries
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
