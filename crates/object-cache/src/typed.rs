//! Typed access to an [`ObjectCache`] through a [`Codec`]
//!
//! Bytes on disk stay authoritative. Decoded values are attached to the memory
//! entry they were decoded from, so repeated reads skip the codec.

use crate::cache::{validate_key, ObjectCache};
use crate::codec::Codec;
use crate::error::{CacheError, Result};
use crate::fetch::Fetcher;
use crate::memory::MemoryEntry;
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An [`ObjectCache`] that stores values through a [`Codec`], with optional
/// fetch-on-miss
pub struct TypedCache<C: Codec> {
    cache: ObjectCache,
    codec: Arc<C>,
    fetcher: Option<Arc<dyn Fetcher>>,
}

impl<C: Codec> Clone for TypedCache<C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            codec: Arc::clone(&self.codec),
            fetcher: self.fetcher.clone(),
        }
    }
}

impl<C: Codec> TypedCache<C> {
    /// Wrap `cache`, encoding and decoding values with `codec`
    pub fn new(cache: ObjectCache, codec: C) -> Self {
        Self {
            cache,
            codec: Arc::new(codec),
            fetcher: None,
        }
    }

    /// Use `fetcher` for [`fetch_and_cache`](Self::fetch_and_cache)
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// The untyped cache underneath
    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Decoded value for `key`. Bytes that fail to decode are an error, not a
    /// miss.
    pub fn get(&self, key: &str) -> Result<Option<C::Value>> {
        match self.cache.entry_for_key(key) {
            Some(entry) => self.resolve(key, entry).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get); decoding runs on the blocking pool
    pub async fn get_async(&self, key: &str) -> Result<Option<C::Value>> {
        let entry = match self.cache.entry_for_key_async(key).await {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if let Some(value) = entry.object_as::<C::Value>() {
            return Ok(Some(value.clone()));
        }

        let this = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || this.decode_entry(&key, entry))
            .await?
            .map(Some)
    }

    /// Resolve `key` on a spawned task and hand the result to `callback`.
    /// Decode failures are delivered as errors.
    pub fn get_with<F>(&self, key: &str, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Option<C::Value>>) + Send + 'static,
    {
        let this = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            callback(this.get_async(&key).await);
        })
    }

    /// Encode `value` and store it under `key`. Nothing is stored if encoding
    /// fails.
    pub fn set(&self, value: &C::Value, key: &str) -> Result<()> {
        validate_key(key)?;
        let entry = self.encode_entry(value)?;
        self.cache.store_entry(key, entry)
    }

    /// Like [`set`](Self::set) with encoding and the disk write on the
    /// blocking pool
    pub async fn set_async(&self, value: &C::Value, key: &str) -> Result<()> {
        validate_key(key)?;
        let this = self.clone();
        let value = value.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = this.encode_entry(&value)?;
            this.cache.store_entry(&key, entry)
        })
        .await?
    }

    /// Return the cached value for `key`, fetching it from `locator` on a
    /// miss.
    ///
    /// `before_fetch` runs once, only when a fetch is about to happen. A
    /// fetched value is stored before being returned; if the fetch or decode
    /// fails nothing is written. A cached entry that no longer decodes is
    /// refetched and overwritten.
    ///
    /// An I/O failure while persisting the fetched value is logged and the
    /// value is still returned; it stays in the memory tier. Encode failures
    /// are returned.
    pub async fn fetch_and_cache<B>(
        &self,
        key: &str,
        locator: &str,
        before_fetch: B,
    ) -> Result<C::Value>
    where
        B: FnOnce(),
    {
        validate_key(key)?;

        match self.get_async(key).await {
            Ok(Some(value)) => {
                debug!(cache = %self.cache.name(), key, "Serving fetchable object from cache");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(cache = %self.cache.name(), key, error = %e, "Cached object is unreadable, refetching");
            }
        }

        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| CacheError::Fetch("no fetcher configured".to_string()))?;

        before_fetch();
        let data = fetcher.fetch(locator).await.map_err(|e| {
            warn!(cache = %self.cache.name(), key, locator, error = %e, "Fetch failed");
            e
        })?;

        let value = self.codec.decode(&data).map_err(|e| {
            warn!(cache = %self.cache.name(), key, locator, error = %e, "Fetched data failed to decode");
            CacheError::Fetch(format!("{} returned invalid data: {}", locator, e))
        })?;

        match self.set_async(&value, key).await {
            Ok(()) => {}
            Err(CacheError::Io(e)) => {
                // Memory already holds the value; keep serving it
                warn!(cache = %self.cache.name(), key, error = %e, "Failed to persist fetched object");
            }
            Err(e) => return Err(e),
        }

        info!(cache = %self.cache.name(), key, locator, size = data.len(), "Fetched and cached object");
        Ok(value)
    }

    /// [`fetch_and_cache`](Self::fetch_and_cache) on a spawned task,
    /// delivering the outcome to `on_complete`
    pub fn fetch_and_cache_with<B, F>(
        &self,
        key: &str,
        locator: &str,
        before_fetch: B,
        on_complete: F,
    ) -> JoinHandle<()>
    where
        B: FnOnce() + Send + 'static,
        F: FnOnce(Result<C::Value>) + Send + 'static,
    {
        let this = self.clone();
        let key = key.to_string();
        let locator = locator.to_string();
        tokio::spawn(async move {
            on_complete(this.fetch_and_cache(&key, &locator, before_fetch).await);
        })
    }

    fn resolve(&self, key: &str, entry: MemoryEntry) -> Result<C::Value> {
        if let Some(value) = entry.object_as::<C::Value>() {
            return Ok(value.clone());
        }
        self.decode_entry(key, entry)
    }

    fn decode_entry(&self, key: &str, entry: MemoryEntry) -> Result<C::Value> {
        let value = self.codec.decode(&entry.bytes).map_err(|e| {
            warn!(cache = %self.cache.name(), key, error = %e, "Cached bytes failed to decode");
            e
        })?;
        self.cache
            .attach_object(key, &entry.bytes, Arc::new(value.clone()));
        Ok(value)
    }

    fn encode_entry(&self, value: &C::Value) -> Result<MemoryEntry> {
        let bytes = Bytes::from(self.codec.encode(value)?);
        Ok(MemoryEntry::with_object(bytes, Arc::new(value.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::png;
    use crate::codec::{Image, ImageCodec};
    use crate::config::CacheConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct StaticFetcher {
        data: Option<Vec<u8>>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn new(data: Option<Vec<u8>>) -> Arc<Self> {
            Arc::new(Self {
                data,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, _locator: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.data
                .clone()
                .ok_or_else(|| CacheError::Fetch("status 404".to_string()))
        }
    }

    fn image_cache(root: &std::path::Path) -> TypedCache<ImageCodec> {
        let cache = ObjectCache::new("images", &CacheConfig::new(root)).unwrap();
        TypedCache::new(cache, ImageCodec)
    }

    #[test]
    fn test_set_and_get() {
        let dir = tempdir().unwrap();
        let images = image_cache(dir.path());
        let bytes = png(16, 16);
        let image = Image::from_bytes(bytes.clone()).unwrap();

        images.set(&image, "logo").unwrap();
        assert_eq!(images.get("logo").unwrap(), Some(image));

        // The untyped layer sees the encoded bytes
        let raw = images.cache().object_for_key("logo").unwrap();
        assert_eq!(raw.as_ref(), bytes.as_slice());
    }

    #[test]
    fn test_get_decodes_from_disk() {
        let dir = tempdir().unwrap();
        let bytes = png(2, 3);
        image_cache(dir.path())
            .cache()
            .set_object(bytes.clone(), "logo")
            .unwrap();

        let images = image_cache(dir.path());
        let image = images.get("logo").unwrap().unwrap();
        assert_eq!(image, ImageCodec.decode(&bytes).unwrap());

        // The decoded object is now attached in memory
        let entry = images.cache().entry_for_key("logo").unwrap();
        assert!(entry.object_as::<Image>().is_some());
    }

    #[test]
    fn test_get_surfaces_decode_error() {
        let dir = tempdir().unwrap();
        let images = image_cache(dir.path());
        images
            .cache()
            .set_object(&b"not an image"[..], "bad")
            .unwrap();

        assert!(matches!(images.get("bad"), Err(CacheError::Decode(_))));
        assert!(images.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_untyped_set_replaces_typed_object() {
        let dir = tempdir().unwrap();
        let images = image_cache(dir.path());
        images
            .set(&Image::from_bytes(png(1, 1)).unwrap(), "logo")
            .unwrap();
        images.cache().set_object(png(5, 5), "logo").unwrap();

        let image = images.get("logo").unwrap().unwrap();
        assert_eq!(image.width(), 5);
    }

    #[tokio::test]
    async fn test_get_async_and_callback() {
        let dir = tempdir().unwrap();
        let bytes = png(8, 4);
        image_cache(dir.path())
            .cache()
            .set_object(bytes.clone(), "logo")
            .unwrap();

        let images = image_cache(dir.path());
        let image = images.get_async("logo").await.unwrap().unwrap();
        assert_eq!((image.width(), image.height()), (8, 4));

        let (tx, rx) = std::sync::mpsc::channel();
        images
            .get_with("missing", move |result| tx.send(result).unwrap())
            .await
            .unwrap();
        let results: Vec<_> = rx.try_iter().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Ok(None)));
    }

    #[tokio::test]
    async fn test_get_async_surfaces_decode_error() {
        let dir = tempdir().unwrap();
        let images = image_cache(dir.path());
        images
            .cache()
            .set_object(&b"not an image"[..], "bad")
            .unwrap();

        let result = images.get_async("bad").await;
        assert!(matches!(result, Err(CacheError::Decode(_))));

        let (tx, rx) = std::sync::mpsc::channel();
        images
            .get_with("bad", move |result| tx.send(result).unwrap())
            .await
            .unwrap();
        let results: Vec<_> = rx.try_iter().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(CacheError::Decode(_))));
    }

    #[tokio::test]
    async fn test_get_async_rejects_header_only_image() {
        let dir = tempdir().unwrap();
        let images = image_cache(dir.path());
        let full = png(16, 16);
        images.cache().set_object(full[..33].to_vec(), "stub").unwrap();

        assert!(matches!(images.get("stub"), Err(CacheError::Decode(_))));
        let result = images.get_async("stub").await;
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_and_cache_fetches_once() {
        let dir = tempdir().unwrap();
        let bytes = png(32, 32);
        let fetcher = StaticFetcher::new(Some(bytes.clone()));
        let images = image_cache(dir.path()).with_fetcher(fetcher.clone());
        let before = AtomicUsize::new(0);

        let first = images
            .fetch_and_cache("remote1", "https://example.com/x.png", || {
                before.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(first, ImageCodec.decode(&bytes).unwrap());
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let second = images
            .fetch_and_cache("remote1", "https://example.com/x.png", || {
                before.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(images.cache().path_for_key("remote1").is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_writes_nothing() {
        let dir = tempdir().unwrap();
        let images = image_cache(dir.path()).with_fetcher(StaticFetcher::new(None));

        let result = images
            .fetch_and_cache("remote1", "https://example.com/x.png", || {})
            .await;
        assert!(matches!(result, Err(CacheError::Fetch(_))));
        assert!(!images.cache().object_exists_for_key("remote1"));
    }

    #[tokio::test]
    async fn test_fetch_invalid_data_writes_nothing() {
        let dir = tempdir().unwrap();
        let fetcher = StaticFetcher::new(Some(b"<html>oops</html>".to_vec()));
        let images = image_cache(dir.path()).with_fetcher(fetcher);

        let result = images
            .fetch_and_cache("remote1", "https://example.com/x.png", || {})
            .await;
        assert!(matches!(result, Err(CacheError::Fetch(_))));
        assert!(!images.cache().object_exists_for_key("remote1"));
    }

    #[tokio::test]
    async fn test_fetch_returns_value_when_persist_fails() {
        let dir = tempdir().unwrap();
        // A regular file where the cache directory should go
        std::fs::write(dir.path().join("images"), b"blocker").unwrap();
        let fetcher = StaticFetcher::new(Some(png(6, 6)));
        let images = image_cache(dir.path()).with_fetcher(fetcher.clone());

        let image = images
            .fetch_and_cache("remote1", "https://example.com/x.png", || {})
            .await
            .unwrap();
        assert_eq!(image.width(), 6);
        assert!(images.cache().path_for_key("remote1").is_none());

        // Served from memory afterwards without another fetch
        let again = images
            .fetch_and_cache("remote1", "https://example.com/x.png", || {})
            .await
            .unwrap();
        assert_eq!(again, image);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_without_fetcher() {
        let dir = tempdir().unwrap();
        let images = image_cache(dir.path());
        let mut notified = false;

        let result = images
            .fetch_and_cache("remote1", "https://example.com/x.png", || notified = true)
            .await;
        assert!(matches!(result, Err(CacheError::Fetch(_))));
        assert!(!notified);
    }

    #[tokio::test]
    async fn test_fetch_replaces_undecodable_entry() {
        let dir = tempdir().unwrap();
        let bytes = png(4, 4);
        let fetcher = StaticFetcher::new(Some(bytes.clone()));
        let images = image_cache(dir.path()).with_fetcher(fetcher.clone());
        images.cache().set_object(&b"corrupt"[..], "remote1").unwrap();

        let image = images
            .fetch_and_cache("remote1", "https://example.com/x.png", || {})
            .await
            .unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            images.cache().object_for_key("remote1").unwrap().as_ref(),
            bytes.as_slice()
        );
    }
}
