//! Image blob cache with explicit lifetimes.
//!
//! [`ImageBlobCache`] maps `(entity, variant)` to a local resource URL
//! allocated from an [`ObjectUrlStore`]. Local URLs are never collected
//! implicitly: every URL handed out by [`ImageBlobCache::ensure`] stays
//! live until [`release`](ImageBlobCache::release) or
//! [`release_all`](ImageBlobCache::release_all) revokes it.
//!
//! Concurrent `ensure` calls for the same key share one in-flight fetch
//! (a [`Shared`] future), so there is one network request and one URL
//! allocation per key. Fetches are never cancelled; a fetch that resolves
//! after its entity was released is discarded without installing anything.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use shotline_client::images::{ImageFetcher, ImageVariant};
use shotline_core::types::CaptureId;

// ---------------------------------------------------------------------------
// Local resource URLs
// ---------------------------------------------------------------------------

/// A renderable local URL (`blob:<uuid>`) for fetched image bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalUrl(String);

impl LocalUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocator for local resource URLs.
pub trait ObjectUrlStore: Send + Sync {
    fn allocate(&self, bytes: Vec<u8>, content_type: &str) -> LocalUrl;

    /// Free the resource behind `url`. Returns `false` if it was not live.
    fn revoke(&self, url: &LocalUrl) -> bool;
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-process [`ObjectUrlStore`].
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<LocalUrl, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of URLs allocated and not yet revoked.
    pub fn live_count(&self) -> usize {
        self.objects().len()
    }

    pub fn is_live(&self, url: &LocalUrl) -> bool {
        self.objects().contains_key(url)
    }

    /// Bytes and content type behind a live URL.
    pub fn read(&self, url: &LocalUrl) -> Option<(Vec<u8>, String)> {
        self.objects()
            .get(url)
            .map(|object| (object.bytes.clone(), object.content_type.clone()))
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<LocalUrl, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObjectUrlStore for MemoryObjectStore {
    fn allocate(&self, bytes: Vec<u8>, content_type: &str) -> LocalUrl {
        let url = LocalUrl(format!("blob:{}", uuid::Uuid::new_v4()));
        self.objects().insert(
            url.clone(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        url
    }

    fn revoke(&self, url: &LocalUrl) -> bool {
        self.objects().remove(url).is_some()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Errors from [`ImageBlobCache::ensure`]. Cloneable so every coalesced
/// waiter receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    /// No bearer token available; nothing was requested.
    #[error("Not signed in: no token for image requests")]
    MissingToken,

    #[error("Image fetch failed: {0}")]
    Fetch(String),

    /// The entity was released while the fetch was in flight.
    #[error("Image was released before the fetch completed")]
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    pub entity_id: CaptureId,
    pub variant: ImageVariant,
}

impl BlobKey {
    pub fn new(entity_id: CaptureId, variant: ImageVariant) -> Self {
        Self { entity_id, variant }
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<LocalUrl, BlobError>>>;

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct CacheState {
    ready: HashMap<BlobKey, LocalUrl>,
    in_flight: HashMap<BlobKey, InFlight>,
    next_generation: u64,
}

/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct ImageBlobCache {
    state: Arc<Mutex<CacheState>>,
    fetcher: Arc<dyn ImageFetcher>,
    objects: Arc<dyn ObjectUrlStore>,
}

impl ImageBlobCache {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, objects: Arc<dyn ObjectUrlStore>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            fetcher,
            objects,
        }
    }

    /// Cached URL, if any. Never fetches.
    pub fn get(&self, entity_id: &CaptureId, variant: ImageVariant) -> Option<LocalUrl> {
        self.lock()
            .ready
            .get(&BlobKey::new(entity_id.clone(), variant))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ready.is_empty()
    }

    /// Number of fetches currently in flight.
    pub fn pending(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Return the cached URL or fetch, allocate and cache it.
    ///
    /// Without a token this fails with [`BlobError::MissingToken`] before
    /// any request is made. A failed fetch leaves the entry absent; there
    /// is no automatic retry.
    pub async fn ensure(
        &self,
        entity_id: &CaptureId,
        variant: ImageVariant,
        token: Option<&str>,
    ) -> Result<LocalUrl, BlobError> {
        let key = BlobKey::new(entity_id.clone(), variant);

        let fetch = {
            let mut state = self.lock();
            if let Some(url) = state.ready.get(&key) {
                return Ok(url.clone());
            }
            if let Some(in_flight) = state.in_flight.get(&key) {
                in_flight.fetch.clone()
            } else {
                let Some(token) = token.filter(|t| !t.is_empty()) else {
                    return Err(BlobError::MissingToken);
                };
                let generation = state.next_generation;
                state.next_generation += 1;
                let fetch = fetch_and_install(
                    Arc::downgrade(&self.state),
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.objects),
                    key.clone(),
                    generation,
                    token.to_string(),
                )
                .boxed()
                .shared();
                state.in_flight.insert(
                    key,
                    InFlight {
                        generation,
                        fetch: fetch.clone(),
                    },
                );
                fetch
            }
        };

        fetch.await
    }

    /// Revoke every variant cached for `entity_id` and detach its in-flight
    /// fetches. Returns the number of URLs revoked.
    pub fn release(&self, entity_id: &CaptureId) -> usize {
        let urls: Vec<LocalUrl> = {
            let mut state = self.lock();
            state.in_flight.retain(|key, _| key.entity_id != *entity_id);
            let keys: Vec<BlobKey> = state
                .ready
                .keys()
                .filter(|key| key.entity_id == *entity_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|key| state.ready.remove(key)).collect()
        };
        for url in &urls {
            self.objects.revoke(url);
        }
        if !urls.is_empty() {
            tracing::debug!(entity_id = %entity_id, count = urls.len(), "Released image blobs");
        }
        urls.len()
    }

    /// Revoke everything. Called when the owning session closes.
    pub fn release_all(&self) -> usize {
        let urls: Vec<LocalUrl> = {
            let mut state = self.lock();
            state.in_flight.clear();
            state.ready.drain().map(|(_, url)| url).collect()
        };
        for url in &urls {
            self.objects.revoke(url);
        }
        urls.len()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ImageBlobCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ImageBlobCache")
            .field("ready", &state.ready.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

/// Body of a shared fetch. Installs the result only if its in-flight entry
/// is still the one that started it.
async fn fetch_and_install(
    state: Weak<Mutex<CacheState>>,
    fetcher: Arc<dyn ImageFetcher>,
    objects: Arc<dyn ObjectUrlStore>,
    key: BlobKey,
    generation: u64,
    token: String,
) -> Result<LocalUrl, BlobError> {
    let result = fetcher.fetch(&key.entity_id, key.variant, &token).await;

    let Some(state) = state.upgrade() else {
        return Err(BlobError::Released);
    };
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    let still_wanted = state
        .in_flight
        .get(&key)
        .is_some_and(|in_flight| in_flight.generation == generation);
    if still_wanted {
        state.in_flight.remove(&key);
    }

    let image = match result {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!(
                entity_id = %key.entity_id,
                variant = %key.variant,
                error = %e,
                "Image fetch failed",
            );
            return Err(BlobError::Fetch(e.to_string()));
        }
    };

    if !still_wanted {
        tracing::debug!(entity_id = %key.entity_id, "Discarding image fetched after release");
        return Err(BlobError::Released);
    }

    let url = objects.allocate(image.bytes, &image.content_type);
    state.ready.insert(key, url.clone());
    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use shotline_client::images::{ImageBytes, ImageFetchError};
    use tokio::sync::Notify;

    use super::*;

    /// Counts requests; optionally parks each fetch until released.
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    #[async_trait]
    impl ImageFetcher for CountingFetcher {
        async fn fetch(
            &self,
            id: &CaptureId,
            variant: ImageVariant,
            _token: &str,
        ) -> Result<ImageBytes, ImageFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(ImageFetchError::Status { status: 403 });
            }
            Ok(ImageBytes {
                bytes: format!("{id}:{variant}").into_bytes(),
                content_type: "image/png".into(),
            })
        }
    }

    fn cache_with(fetcher: CountingFetcher) -> (ImageBlobCache, Arc<CountingFetcher>, Arc<MemoryObjectStore>) {
        let fetcher = Arc::new(fetcher);
        let objects = Arc::new(MemoryObjectStore::new());
        let cache = ImageBlobCache::new(fetcher.clone(), objects.clone());
        (cache, fetcher, objects)
    }

    #[tokio::test]
    async fn ensure_fetches_once_and_caches() {
        let (cache, fetcher, objects) = cache_with(CountingFetcher::default());
        let id = CaptureId::from("42");

        assert!(cache.get(&id, ImageVariant::Thumbnail).is_none());
        let url = cache.ensure(&id, ImageVariant::Thumbnail, Some("t")).await.unwrap();
        let again = cache.ensure(&id, ImageVariant::Thumbnail, Some("t")).await.unwrap();

        assert_eq!(url, again);
        assert_eq!(cache.get(&id, ImageVariant::Thumbnail), Some(url.clone()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(objects.read(&url).unwrap().0, b"42:thumbnail".to_vec());
    }

    #[tokio::test]
    async fn missing_token_short_circuits() {
        let (cache, fetcher, _) = cache_with(CountingFetcher::default());
        let id = CaptureId::from("42");

        assert_eq!(
            cache.ensure(&id, ImageVariant::Full, None).await,
            Err(BlobError::MissingToken)
        );
        assert_eq!(
            cache.ensure(&id, ImageVariant::Full, Some("")).await,
            Err(BlobError::MissingToken)
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_ensures_are_coalesced() {
        let gate = Arc::new(Notify::new());
        let (cache, fetcher, objects) = cache_with(CountingFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let id = CaptureId::from("42");

        let a = tokio::spawn({
            let cache = cache.clone();
            let id = id.clone();
            async move { cache.ensure(&id, ImageVariant::Full, Some("t")).await }
        });
        let b = tokio::spawn({
            let cache = cache.clone();
            let id = id.clone();
            async move { cache.ensure(&id, ImageVariant::Full, Some("t")).await }
        });
        while fetcher.calls.load(Ordering::SeqCst) == 0 || cache.pending() == 0 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(objects.live_count(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_entry_absent() {
        let (cache, fetcher, objects) = cache_with(CountingFetcher {
            fail: true,
            ..Default::default()
        });
        let id = CaptureId::from("42");

        let err = cache.ensure(&id, ImageVariant::Thumbnail, Some("t")).await.unwrap_err();
        assert!(matches!(err, BlobError::Fetch(_)));
        assert!(cache.get(&id, ImageVariant::Thumbnail).is_none());
        assert_eq!(cache.pending(), 0);
        assert_eq!(objects.live_count(), 0);

        // An explicit second call is a manual retry and hits the network again.
        let _ = cache.ensure(&id, ImageVariant::Thumbnail, Some("t")).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn release_revokes_all_variants() {
        let (cache, _, objects) = cache_with(CountingFetcher::default());
        let id = CaptureId::from("42");
        cache.ensure(&id, ImageVariant::Thumbnail, Some("t")).await.unwrap();
        cache.ensure(&id, ImageVariant::Full, Some("t")).await.unwrap();
        cache.ensure(&CaptureId::from("43"), ImageVariant::Full, Some("t")).await.unwrap();

        assert_eq!(cache.release(&id), 2);

        assert!(cache.get(&id, ImageVariant::Thumbnail).is_none());
        assert!(cache.get(&id, ImageVariant::Full).is_none());
        assert_eq!(objects.live_count(), 1);
        assert_eq!(cache.release_all(), 1);
        assert_eq!(objects.live_count(), 0);
    }

    #[tokio::test]
    async fn fetch_resolving_after_release_is_discarded() {
        let gate = Arc::new(Notify::new());
        let (cache, fetcher, objects) = cache_with(CountingFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let id = CaptureId::from("42");

        let pending = tokio::spawn({
            let cache = cache.clone();
            let id = id.clone();
            async move { cache.ensure(&id, ImageVariant::Full, Some("t")).await }
        });
        while fetcher.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        cache.release(&id);
        gate.notify_one();

        assert_eq!(pending.await.unwrap(), Err(BlobError::Released));
        assert!(cache.get(&id, ImageVariant::Full).is_none());
        assert_eq!(objects.live_count(), 0);
    }
}
