use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use arbor_types::ContentId;
use bytes::Bytes;
use lru::LruCache;
use tracing::{debug, trace};

use crate::error::StoreResult;
use crate::traits::{BackingStore, PrefetchHint};

/// Hit/miss counters of a [`CachedStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub prefetched: u64,
}

/// LRU page cache in front of another store.
///
/// The cache is owned here and nowhere else: trees reach it only through
/// `lookup`, `bulk_lookup` and `prefetch`. Pages are immutable, so cached
/// bodies never need invalidation.
pub struct CachedStore<S> {
    inner: S,
    cache: Mutex<LruCache<ContentId, Bytes>>,
    hits: AtomicU64,
    misses: AtomicU64,
    prefetched: AtomicU64,
}

impl<S: BackingStore> CachedStore<S> {
    /// Wrap `inner` with a cache holding up to `capacity` pages.
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            prefetched: AtomicU64::new(0),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of pages currently cached.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().expect("lock poisoned").len()
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            prefetched: self.prefetched.load(Ordering::Relaxed),
        }
    }

    fn cache_get(&self, id: &ContentId) -> Option<Bytes> {
        self.cache.lock().expect("lock poisoned").get(id).cloned()
    }

    fn cache_put(&self, id: ContentId, bytes: Bytes) {
        if let Some((evicted, _)) = self.cache.lock().expect("lock poisoned").push(id, bytes) {
            if evicted != id {
                trace!(evicted = %evicted.short_hex(), "page cache eviction");
            }
        }
    }
}

impl<S: BackingStore> BackingStore for CachedStore<S> {
    fn lookup(&self, id: &ContentId) -> StoreResult<Bytes> {
        if let Some(bytes) = self.cache_get(id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(bytes);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let bytes = self.inner.lookup(id)?;
        self.cache_put(*id, bytes.clone());
        Ok(bytes)
    }

    fn bulk_lookup(
        &self,
        ids: &[ContentId],
        consumer: &mut dyn FnMut(ContentId, Bytes),
    ) -> StoreResult<()> {
        let mut missing = Vec::new();
        let mut hits = Vec::new();
        {
            let mut cache = self.cache.lock().expect("lock poisoned");
            for id in ids {
                match cache.get(id) {
                    Some(bytes) => hits.push((*id, bytes.clone())),
                    None => missing.push(*id),
                }
            }
        }
        self.hits.fetch_add(hits.len() as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);
        for (id, bytes) in hits {
            consumer(id, bytes);
        }
        if missing.is_empty() {
            return Ok(());
        }
        self.inner.bulk_lookup(&missing, &mut |id, bytes| {
            self.cache_put(id, bytes.clone());
            consumer(id, bytes);
        })
    }

    fn allocate(&self, bytes: &[u8]) -> StoreResult<ContentId> {
        let id = self.inner.allocate(bytes)?;
        self.cache_put(id, Bytes::copy_from_slice(bytes));
        Ok(id)
    }

    fn allocate_batch(&self, pages: &[Bytes]) -> StoreResult<Vec<ContentId>> {
        let ids = self.inner.allocate_batch(pages)?;
        for (id, page) in ids.iter().zip(pages) {
            self.cache_put(*id, page.clone());
        }
        Ok(ids)
    }

    fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        if self.cache.lock().expect("lock poisoned").contains(id) {
            return Ok(true);
        }
        self.inner.contains(id)
    }

    fn prefetch(&self, id: &ContentId, bytes: &[u8], hint: &PrefetchHint<'_>) {
        self.cache_put(*id, Bytes::copy_from_slice(bytes));

        let wanted: Vec<ContentId> = {
            let cache = self.cache.lock().expect("lock poisoned");
            hint.targets().filter(|t| !cache.contains(t)).collect()
        };
        if !wanted.is_empty() {
            let mut loaded = 0u64;
            let result = self.inner.bulk_lookup(&wanted, &mut |child, body| {
                self.cache_put(child, body);
                loaded += 1;
            });
            self.prefetched.fetch_add(loaded, Ordering::Relaxed);
            if let Err(e) = result {
                // Prefetch is advisory; the real lookup will surface the error.
                debug!(page = %id.short_hex(), error = %e, "prefetch failed");
            }
        }
        self.inner.prefetch(id, bytes, hint);
    }
}

impl<S> std::fmt::Debug for CachedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStore")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackingStore;
    use arbor_types::PageKind;

    #[test]
    fn second_lookup_hits_cache() {
        let store = CachedStore::new(InMemoryBackingStore::new(), 16);
        let id = store.inner().allocate(b"page").unwrap();

        store.lookup(&id).unwrap();
        store.lookup(&id).unwrap();
        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn allocate_populates_cache() {
        let store = CachedStore::new(InMemoryBackingStore::new(), 16);
        let id = store.allocate(b"fresh").unwrap();
        assert_eq!(store.cached_len(), 1);
        assert_eq!(store.lookup(&id).unwrap().as_ref(), b"fresh");
        assert_eq!(store.stats().hits, 1);
    }

    #[test]
    fn capacity_bounds_the_cache() {
        let store = CachedStore::new(InMemoryBackingStore::new(), 2);
        for i in 0..5u8 {
            store.allocate(&[i]).unwrap();
        }
        assert_eq!(store.cached_len(), 2);
        assert_eq!(store.inner().len(), 5);
    }

    #[test]
    fn bulk_lookup_mixes_hits_and_misses() {
        let store = CachedStore::new(InMemoryBackingStore::new(), 16);
        let cached = store.allocate(b"cached").unwrap();
        let cold = store.inner().allocate(b"cold").unwrap();

        let mut seen = Vec::new();
        store
            .bulk_lookup(&[cached, cold], &mut |id, _| seen.push(id))
            .unwrap();
        seen.sort();
        let mut expected = vec![cached, cold];
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(store.stats().hits, 1);
        assert_eq!(store.stats().misses, 1);
        assert_eq!(store.cached_len(), 2);
    }

    #[test]
    fn prefetch_warms_masked_children() {
        let store = CachedStore::new(InMemoryBackingStore::new(), 16);
        let children: Vec<_> = (0..4u8)
            .map(|i| store.inner().allocate(&[i]).unwrap())
            .collect();
        let parent = ContentId::new(9, 9);
        let hint = PrefetchHint {
            root: None,
            size_hint: 2,
            kind: PageKind::Leaf,
            children: &children,
            mask: 0b0110,
        };
        store.prefetch(&parent, b"parent", &hint);

        assert_eq!(store.stats().prefetched, 2);
        store.lookup(&children[1]).unwrap();
        store.lookup(&children[2]).unwrap();
        assert_eq!(store.stats().misses, 0);
        store.lookup(&children[0]).unwrap();
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn prefetch_of_missing_child_is_silent() {
        let store = CachedStore::new(InMemoryBackingStore::new(), 16);
        let children = [ContentId::new(1, 1)];
        let hint = PrefetchHint {
            root: None,
            size_hint: 1,
            kind: PageKind::Leaf,
            children: &children,
            mask: 1,
        };
        store.prefetch(&ContentId::new(2, 2), b"parent", &hint);
        assert_eq!(store.stats().prefetched, 0);
    }
}
