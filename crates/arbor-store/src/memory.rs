use std::collections::HashMap;
use std::sync::RwLock;

use arbor_crypto::ContentHasher;
use arbor_types::ContentId;
use bytes::Bytes;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BackingStore, StoreStats};

/// In-memory, HashMap-based backing store.
///
/// Intended for tests and embedding. All pages are held in memory behind a
/// `RwLock` for safe concurrent access. Page bodies are reference-counted
/// [`Bytes`], so reads never copy.
pub struct InMemoryBackingStore {
    hasher: ContentHasher,
    pages: RwLock<HashMap<ContentId, Bytes>>,
}

impl InMemoryBackingStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_hasher(ContentHasher::PAGE)
    }

    /// Create a store that derives ids with the given hasher.
    pub fn with_hasher(hasher: ContentHasher) -> Self {
        Self {
            hasher,
            pages: RwLock::new(HashMap::new()),
        }
    }

    /// Number of pages currently stored.
    pub fn len(&self) -> usize {
        self.pages.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.pages.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored pages.
    pub fn total_bytes(&self) -> u64 {
        self.pages
            .read()
            .expect("lock poisoned")
            .values()
            .map(|page| page.len() as u64)
            .sum()
    }

    /// Object count and byte totals.
    pub fn stats(&self) -> StoreStats {
        let map = self.pages.read().expect("lock poisoned");
        StoreStats {
            objects: map.len(),
            bytes: map.values().map(|page| page.len() as u64).sum(),
        }
    }

    /// Remove all pages from the store.
    pub fn clear(&self) {
        self.pages.write().expect("lock poisoned").clear();
    }

    /// Return a sorted list of all content ids in the store.
    pub fn all_ids(&self) -> Vec<ContentId> {
        let map = self.pages.read().expect("lock poisoned");
        let mut ids: Vec<ContentId> = map.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Place bytes under an arbitrary id, bypassing hashing.
    #[cfg(test)]
    pub(crate) fn plant(&self, id: ContentId, bytes: &[u8]) {
        self.pages
            .write()
            .expect("lock poisoned")
            .insert(id, Bytes::copy_from_slice(bytes));
    }
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for InMemoryBackingStore {
    fn lookup(&self, id: &ContentId) -> StoreResult<Bytes> {
        let map = self.pages.read().expect("lock poisoned");
        map.get(id).cloned().ok_or(StoreError::MissingData(*id))
    }

    fn bulk_lookup(
        &self,
        ids: &[ContentId],
        consumer: &mut dyn FnMut(ContentId, Bytes),
    ) -> StoreResult<()> {
        // Resolve everything under one read lock, then release it before
        // handing pages to the consumer.
        let found: Vec<(ContentId, Bytes)> = {
            let map = self.pages.read().expect("lock poisoned");
            ids.iter()
                .map(|id| {
                    map.get(id)
                        .cloned()
                        .map(|bytes| (*id, bytes))
                        .ok_or(StoreError::MissingData(*id))
                })
                .collect::<StoreResult<_>>()?
        };
        for (id, bytes) in found {
            consumer(id, bytes);
        }
        Ok(())
    }

    fn allocate(&self, bytes: &[u8]) -> StoreResult<ContentId> {
        let id = self.hasher.hash(bytes);
        let mut map = self.pages.write().expect("lock poisoned");
        match map.get(&id) {
            Some(existing) if existing.as_ref() == bytes => {}
            Some(existing) => {
                return Err(StoreError::HashCollision {
                    id,
                    existing_len: existing.len(),
                    incoming_len: bytes.len(),
                });
            }
            None => {
                map.insert(id, Bytes::copy_from_slice(bytes));
            }
        }
        Ok(id)
    }

    fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        let map = self.pages.read().expect("lock poisoned");
        Ok(map.contains_key(id))
    }
}

impl std::fmt::Debug for InMemoryBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len();
        f.debug_struct("InMemoryBackingStore")
            .field("page_count", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Core lookup / allocate
    // -----------------------------------------------------------------------

    #[test]
    fn allocate_and_lookup() {
        let store = InMemoryBackingStore::new();
        let id = store.allocate(b"hello world").unwrap();
        let read_back = store.lookup(&id).unwrap();
        assert_eq!(read_back.as_ref(), b"hello world");
    }

    #[test]
    fn lookup_missing_is_missing_data() {
        let store = InMemoryBackingStore::new();
        let id = ContentHasher::PAGE.hash(b"never written");
        let err = store.lookup(&id).unwrap_err();
        assert!(matches!(err, StoreError::MissingData(missing) if missing == id));
        assert!(err.is_fatal());
    }

    #[test]
    fn contains_reports_presence() {
        let store = InMemoryBackingStore::new();
        let id = store.allocate(b"present").unwrap();
        assert!(store.contains(&id).unwrap());
        assert!(!store.contains(&ContentHasher::PAGE.hash(b"absent")).unwrap());
    }

    // -----------------------------------------------------------------------
    // Content-addressing correctness
    // -----------------------------------------------------------------------

    #[test]
    fn allocate_is_idempotent() {
        let store = InMemoryBackingStore::new();
        let id1 = store.allocate(b"identical content").unwrap();
        let id2 = store.allocate(b"identical content").unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 17);
    }

    #[test]
    fn different_content_produces_different_ids() {
        let store = InMemoryBackingStore::new();
        let id1 = store.allocate(b"aaa").unwrap();
        let id2 = store.allocate(b"bbb").unwrap();
        assert_ne!(id1, id2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn collision_is_rejected_and_not_overwritten() {
        let store = InMemoryBackingStore::new();
        let id = ContentHasher::PAGE.hash(b"real content");
        store.plant(id, b"impostor");

        let err = store.allocate(b"real content").unwrap_err();
        assert!(matches!(
            err,
            StoreError::HashCollision {
                existing_len: 8,
                incoming_len: 12,
                ..
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(store.lookup(&id).unwrap().as_ref(), b"impostor");
    }

    // -----------------------------------------------------------------------
    // Batch operations
    // -----------------------------------------------------------------------

    #[test]
    fn allocate_batch_and_bulk_lookup() {
        let store = InMemoryBackingStore::new();
        let pages = vec![
            Bytes::from_static(b"batch-1"),
            Bytes::from_static(b"batch-2"),
            Bytes::from_static(b"batch-3"),
        ];
        let ids = store.allocate_batch(&pages).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(store.len(), 3);

        let mut seen = HashMap::new();
        store
            .bulk_lookup(&ids, &mut |id, bytes| {
                seen.insert(id, bytes);
            })
            .unwrap();
        for (id, page) in ids.iter().zip(&pages) {
            assert_eq!(&seen[id], page);
        }
    }

    #[test]
    fn bulk_lookup_fails_on_missing() {
        let store = InMemoryBackingStore::new();
        let present = store.allocate(b"exists").unwrap();
        let missing = ContentHasher::PAGE.hash(b"missing");

        let mut delivered = 0;
        let err = store
            .bulk_lookup(&[present, missing], &mut |_, _| delivered += 1)
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingData(id) if id == missing));
        assert_eq!(delivered, 0);
    }

    // -----------------------------------------------------------------------
    // Utility methods
    // -----------------------------------------------------------------------

    #[test]
    fn stats_and_clear() {
        let store = InMemoryBackingStore::default();
        assert!(store.is_empty());
        store.allocate(b"12345").unwrap();
        store.allocate(b"123456789").unwrap();
        assert_eq!(
            store.stats(),
            StoreStats {
                objects: 2,
                bytes: 14
            }
        );

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn all_ids_is_sorted() {
        let store = InMemoryBackingStore::new();
        for data in [b"aaa", b"bbb", b"ccc"] {
            store.allocate(data).unwrap();
        }
        let ids = store.all_ids();
        assert_eq!(ids.len(), 3);
        for w in ids.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn concurrent_reads_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InMemoryBackingStore::new());
        let id = store.allocate(b"shared data").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let bytes = store.lookup(&id).unwrap();
                    assert_eq!(ContentHasher::PAGE.hash(&bytes), id);
                })
            })
            .collect();

        for h in handles {
            h.join().expect("thread should not panic");
        }
    }

    #[test]
    fn debug_format() {
        let store = InMemoryBackingStore::new();
        store.allocate(b"x").unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryBackingStore"));
        assert!(debug.contains("page_count"));
    }
}
