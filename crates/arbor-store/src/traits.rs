use std::sync::Arc;

use arbor_types::{ContentId, PageKind};
use bytes::Bytes;

use crate::error::StoreResult;

/// Advisory information passed to [`BackingStore::prefetch`].
///
/// Describes a page that a traversal has just decoded and which of its
/// children it is about to visit. Stores with a cache can use it to pull
/// those children in ahead of the next lookup; stores without one ignore it.
#[derive(Clone, Copy, Debug)]
pub struct PrefetchHint<'a> {
    /// Root of the tree being traversed, when it is committed.
    pub root: Option<ContentId>,
    /// Approximate number of entries the traversal expects to read next.
    pub size_hint: usize,
    /// Kind of the pages named in `children`.
    pub kind: PageKind,
    /// Committed children of the page, in key order.
    pub children: &'a [ContentId],
    /// Bit `i` is set when `children[i]` is about to be visited.
    pub mask: u64,
}

impl<'a> PrefetchHint<'a> {
    /// Children selected by the mask, in key order.
    ///
    /// Only the first 64 children are addressable by the mask.
    pub fn targets(&self) -> impl Iterator<Item = ContentId> + 'a {
        let mask = self.mask;
        let children = self.children;
        children
            .iter()
            .take(64)
            .enumerate()
            .filter(move |(i, _)| mask & (1u64 << *i) != 0)
            .map(|(_, id)| *id)
    }
}

/// Object count and byte totals reported by a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of distinct objects held.
    pub objects: usize,
    /// Total payload bytes held (before any compression).
    pub bytes: u64,
}

/// Content-addressed page store consumed by the tree.
///
/// All implementations must satisfy these invariants:
/// - Pages are immutable once allocated. The same bytes always produce the
///   same id, and allocating them again is a no-op.
/// - Two different byte strings under one id are rejected with
///   [`StoreError::HashCollision`](crate::StoreError::HashCollision), never
///   overwritten.
/// - Looking up an unknown id fails with
///   [`StoreError::MissingData`](crate::StoreError::MissingData).
/// - Concurrent reads are always safe (pages are immutable).
/// - The store never interprets page contents.
/// - I/O errors are propagated unchanged; there is no implicit retry.
pub trait BackingStore: Send + Sync {
    /// Fetch one committed page.
    fn lookup(&self, id: &ContentId) -> StoreResult<Bytes>;

    /// Fetch several pages, handing each `(id, bytes)` pair to `consumer`.
    ///
    /// Delivery order is not significant. Default implementation calls
    /// `lookup()` for each ID; remote backends should override it to cut
    /// round trips.
    fn bulk_lookup(
        &self,
        ids: &[ContentId],
        consumer: &mut dyn FnMut(ContentId, Bytes),
    ) -> StoreResult<()> {
        for id in ids {
            let bytes = self.lookup(id)?;
            consumer(*id, bytes);
        }
        Ok(())
    }

    /// Persist bytes under their content id and return the id.
    ///
    /// Idempotent: allocating identical bytes twice stores them once.
    fn allocate(&self, bytes: &[u8]) -> StoreResult<ContentId>;

    /// Persist several pages and return their ids in input order.
    ///
    /// Default implementation calls `allocate()` for each page. Backends may
    /// override for better performance (e.g., single fsync).
    fn allocate_batch(&self, pages: &[Bytes]) -> StoreResult<Vec<ContentId>> {
        pages.iter().map(|page| self.allocate(page)).collect()
    }

    /// Check whether a page exists in the store.
    fn contains(&self, id: &ContentId) -> StoreResult<bool>;

    /// Advisory cache warm-up. Must never fail; the default does nothing.
    fn prefetch(&self, id: &ContentId, bytes: &[u8], hint: &PrefetchHint<'_>) {
        let _ = (id, bytes, hint);
    }
}

impl<S: BackingStore + ?Sized> BackingStore for Arc<S> {
    fn lookup(&self, id: &ContentId) -> StoreResult<Bytes> {
        (**self).lookup(id)
    }

    fn bulk_lookup(
        &self,
        ids: &[ContentId],
        consumer: &mut dyn FnMut(ContentId, Bytes),
    ) -> StoreResult<()> {
        (**self).bulk_lookup(ids, consumer)
    }

    fn allocate(&self, bytes: &[u8]) -> StoreResult<ContentId> {
        (**self).allocate(bytes)
    }

    fn allocate_batch(&self, pages: &[Bytes]) -> StoreResult<Vec<ContentId>> {
        (**self).allocate_batch(pages)
    }

    fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        (**self).contains(id)
    }

    fn prefetch(&self, id: &ContentId, bytes: &[u8], hint: &PrefetchHint<'_>) {
        (**self).prefetch(id, bytes, hint)
    }
}
