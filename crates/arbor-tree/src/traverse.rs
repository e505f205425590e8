//! In-order traversal: single-page and bulk-batched.

use std::collections::HashMap;

use arbor_store::PrefetchHint;
use arbor_types::{ContentId, PageKind, PageRef};
use bytes::Bytes;
use tracing::trace;

use crate::accessor::{check_blob_len, decode_at, Accessor};
use crate::error::{TreeError, TreeResult};
use crate::page::{InternalPage, LeafPage, LeafValue, Page};
use crate::tree::PersistentTree;

impl PersistentTree {
    /// Visit every entry in ascending key order.
    ///
    /// Stops as soon as `pred` returns `false`. Returns `true` if every entry
    /// was visited.
    pub fn for_each<F>(&self, acc: &Accessor<'_>, mut pred: F) -> TreeResult<bool>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        match self.root() {
            None => Ok(true),
            Some(root) => visit(acc, root, None, &mut pred),
        }
    }

    /// Visit entries with keys `>= start` in ascending order, with the same
    /// stopping rule as [`for_each`](Self::for_each).
    pub fn for_each_from<F>(&self, acc: &Accessor<'_>, start: &[u8], mut pred: F) -> TreeResult<bool>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        match self.root() {
            None => Ok(true),
            Some(root) => visit(acc, root, Some(start), &mut pred),
        }
    }

    /// Same contract and order as [`for_each`](Self::for_each), but pages are
    /// fetched through `bulk_lookup` roughly `chunk_size` entries at a time,
    /// and the store is told which pages the next batch will need.
    pub fn for_each_bulk<F>(&self, acc: &Accessor<'_>, chunk_size: usize, mut pred: F) -> TreeResult<bool>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let Some(root) = self.root() else {
            return Ok(true);
        };
        let batch_pages = (chunk_size / self.config().max_fanout).max(1);
        let bulk = Bulk {
            acc,
            root: self.committed_root(),
            chunk_size,
            batch_pages,
        };
        let (bytes, page) = acc.load_raw(root)?;
        bulk.visit(root, &bytes, page, &mut pred)
    }
}

fn visit<F>(acc: &Accessor<'_>, at: PageRef, start: Option<&[u8]>, pred: &mut F) -> TreeResult<bool>
where
    F: FnMut(&[u8], &[u8]) -> bool,
{
    match acc.load(at)? {
        Page::Leaf(leaf) => {
            let first = start.map_or(0, |s| leaf.lower_bound(s));
            for (key, value) in leaf.keys.iter().zip(&leaf.values).skip(first) {
                let keep_going = match value {
                    LeafValue::Inline(bytes) => pred(key, bytes),
                    blob => pred(key, &acc.load_value(blob)?),
                };
                if !keep_going {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Page::Internal(node) => {
            let first = start.map_or(0, |s| node.child_index(s));
            for (i, child) in node.children.iter().enumerate().skip(first) {
                let bound = if i == first { start } else { None };
                if !visit(acc, *child, bound, pred)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

/// State shared by one bulk traversal.
struct Bulk<'a, 's> {
    acc: &'a Accessor<'s>,
    root: Option<ContentId>,
    chunk_size: usize,
    batch_pages: usize,
}

impl Bulk<'_, '_> {
    fn visit<F>(&self, at: PageRef, bytes: &Bytes, page: Page, pred: &mut F) -> TreeResult<bool>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        match page {
            Page::Leaf(leaf) => self.visit_leaf(&leaf, pred),
            Page::Internal(node) => self.visit_internal(at, bytes, &node, pred),
        }
    }

    fn visit_internal<F>(
        &self,
        at: PageRef,
        bytes: &Bytes,
        node: &InternalPage,
        pred: &mut F,
    ) -> TreeResult<bool>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        // A committed page only ever points at committed pages.
        let committed: Option<Vec<ContentId>> =
            node.children.iter().map(|c| c.content_id()).collect();

        let batches: Vec<&[PageRef]> = node.children.chunks(self.batch_pages).collect();
        for (n, batch) in batches.iter().enumerate() {
            let mut fetched = self.fetch_batch(batch)?;
            if let (Some(parent), Some(children)) = (at.content_id(), committed.as_deref()) {
                if let Some(next) = batches.get(n + 1) {
                    let first = (n + 1) * self.batch_pages;
                    let kind = fetched
                        .first()
                        .map(|(_, _, p)| p.kind())
                        .unwrap_or(PageKind::Leaf);
                    let hint = PrefetchHint {
                        root: self.root,
                        size_hint: self.chunk_size,
                        kind,
                        children,
                        mask: child_mask(first, next.len()),
                    };
                    trace!(page = %parent.short_hex(), next = next.len(), "prefetch hint");
                    self.acc.store().prefetch(&parent, bytes, &hint);
                }
            }
            for (child, child_bytes, page) in fetched.drain(..) {
                if !self.visit(child, &child_bytes, page, pred)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn visit_leaf<F>(&self, leaf: &LeafPage, pred: &mut F) -> TreeResult<bool>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let blobs = self.fetch_blobs(leaf)?;
        for (key, value) in leaf.keys.iter().zip(&leaf.values) {
            let keep_going = match value {
                LeafValue::Inline(bytes) => pred(key, bytes),
                LeafValue::Blob { target, len } => {
                    let body = match target {
                        PageRef::Committed(id) => blobs.get(id).cloned().ok_or_else(|| {
                            TreeError::CorruptPage {
                                page: *target,
                                reason: "value blob missing from bulk fetch".into(),
                            }
                        })?,
                        PageRef::Local(id) => self.acc.arena().resolve(*id)?,
                    };
                    check_blob_len(*target, &body, *len)?;
                    pred(key, &body)
                }
            };
            if !keep_going {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Load a run of sibling pages, committed ones in a single bulk lookup.
    fn fetch_batch(&self, batch: &[PageRef]) -> TreeResult<Vec<(PageRef, Bytes, Page)>> {
        let ids: Vec<ContentId> = batch.iter().filter_map(|r| r.content_id()).collect();
        let found = self.bulk_lookup(&ids)?;
        batch
            .iter()
            .map(|r| {
                let bytes = match r {
                    PageRef::Local(id) => self.acc.arena().resolve(*id)?,
                    PageRef::Committed(id) => found.get(id).cloned().ok_or_else(|| {
                        TreeError::CorruptPage {
                            page: *r,
                            reason: "page missing from bulk fetch".into(),
                        }
                    })?,
                };
                let page = decode_at(*r, &bytes)?;
                Ok((*r, bytes, page))
            })
            .collect()
    }

    fn fetch_blobs(&self, leaf: &LeafPage) -> TreeResult<HashMap<ContentId, Bytes>> {
        let ids: Vec<ContentId> = leaf
            .values
            .iter()
            .filter_map(|v| match v {
                LeafValue::Blob {
                    target: PageRef::Committed(id),
                    ..
                } => Some(*id),
                _ => None,
            })
            .collect();
        self.bulk_lookup(&ids)
    }

    fn bulk_lookup(&self, ids: &[ContentId]) -> TreeResult<HashMap<ContentId, Bytes>> {
        let mut found = HashMap::with_capacity(ids.len());
        if !ids.is_empty() {
            self.acc
                .store()
                .bulk_lookup(ids, &mut |id, bytes| {
                    found.insert(id, bytes);
                })?;
        }
        Ok(found)
    }
}

/// Mask selecting `len` children starting at `first`; bits past 63 are dropped.
fn child_mask(first: usize, len: usize) -> u64 {
    (first..first + len)
        .filter(|i| *i < 64)
        .fold(0u64, |mask, i| mask | (1u64 << i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use arbor_store::{BackingStore, InMemoryBackingStore, StoreResult};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store wrapper counting round trips.
    struct CountingStore {
        inner: InMemoryBackingStore,
        lookups: AtomicUsize,
        bulk_lookups: AtomicUsize,
        prefetches: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryBackingStore::new(),
                lookups: AtomicUsize::new(0),
                bulk_lookups: AtomicUsize::new(0),
                prefetches: AtomicUsize::new(0),
            }
        }

        fn round_trips(&self) -> usize {
            self.lookups.load(Ordering::Relaxed) + self.bulk_lookups.load(Ordering::Relaxed)
        }
    }

    impl BackingStore for CountingStore {
        fn lookup(&self, id: &ContentId) -> StoreResult<Bytes> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            self.inner.lookup(id)
        }

        fn bulk_lookup(
            &self,
            ids: &[ContentId],
            consumer: &mut dyn FnMut(ContentId, Bytes),
        ) -> StoreResult<()> {
            self.bulk_lookups.fetch_add(1, Ordering::Relaxed);
            self.inner.bulk_lookup(ids, consumer)
        }

        fn allocate(&self, bytes: &[u8]) -> StoreResult<ContentId> {
            self.inner.allocate(bytes)
        }

        fn contains(&self, id: &ContentId) -> StoreResult<bool> {
            self.inner.contains(id)
        }

        fn prefetch(&self, _id: &ContentId, _bytes: &[u8], hint: &PrefetchHint<'_>) {
            assert!(hint.targets().count() > 0);
            self.prefetches.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn key(i: u32) -> Vec<u8> {
        format!("{i:06}").into_bytes()
    }

    fn build(acc: &mut Accessor<'_>, config: TreeConfig, n: u32) -> PersistentTree {
        let mut tree = PersistentTree::with_config(config).unwrap();
        for i in 0..n {
            tree.put(acc, &key(i), &i.to_be_bytes()).unwrap();
        }
        tree
    }

    fn collect_all(tree: &PersistentTree, acc: &Accessor<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        assert!(tree
            .for_each(acc, |k, v| {
                out.push((k.to_vec(), v.to_vec()));
                true
            })
            .unwrap());
        out
    }

    // -----------------------------------------------------------------------
    // for_each
    // -----------------------------------------------------------------------

    #[test]
    fn empty_tree_completes() {
        let store = InMemoryBackingStore::new();
        let acc = Accessor::new(&store);
        let tree = PersistentTree::empty();
        assert!(tree.for_each(&acc, |_, _| panic!("no entries")).unwrap());
        assert!(tree.for_each_bulk(&acc, 16, |_, _| panic!("no entries")).unwrap());
    }

    #[test]
    fn thousand_keys_visit_in_order() {
        let store = InMemoryBackingStore::new();
        let mut acc = Accessor::new(&store);
        let mut tree = build(&mut acc, TreeConfig::with_fanout(4, 8).unwrap(), 1000);
        acc.commit(&mut tree).unwrap();

        let mut seen = Vec::new();
        assert!(tree
            .for_each(&acc, |k, _| {
                seen.push(k.to_vec());
                true
            })
            .unwrap());
        assert_eq!(seen.len(), 1000);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn stops_after_ten() {
        let store = InMemoryBackingStore::new();
        let mut acc = Accessor::new(&store);
        let tree = build(&mut acc, TreeConfig::with_fanout(4, 8).unwrap(), 1000);

        let mut visits = 0;
        let done = tree
            .for_each(&acc, |_, _| {
                visits += 1;
                visits < 10
            })
            .unwrap();
        assert!(!done);
        assert_eq!(visits, 10);

        let mut visits = 0;
        let done = tree
            .for_each_bulk(&acc, 32, |_, _| {
                visits += 1;
                visits < 10
            })
            .unwrap();
        assert!(!done);
        assert_eq!(visits, 10);
    }

    // -----------------------------------------------------------------------
    // for_each_from
    // -----------------------------------------------------------------------

    #[test]
    fn range_scan_starts_at_lower_bound() {
        let store = InMemoryBackingStore::new();
        let mut acc = Accessor::new(&store);
        let tree = build(&mut acc, TreeConfig::with_fanout(2, 4).unwrap(), 300);

        let mut seen = Vec::new();
        assert!(tree
            .for_each_from(&acc, &key(250), |k, _| {
                seen.push(k.to_vec());
                true
            })
            .unwrap());
        assert_eq!(seen.len(), 50);
        assert_eq!(seen[0], key(250));

        let mut first = None;
        tree.for_each_from(&acc, b"000123x", |k, _| {
            first = Some(k.to_vec());
            false
        })
        .unwrap();
        assert_eq!(first, Some(key(124)));
    }

    #[test]
    fn range_scan_past_the_end_is_empty() {
        let store = InMemoryBackingStore::new();
        let mut acc = Accessor::new(&store);
        let tree = build(&mut acc, TreeConfig::with_fanout(2, 4).unwrap(), 40);
        let mut visits = 0;
        assert!(tree
            .for_each_from(&acc, b"999999", |_, _| {
                visits += 1;
                true
            })
            .unwrap());
        assert_eq!(visits, 0);
    }

    // -----------------------------------------------------------------------
    // for_each_bulk
    // -----------------------------------------------------------------------

    #[test]
    fn bulk_uses_fewer_round_trips() {
        let store = CountingStore::new();
        let mut acc = Accessor::new(&store);
        let mut tree = build(&mut acc, TreeConfig::with_fanout(4, 8).unwrap(), 2000);
        acc.commit(&mut tree).unwrap();

        let before = store.round_trips();
        let single = collect_all(&tree, &acc);
        let single_trips = store.round_trips() - before;

        let before = store.round_trips();
        let mut bulk = Vec::new();
        assert!(tree
            .for_each_bulk(&acc, 512, |k, v| {
                bulk.push((k.to_vec(), v.to_vec()));
                true
            })
            .unwrap());
        let bulk_trips = store.round_trips() - before;

        assert_eq!(single, bulk);
        assert!(bulk_trips * 3 < single_trips, "{bulk_trips} vs {single_trips}");
    }

    #[test]
    fn small_batches_announce_the_next_one() {
        let store = CountingStore::new();
        let mut acc = Accessor::new(&store);
        let mut tree = build(&mut acc, TreeConfig::with_fanout(4, 8).unwrap(), 500);
        acc.commit(&mut tree).unwrap();

        let single = collect_all(&tree, &acc);
        let mut bulk = Vec::new();
        assert!(tree
            .for_each_bulk(&acc, 16, |k, v| {
                bulk.push((k.to_vec(), v.to_vec()));
                true
            })
            .unwrap());
        assert_eq!(single, bulk);
        assert!(store.prefetches.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn bulk_over_uncommitted_pages() {
        let store = CountingStore::new();
        let mut acc = Accessor::new(&store);
        let tree = build(&mut acc, TreeConfig::with_fanout(2, 4).unwrap(), 100);
        let mut n = 0u32;
        assert!(tree
            .for_each_bulk(&acc, 8, |k, _| {
                assert_eq!(k, key(n).as_slice());
                n += 1;
                true
            })
            .unwrap());
        assert_eq!(n, 100);
        assert_eq!(store.round_trips(), 0);
        assert_eq!(store.prefetches.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn bulk_resolves_out_of_line_values() {
        let store = InMemoryBackingStore::new();
        let mut acc = Accessor::new(&store);
        let config = TreeConfig {
            inline_value_limit: 4,
            ..TreeConfig::with_fanout(2, 4).unwrap()
        };
        let mut tree = PersistentTree::with_config(config).unwrap();
        for i in 0..20u32 {
            tree.put(&mut acc, &key(i), &vec![i as u8; i as usize]).unwrap();
        }
        acc.commit(&mut tree).unwrap();
        tree.put(&mut acc, &key(5), &[9u8; 50]).unwrap();

        let single = collect_all(&tree, &acc);
        let mut bulk = Vec::new();
        tree.for_each_bulk(&acc, 3, |k, v| {
            bulk.push((k.to_vec(), v.to_vec()));
            true
        })
        .unwrap();
        assert_eq!(single, bulk);
        assert_eq!(bulk[5].1, vec![9u8; 50]);
        assert_eq!(bulk[19].1, vec![19u8; 19]);
    }

    #[test]
    fn mask_covers_requested_window() {
        assert_eq!(child_mask(0, 3), 0b111);
        assert_eq!(child_mask(2, 2), 0b1100);
        assert_eq!(child_mask(62, 4), (1 << 62) | (1 << 63));
        assert_eq!(child_mask(70, 2), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn bulk_matches_single_for_any_chunk(
            n in 0u32..400,
            chunk in 1usize..300,
            commit_first in any::<bool>(),
        ) {
            let store = InMemoryBackingStore::new();
            let mut acc = Accessor::new(&store);
            let mut tree = build(&mut acc, TreeConfig::with_fanout(2, 5).unwrap(), n);
            if commit_first {
                acc.commit(&mut tree).unwrap();
            }
            let single = collect_all(&tree, &acc);
            let mut bulk = Vec::new();
            let done = tree
                .for_each_bulk(&acc, chunk, |k, v| {
                    bulk.push((k.to_vec(), v.to_vec()));
                    true
                })
                .unwrap();
            prop_assert!(done);
            prop_assert_eq!(single, bulk);
        }
    }
}
