//! Read/write handle pairing a backing store with a write arena.

use arbor_store::BackingStore;
use arbor_types::{ContentId, PageRef};
use bytes::Bytes;

use crate::arena::WriteArena;
use crate::commit::BulkCommit;
use crate::error::{TreeError, TreeResult};
use crate::page::{LeafValue, Page};
use crate::tree::PersistentTree;

/// One unit of work against a backing store.
///
/// Reads resolve committed references through the store and local references
/// through the arena; writes always land in the arena. Any number of tree
/// handles may be mutated through the same accessor, and [`commit`] turns one
/// of them into a durable root.
///
/// [`commit`]: Accessor::commit
pub struct Accessor<'s> {
    store: &'s dyn BackingStore,
    arena: WriteArena,
}

impl<'s> Accessor<'s> {
    /// Start a write session over `store` with a fresh arena.
    pub fn new(store: &'s dyn BackingStore) -> Self {
        Self {
            store,
            arena: WriteArena::new(),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &'s dyn BackingStore {
        self.store
    }

    /// The write arena of this session.
    pub fn arena(&self) -> &WriteArena {
        &self.arena
    }

    /// Mutable access to the write arena.
    pub fn arena_mut(&mut self) -> &mut WriteArena {
        &mut self.arena
    }

    /// Bulk-commit `tree` into the store and return its root id.
    ///
    /// The arena is reset afterwards: every other handle still pointing at
    /// uncommitted pages of this session becomes stale.
    pub fn commit(&mut self, tree: &mut PersistentTree) -> TreeResult<ContentId> {
        self.store.bulk_commit(tree, &mut self.arena)
    }

    /// Raw bytes behind a reference.
    pub(crate) fn fetch(&self, page: PageRef) -> TreeResult<Bytes> {
        match page {
            PageRef::Local(id) => self.arena.resolve(id),
            PageRef::Committed(id) => Ok(self.store.lookup(&id)?),
        }
    }

    /// Load and decode a page.
    pub(crate) fn load(&self, page: PageRef) -> TreeResult<Page> {
        self.load_raw(page).map(|(_, decoded)| decoded)
    }

    /// Load a page, keeping its encoded bytes alongside the decoded form.
    pub(crate) fn load_raw(&self, page: PageRef) -> TreeResult<(Bytes, Page)> {
        let bytes = self.fetch(page)?;
        let decoded = decode_at(page, &bytes)?;
        Ok((bytes, decoded))
    }

    /// Resolve a leaf value to its bytes.
    pub(crate) fn load_value(&self, value: &LeafValue) -> TreeResult<Vec<u8>> {
        match value {
            LeafValue::Inline(bytes) => Ok(bytes.clone()),
            LeafValue::Blob { target, len } => {
                let bytes = self.fetch(*target)?;
                check_blob_len(*target, &bytes, *len)?;
                Ok(bytes.to_vec())
            }
        }
    }

    /// Encode `page` into the arena.
    pub(crate) fn write_page(&mut self, page: &Page) -> TreeResult<PageRef> {
        let bytes = page.encode()?;
        Ok(PageRef::Local(self.arena.allocate(bytes)))
    }

    /// Place an out-of-line value body in the arena.
    pub(crate) fn write_value(&mut self, value: &[u8]) -> LeafValue {
        let id = self.arena.allocate(value.to_vec());
        LeafValue::Blob {
            target: PageRef::Local(id),
            len: value.len() as u64,
        }
    }
}

impl std::fmt::Debug for Accessor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor")
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}

/// Decode `bytes` read from `page`, attributing codec failures to it.
pub(crate) fn decode_at(page: PageRef, bytes: &[u8]) -> TreeResult<Page> {
    Page::decode(bytes).map_err(|e| match e {
        TreeError::Codec(reason) => TreeError::CorruptPage { page, reason },
        other => other,
    })
}

pub(crate) fn check_blob_len(target: PageRef, bytes: &[u8], len: u64) -> TreeResult<()> {
    if bytes.len() as u64 != len {
        return Err(TreeError::CorruptPage {
            page: target,
            reason: format!("value blob is {} bytes, leaf says {len}", bytes.len()),
        });
    }
    Ok(())
}
