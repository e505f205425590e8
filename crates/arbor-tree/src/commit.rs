//! Bulk commit: turn an arena-overlaid tree into committed pages.
//!
//! Arena-resident pages are visited bottom-up. Each one has its local child
//! and value references replaced by content ids, is re-encoded, and is hashed
//! to predict its id. All new pages then go to the store in a single
//! `allocate_batch` call, children before parents, and every id the store
//! hands back is checked against the prediction.

use std::collections::{HashMap, HashSet};

use arbor_crypto::ContentHasher;
use arbor_store::BackingStore;
use arbor_types::{ContentId, LocalId, PageRef};
use bytes::Bytes;
use tracing::{debug, info};

use crate::accessor::decode_at;
use crate::arena::WriteArena;
use crate::error::{TreeError, TreeResult};
use crate::page::{LeafPage, LeafValue, Page};
use crate::tree::PersistentTree;

/// Stores that can persist a whole tree in one pass.
///
/// Implemented for every [`BackingStore`], including `dyn BackingStore`.
/// Stores must derive ids with [`ContentHasher::PAGE`].
pub trait BulkCommit {
    /// Commit every arena page reachable from `tree`, point `tree` at the
    /// resulting root, reset `arena`, and return the root id.
    ///
    /// An empty tree commits as an empty leaf so that it has a root id too.
    fn bulk_commit(&self, tree: &mut PersistentTree, arena: &mut WriteArena) -> TreeResult<ContentId>;
}

impl<S: BackingStore + ?Sized> BulkCommit for S {
    fn bulk_commit(&self, tree: &mut PersistentTree, arena: &mut WriteArena) -> TreeResult<ContentId> {
        let mut plan = CommitPlan::new(arena);
        let root = match tree.root() {
            Some(root) => plan.page(root)?,
            None => plan.push(Page::Leaf(LeafPage::default()).encode()?),
        };

        let pages = plan.pages.len();
        let bytes: usize = plan.pages.iter().map(Bytes::len).sum();
        if !plan.pages.is_empty() {
            let stored = self.allocate_batch(&plan.pages)?;
            if stored.len() != plan.expected.len() {
                return Err(TreeError::InvariantViolation(format!(
                    "store returned {} ids for {} pages",
                    stored.len(),
                    plan.expected.len()
                )));
            }
            for (computed, stored) in plan.expected.iter().zip(&stored) {
                if computed != stored {
                    return Err(TreeError::IdMismatch {
                        computed: *computed,
                        stored: *stored,
                    });
                }
            }
        }

        debug!(
            arena_pages = arena.size(),
            reachable = plan.memo.len(),
            "arena flushed"
        );
        arena.reset();
        tree.set_root(Some(PageRef::Committed(root)));
        info!(root = %root.short_hex(), pages, bytes, "committed tree");
        Ok(root)
    }
}

/// Pages queued for one bulk commit, in allocation order.
struct CommitPlan<'a> {
    arena: &'a WriteArena,
    hasher: ContentHasher,
    memo: HashMap<LocalId, ContentId>,
    seen: HashSet<ContentId>,
    pages: Vec<Bytes>,
    expected: Vec<ContentId>,
}

impl<'a> CommitPlan<'a> {
    fn new(arena: &'a WriteArena) -> Self {
        Self {
            arena,
            hasher: ContentHasher::PAGE,
            memo: HashMap::new(),
            seen: HashSet::new(),
            pages: Vec::new(),
            expected: Vec::new(),
        }
    }

    /// Content id of the page behind `r`, queuing it and its local
    /// descendants first.
    fn page(&mut self, r: PageRef) -> TreeResult<ContentId> {
        let id = match r {
            PageRef::Committed(id) => return Ok(id),
            PageRef::Local(id) => id,
        };
        if let Some(done) = self.memo.get(&id) {
            return Ok(*done);
        }
        let bytes = self.arena.resolve(id)?;
        let page = match decode_at(r, &bytes)? {
            Page::Leaf(mut leaf) => {
                for value in &mut leaf.values {
                    if let LeafValue::Blob { target, .. } = value {
                        *target = PageRef::Committed(self.value(*target)?);
                    }
                }
                Page::Leaf(leaf)
            }
            Page::Internal(mut node) => {
                for child in &mut node.children {
                    *child = PageRef::Committed(self.page(*child)?);
                }
                Page::Internal(node)
            }
        };
        let content = self.push(page.encode()?);
        self.memo.insert(id, content);
        Ok(content)
    }

    /// Content id of an out-of-line value, queuing its body if local.
    fn value(&mut self, r: PageRef) -> TreeResult<ContentId> {
        let id = match r {
            PageRef::Committed(id) => return Ok(id),
            PageRef::Local(id) => id,
        };
        if let Some(done) = self.memo.get(&id) {
            return Ok(*done);
        }
        let content = self.push(self.arena.resolve(id)?);
        self.memo.insert(id, content);
        Ok(content)
    }

    fn push(&mut self, bytes: impl Into<Bytes>) -> ContentId {
        let bytes = bytes.into();
        let id = self.hasher.hash(&bytes);
        if self.seen.insert(id) {
            self.pages.push(bytes);
            self.expected.push(id);
        }
        id
    }
}
