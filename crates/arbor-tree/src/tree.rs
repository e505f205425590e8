//! The persistent B+Tree handle and its point operations.

use arbor_types::{ContentId, PageRef};
use tracing::{debug, trace};

use crate::accessor::Accessor;
use crate::config::TreeConfig;
use crate::error::{TreeError, TreeResult};
use crate::page::{InternalPage, LeafPage, LeafValue, Page};

/// Handle to one version of a copy-on-write B+Tree.
///
/// A handle is a root reference plus the configuration used to mutate it.
/// Mutations never touch existing pages: they write a new path from the
/// changed leaf up to a new root into the accessor's arena and swing this
/// handle's root. Every other handle, including earlier
/// [`snapshot`](Self::snapshot)s, keeps seeing the pages it pointed at.
#[derive(Clone, Debug)]
pub struct PersistentTree {
    root: Option<PageRef>,
    config: TreeConfig,
}

/// Result of inserting below a page.
enum Insert {
    /// Key already held this exact value.
    Unchanged,
    /// The page was rewritten in place of the old one.
    Replaced(PageRef),
    /// The page overflowed and was split in two.
    Split {
        left: PageRef,
        separator: Vec<u8>,
        right: PageRef,
    },
}

impl PersistentTree {
    /// An empty tree with the default configuration.
    pub fn empty() -> Self {
        Self {
            root: None,
            config: TreeConfig::default(),
        }
    }

    /// An empty tree with a custom configuration.
    pub fn with_config(config: TreeConfig) -> TreeResult<Self> {
        config.validate()?;
        Ok(Self { root: None, config })
    }

    /// Open a committed tree with the default configuration.
    ///
    /// Nothing is read until the first operation touches the root.
    pub fn open(root: ContentId) -> Self {
        Self {
            root: Some(PageRef::Committed(root)),
            config: TreeConfig::default(),
        }
    }

    /// Open a committed tree with a custom configuration.
    pub fn open_with_config(root: ContentId, config: TreeConfig) -> TreeResult<Self> {
        config.validate()?;
        Ok(Self {
            root: Some(PageRef::Committed(root)),
            config,
        })
    }

    /// Current root reference, `None` for the empty tree.
    pub fn root(&self) -> Option<PageRef> {
        self.root
    }

    /// Root content id, if the current version has been committed.
    pub fn committed_root(&self) -> Option<ContentId> {
        self.root.and_then(|r| r.content_id())
    }

    /// Shape parameters used by mutations.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub(crate) fn set_root(&mut self, root: Option<PageRef>) {
        self.root = root;
    }

    /// Returns `true` if the tree holds no entries.
    pub fn is_empty(&self, acc: &Accessor<'_>) -> TreeResult<bool> {
        match self.root {
            None => Ok(true),
            Some(root) => Ok(matches!(acc.load(root)?, Page::Leaf(leaf) if leaf.is_empty())),
        }
    }

    /// An independent handle sharing every page with this one.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Value stored under `key`, if any.
    pub fn get(&self, acc: &Accessor<'_>, key: &[u8]) -> TreeResult<Option<Vec<u8>>> {
        let Some(mut at) = self.root else {
            return Ok(None);
        };
        loop {
            match acc.load(at)? {
                Page::Internal(node) => at = node.children[node.child_index(key)],
                Page::Leaf(leaf) => {
                    return match leaf.search(key) {
                        Ok(i) => acc.load_value(&leaf.values[i]).map(Some),
                        Err(_) => Ok(None),
                    };
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------------

    /// Insert or overwrite `key`. Always returns `true`.
    ///
    /// Writing the value a key already holds leaves the tree and the arena
    /// untouched.
    pub fn put(&mut self, acc: &mut Accessor<'_>, key: &[u8], value: &[u8]) -> TreeResult<bool> {
        let Some(root) = self.root else {
            let leaf = LeafPage {
                keys: vec![key.to_vec()],
                values: vec![self.make_value(acc, value)],
            };
            self.root = Some(acc.write_page(&Page::Leaf(leaf))?);
            return Ok(true);
        };
        match self.insert_at(acc, root, key, value)? {
            Insert::Unchanged => {}
            Insert::Replaced(root) => self.root = Some(root),
            Insert::Split {
                left,
                separator,
                right,
            } => {
                let root = InternalPage::new_root(left, separator, right);
                self.root = Some(acc.write_page(&Page::Internal(root))?);
                debug!("tree grew by one level");
            }
        }
        Ok(true)
    }

    fn insert_at(
        &self,
        acc: &mut Accessor<'_>,
        at: PageRef,
        key: &[u8],
        value: &[u8],
    ) -> TreeResult<Insert> {
        match acc.load(at)? {
            Page::Leaf(mut leaf) => {
                match leaf.search(key) {
                    Ok(i) => {
                        if same_value(acc, &leaf.values[i], value)? {
                            return Ok(Insert::Unchanged);
                        }
                        leaf.values[i] = self.make_value(acc, value);
                    }
                    Err(i) => {
                        leaf.keys.insert(i, key.to_vec());
                        leaf.values.insert(i, self.make_value(acc, value));
                    }
                }
                if leaf.len() > self.config.max_fanout {
                    let right = leaf.split();
                    let separator = right.keys[0].clone();
                    trace!(left = leaf.len(), right = right.len(), "split leaf");
                    return Ok(Insert::Split {
                        left: acc.write_page(&Page::Leaf(leaf))?,
                        separator,
                        right: acc.write_page(&Page::Leaf(right))?,
                    });
                }
                Ok(Insert::Replaced(acc.write_page(&Page::Leaf(leaf))?))
            }
            Page::Internal(mut node) => {
                let idx = node.child_index(key);
                match self.insert_at(acc, node.children[idx], key, value)? {
                    Insert::Unchanged => return Ok(Insert::Unchanged),
                    Insert::Replaced(child) => node.children[idx] = child,
                    Insert::Split {
                        left,
                        separator,
                        right,
                    } => {
                        node.children[idx] = left;
                        node.keys.insert(idx, separator);
                        node.children.insert(idx + 1, right);
                    }
                }
                if node.len() > self.config.max_fanout {
                    let (separator, right) = node.split();
                    trace!(left = node.len(), right = right.len(), "split internal page");
                    return Ok(Insert::Split {
                        left: acc.write_page(&Page::Internal(node))?,
                        separator,
                        right: acc.write_page(&Page::Internal(right))?,
                    });
                }
                Ok(Insert::Replaced(acc.write_page(&Page::Internal(node))?))
            }
        }
    }

    fn make_value(&self, acc: &mut Accessor<'_>, value: &[u8]) -> LeafValue {
        if value.len() > self.config.inline_value_limit {
            acc.write_value(value)
        } else {
            LeafValue::Inline(value.to_vec())
        }
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Remove `key`. Returns `false`, changing nothing, if it is absent.
    pub fn delete(&mut self, acc: &mut Accessor<'_>, key: &[u8]) -> TreeResult<bool> {
        let Some(root) = self.root else {
            return Ok(false);
        };
        let Some(page) = self.remove_at(acc, root, key)? else {
            return Ok(false);
        };
        self.root = match page {
            Page::Leaf(leaf) if leaf.is_empty() => None,
            Page::Internal(node) if node.len() == 1 => {
                debug!("tree shrank by one level");
                Some(node.children[0])
            }
            page => Some(acc.write_page(&page)?),
        };
        Ok(true)
    }

    /// Remove `key` below `at` and return the rewritten page, unwritten so
    /// the caller can rebalance it. `None` if the key is absent.
    fn remove_at(
        &self,
        acc: &mut Accessor<'_>,
        at: PageRef,
        key: &[u8],
    ) -> TreeResult<Option<Page>> {
        match acc.load(at)? {
            Page::Leaf(mut leaf) => match leaf.search(key) {
                Ok(i) => {
                    leaf.keys.remove(i);
                    leaf.values.remove(i);
                    Ok(Some(Page::Leaf(leaf)))
                }
                Err(_) => Ok(None),
            },
            Page::Internal(mut node) => {
                let idx = node.child_index(key);
                let Some(child) = self.remove_at(acc, node.children[idx], key)? else {
                    return Ok(None);
                };
                if child.len() >= self.config.min_fanout {
                    node.children[idx] = acc.write_page(&child)?;
                } else {
                    self.rebalance(acc, &mut node, idx, child)?;
                }
                Ok(Some(Page::Internal(node)))
            }
        }
    }

    /// Restore the fan-out of `node.children[idx]`, which underflowed to
    /// `child`, by borrowing from or merging with an adjacent sibling.
    fn rebalance(
        &self,
        acc: &mut Accessor<'_>,
        node: &mut InternalPage,
        idx: usize,
        child: Page,
    ) -> TreeResult<()> {
        if node.len() < 2 {
            return Err(TreeError::InvariantViolation(format!(
                "internal page with {} children",
                node.len()
            )));
        }
        let donor_is_left = idx > 0;
        let sep = if donor_is_left { idx - 1 } else { idx };
        let sibling = acc.load(node.children[if donor_is_left { sep } else { sep + 1 }])?;
        let can_borrow = sibling.len() > self.config.min_fanout;
        let (left, right) = if donor_is_left {
            (sibling, child)
        } else {
            (child, sibling)
        };

        match (left, right) {
            (Page::Leaf(mut left), Page::Leaf(mut right)) => {
                if can_borrow {
                    if donor_is_left {
                        if let (Some(k), Some(v)) = (left.keys.pop(), left.values.pop()) {
                            right.keys.insert(0, k);
                            right.values.insert(0, v);
                        }
                    } else {
                        left.keys.push(right.keys.remove(0));
                        left.values.push(right.values.remove(0));
                    }
                    node.keys[sep] = right.keys[0].clone();
                    trace!(donor_left = donor_is_left, "rotated leaf entry");
                    node.children[sep] = acc.write_page(&Page::Leaf(left))?;
                    node.children[sep + 1] = acc.write_page(&Page::Leaf(right))?;
                } else {
                    left.absorb(right);
                    node.keys.remove(sep);
                    node.children.remove(sep + 1);
                    trace!(entries = left.len(), "merged leaves");
                    node.children[sep] = acc.write_page(&Page::Leaf(left))?;
                }
            }
            (Page::Internal(mut left), Page::Internal(mut right)) => {
                if can_borrow {
                    if donor_is_left {
                        if let (Some(k), Some(c)) = (left.keys.pop(), left.children.pop()) {
                            let down = std::mem::replace(&mut node.keys[sep], k);
                            right.keys.insert(0, down);
                            right.children.insert(0, c);
                        }
                    } else {
                        let up = right.keys.remove(0);
                        let c = right.children.remove(0);
                        left.keys.push(std::mem::replace(&mut node.keys[sep], up));
                        left.children.push(c);
                    }
                    trace!(donor_left = donor_is_left, "rotated internal child");
                    node.children[sep] = acc.write_page(&Page::Internal(left))?;
                    node.children[sep + 1] = acc.write_page(&Page::Internal(right))?;
                } else {
                    let separator = node.keys.remove(sep);
                    left.absorb(separator, right);
                    node.children.remove(sep + 1);
                    trace!(children = left.len(), "merged internal pages");
                    node.children[sep] = acc.write_page(&Page::Internal(left))?;
                }
            }
            _ => {
                return Err(TreeError::InvariantViolation(
                    "sibling pages at different depths".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for PersistentTree {
    fn default() -> Self {
        Self::empty()
    }
}

fn same_value(acc: &Accessor<'_>, current: &LeafValue, value: &[u8]) -> TreeResult<bool> {
    match current {
        LeafValue::Inline(bytes) => Ok(bytes.as_slice() == value),
        LeafValue::Blob { target, len } => {
            if *len != value.len() as u64 {
                return Ok(false);
            }
            Ok(acc.fetch(*target)?.as_ref() == value)
        }
    }
}
