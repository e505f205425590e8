//! Page layout and codec.
//!
//! A page is encoded as one format byte followed by the `bincode` encoding of
//! [`Page`]:
//!
//! ```text
//! [1 byte: PAGE_FORMAT_VERSION]
//! [N bytes: bincode(Page)]
//! ```
//!
//! The enum tag distinguishes leaf and internal pages, and every child or
//! value pointer is a [`PageRef`] tagged as arena-local or committed. Encoding
//! is deterministic, so equal pages always hash to the same content id.

use arbor_types::{PageKind, PageRef};
use serde::{Deserialize, Serialize};

use crate::error::{TreeError, TreeResult};

/// Version byte written in front of every encoded page.
pub const PAGE_FORMAT_VERSION: u8 = 1;

/// A value slot in a leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafValue {
    /// Value bytes stored in the leaf itself.
    Inline(Vec<u8>),
    /// Value stored as a separate blob, `len` bytes long.
    Blob { target: PageRef, len: u64 },
}

impl LeafValue {
    /// Length of the value in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Inline(v) => v.len(),
            Self::Blob { len, .. } => *len as usize,
        }
    }

    /// Returns `true` for a zero-length value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Leaf page: strictly ascending keys with one value each.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafPage {
    pub keys: Vec<Vec<u8>>,
    pub values: Vec<LeafValue>,
}

impl LeafPage {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the leaf holds no entries.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Position of `key`, or the position it would be inserted at.
    pub fn search(&self, key: &[u8]) -> Result<usize, usize> {
        self.keys.binary_search_by(|k| k.as_slice().cmp(key))
    }

    /// Index of the first entry whose key is `>= key`.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() < key)
    }

    /// Move the upper half of the entries into a new right sibling.
    ///
    /// The separator for the pair is the first key of the returned page.
    pub fn split(&mut self) -> LeafPage {
        let mid = self.keys.len() / 2;
        LeafPage {
            keys: self.keys.split_off(mid),
            values: self.values.split_off(mid),
        }
    }

    /// Append every entry of `right`, which must sort after this page.
    pub fn absorb(&mut self, right: LeafPage) {
        self.keys.extend(right.keys);
        self.values.extend(right.values);
    }
}

/// Internal page: `keys.len() + 1` children separated by `keys`.
///
/// Every key reachable through `children[i]` is `>= keys[i - 1]` and
/// `< keys[i]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalPage {
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<PageRef>,
}

impl InternalPage {
    /// Internal page over two children split at `separator`.
    pub fn new_root(left: PageRef, separator: Vec<u8>, right: PageRef) -> Self {
        Self {
            keys: vec![separator],
            children: vec![left, right],
        }
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns `true` if the page has no children. Never true for a decoded page.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Index of the child whose subtree may contain `key`.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|s| s.as_slice() <= key)
    }

    /// Split an overfull page into two halves and the separator between them.
    pub fn split(&mut self) -> (Vec<u8>, InternalPage) {
        let mid = self.children.len() / 2;
        let right_children = self.children.split_off(mid);
        let mut right_keys = self.keys.split_off(mid - 1);
        let separator = right_keys.remove(0);
        (
            separator,
            InternalPage {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    /// Append `right`, pulling `separator` down between the two halves.
    pub fn absorb(&mut self, separator: Vec<u8>, right: InternalPage) {
        self.keys.push(separator);
        self.keys.extend(right.keys);
        self.children.extend(right.children);
    }
}

/// A tree node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Page {
    Leaf(LeafPage),
    Internal(InternalPage),
}

impl Page {
    /// Type tag of this page.
    pub fn kind(&self) -> PageKind {
        match self {
            Self::Leaf(_) => PageKind::Leaf,
            Self::Internal(_) => PageKind::Internal,
        }
    }

    /// Entries of a leaf, children of an internal page.
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.len(),
            Self::Internal(node) => node.len(),
        }
    }

    /// Returns `true` for a leaf without entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize to the versioned byte layout.
    pub fn encode(&self) -> TreeResult<Vec<u8>> {
        let mut out = vec![PAGE_FORMAT_VERSION];
        bincode::serialize_into(&mut out, self).map_err(|e| TreeError::Codec(e.to_string()))?;
        Ok(out)
    }

    /// Parse the versioned byte layout and check its shape.
    pub fn decode(bytes: &[u8]) -> TreeResult<Self> {
        let (&version, body) = bytes
            .split_first()
            .ok_or_else(|| TreeError::Codec("empty page".into()))?;
        if version != PAGE_FORMAT_VERSION {
            return Err(TreeError::Codec(format!(
                "unsupported page format version {version}"
            )));
        }
        let page: Page = bincode::deserialize(body).map_err(|e| TreeError::Codec(e.to_string()))?;
        match &page {
            Page::Leaf(leaf) if leaf.keys.len() != leaf.values.len() => {
                return Err(TreeError::Codec(format!(
                    "leaf has {} keys but {} values",
                    leaf.keys.len(),
                    leaf.values.len()
                )));
            }
            Page::Internal(node) if node.children.len() != node.keys.len() + 1 => {
                return Err(TreeError::Codec(format!(
                    "internal page has {} keys but {} children",
                    node.keys.len(),
                    node.children.len()
                )));
            }
            _ => {}
        }
        Ok(page)
    }
}
