use std::fmt;

use serde::{Deserialize, Serialize};

use crate::local::LocalId;
use crate::object::ContentId;

/// Where a referenced page lives.
///
/// Child pointers in internal pages, and out-of-line values in leaf pages,
/// use this tagged union: a committed reference resolves through the backing
/// store, a local reference resolves through the write arena that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageRef {
    /// Uncommitted page in a write arena.
    Local(LocalId),
    /// Immutable page in the backing store.
    Committed(ContentId),
}

impl PageRef {
    /// Returns `true` if this reference points into a write arena.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The content id, if this reference is committed.
    pub fn content_id(&self) -> Option<ContentId> {
        match self {
            Self::Committed(id) => Some(*id),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Debug for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "{id:?}"),
            Self::Committed(id) => write!(f, "{id:?}"),
        }
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "{id}"),
            Self::Committed(id) => write!(f, "{}", id.short_hex()),
        }
    }
}

impl From<ContentId> for PageRef {
    fn from(id: ContentId) -> Self {
        Self::Committed(id)
    }
}

impl From<LocalId> for PageRef {
    fn from(id: LocalId) -> Self {
        Self::Local(id)
    }
}

/// The kind of a stored page, passed to stores as a type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageKind {
    /// Leaf page: sorted keys and their values.
    Leaf,
    /// Internal page: separator keys and child references.
    Internal,
    /// Out-of-line value body referenced from a leaf.
    Value,
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf => write!(f, "leaf"),
            Self::Internal => write!(f, "internal"),
            Self::Value => write!(f, "value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_and_committed_are_distinguished() {
        let local = PageRef::from(LocalId::new(0, 1));
        let committed = PageRef::from(ContentId::new(0, 1));
        assert!(local.is_local());
        assert!(!committed.is_local());
        assert_eq!(local.content_id(), None);
        assert_eq!(committed.content_id(), Some(ContentId::new(0, 1)));
    }

    #[test]
    fn tag_survives_serialization() {
        let refs = vec![
            PageRef::Local(LocalId::new(2, 9)),
            PageRef::Committed(ContentId::new(5, 6)),
        ];
        let encoded = bincode::serialize(&refs).unwrap();
        let decoded: Vec<PageRef> = bincode::deserialize(&encoded).unwrap();
        assert_eq!(refs, decoded);
    }

    #[test]
    fn page_kind_display() {
        assert_eq!(PageKind::Leaf.to_string(), "leaf");
        assert_eq!(PageKind::Internal.to_string(), "internal");
        assert_eq!(PageKind::Value.to_string(), "value");
    }
}
