//! Error types for the tree crate.

use arbor_store::StoreError;
use arbor_types::{ContentId, LocalId, PageRef};

/// Errors that can occur during tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// A page reference points into an arena that has been reset since the
    /// reference was issued, or into a different arena altogether.
    #[error("stale arena reference {id}: arena is at generation {current}")]
    StaleLocalRef { id: LocalId, current: u32 },

    /// A page could not be decoded.
    #[error("corrupt page {page}: {reason}")]
    CorruptPage { page: PageRef, reason: String },

    /// Page encoding or decoding failed before the page had an address.
    #[error("page codec error: {0}")]
    Codec(String),

    /// The tree structure breaks an ordering or fan-out invariant.
    #[error("tree invariant violated: {0}")]
    InvariantViolation(String),

    /// The store assigned a different id than the page hash predicts.
    #[error("content id mismatch: computed {computed}, store returned {stored}")]
    IdMismatch {
        computed: ContentId,
        stored: ContentId,
    },

    /// The tree configuration is unusable.
    #[error("invalid tree configuration: {0}")]
    Config(String),

    /// Backing store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Writing a dump failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TreeError {
    /// Returns `true` for conditions that indicate corrupted storage or a
    /// programming error rather than a transient failure.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::StaleLocalRef { .. }
            | Self::CorruptPage { .. }
            | Self::Codec(_)
            | Self::InvariantViolation(_)
            | Self::IdMismatch { .. } => true,
            Self::Store(e) => e.is_fatal(),
            Self::Config(_) | Self::Io(_) => false,
        }
    }
}

/// Convenience alias for tree results.
pub type TreeResult<T> = Result<T, TreeError>;
