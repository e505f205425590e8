use arbor_types::ContentId;

/// Errors from backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A referenced page does not exist in the store.
    ///
    /// Every id handed to a store was produced by that store, so this always
    /// means corruption or a foreign/stale id. It is never retried.
    #[error("missing data for content id {0}")]
    MissingData(ContentId),

    /// Two different byte strings hashed to the same content id.
    #[error("hash collision on {id}: stored {existing_len} bytes, offered {incoming_len} different bytes")]
    HashCollision {
        id: ContentId,
        existing_len: usize,
        incoming_len: usize,
    },

    /// The object data is malformed or fails verification.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ContentId, reason: String },

    /// Compression or decompression failure.
    #[error("compression error: {0}")]
    Compression(String),

    /// Invalid store configuration.
    #[error("invalid store configuration: {0}")]
    Config(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` for conditions that indicate corrupted or inconsistent
    /// storage rather than a transient failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingData(_) | Self::HashCollision { .. } | Self::CorruptObject { .. }
        )
    }
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
