use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Configuration for the filesystem store and its page cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the `objects/` tree.
    pub root: PathBuf,
    /// zstd level for page bodies; `None` stores them uncompressed.
    pub compression_level: Option<i32>,
    /// Re-hash every page read from disk and compare with its id.
    pub verify_on_read: bool,
    /// Number of pages kept by a [`CachedStore`](crate::CachedStore).
    pub cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".arbor"),
            compression_level: Some(3),
            verify_on_read: true,
            cache_capacity: 4096,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Reject settings the store cannot honor.
    pub fn validate(&self) -> StoreResult<()> {
        if let Some(level) = self.compression_level {
            let range = zstd::compression_level_range();
            if !range.contains(&level) {
                return Err(StoreError::Config(format!(
                    "compression level {level} outside {}..={}",
                    range.start(),
                    range.end()
                )));
            }
        }
        if self.cache_capacity == 0 {
            return Err(StoreError::Config("cache capacity must be non-zero".into()));
        }
        Ok(())
    }
}
