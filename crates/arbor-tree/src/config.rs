use serde::{Deserialize, Serialize};

use crate::error::{TreeError, TreeResult};

/// Shape parameters of a [`PersistentTree`](crate::PersistentTree).
///
/// Fan-out counts entries for leaves and children for internal pages. Every
/// page except the root holds between `min_fanout` and `max_fanout` of them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Largest number of entries/children a page may hold.
    pub max_fanout: usize,
    /// Smallest number of entries/children a non-root page may hold.
    pub min_fanout: usize,
    /// Values longer than this many bytes are stored out of line.
    pub inline_value_limit: usize,
    /// Default number of entries fetched per batch by bulk traversal.
    pub bulk_chunk_size: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_fanout: 64,
            min_fanout: 32,
            inline_value_limit: 1024,
            bulk_chunk_size: 4096,
        }
    }
}

impl TreeConfig {
    /// Default configuration with the given fan-out bounds.
    pub fn with_fanout(min_fanout: usize, max_fanout: usize) -> TreeResult<Self> {
        let config = Self {
            min_fanout,
            max_fanout,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a `[tree]`-style TOML table and validate it.
    pub fn from_toml_str(s: &str) -> TreeResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| TreeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that splits and merges can always restore the fan-out bounds.
    ///
    /// A split of an overfull page yields two halves of at least
    /// `(max + 1) / 2` and a merge of two minimal neighbours yields
    /// `2 * min - 1`, so both hold exactly when `max >= 2 * min - 1`.
    pub fn validate(&self) -> TreeResult<()> {
        if self.min_fanout < 2 {
            return Err(TreeError::Config(format!(
                "min_fanout must be at least 2, got {}",
                self.min_fanout
            )));
        }
        if self.max_fanout < 2 * self.min_fanout - 1 {
            return Err(TreeError::Config(format!(
                "max_fanout {} is below 2 * min_fanout - 1 = {}",
                self.max_fanout,
                2 * self.min_fanout - 1
            )));
        }
        if self.bulk_chunk_size == 0 {
            return Err(TreeError::Config("bulk_chunk_size must be non-zero".into()));
        }
        Ok(())
    }
}
