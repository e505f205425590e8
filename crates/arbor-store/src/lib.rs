//! Content-addressed backing stores for Arbor.
//!
//! A backing store holds committed pages keyed by their
//! [`ContentId`](arbor_types::ContentId). It may be slow or remote, so the
//! trait offers batch variants of its read and write paths plus an advisory
//! prefetch hook that traversals use to announce what they will read next.
//!
//! # Storage Backends
//!
//! All backends implement the [`BackingStore`] trait:
//!
//! - [`InMemoryBackingStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsBackingStore`] -- one file per page in a git-style `objects/` tree
//! - [`CachedStore`] -- LRU page cache wrapping any other store
//!
//! # Design Rules
//!
//! 1. Pages are immutable once allocated (content-addressing guarantees this).
//! 2. Identical bytes are stored once; different bytes under one id are a
//!    fatal collision.
//! 3. A lookup of an unknown id is fatal: ids only come from the store.
//! 4. Concurrent reads are always safe (pages are immutable).
//! 5. The store never interprets page contents.
//! 6. All I/O errors are propagated, never silently ignored or retried.

pub mod cached;
pub mod config;
pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use cached::{CacheStats, CachedStore};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use fs::FsBackingStore;
pub use memory::InMemoryBackingStore;
pub use traits::{BackingStore, PrefetchHint, StoreStats};
