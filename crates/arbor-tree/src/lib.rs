//! Persistent copy-on-write B+Tree for Arbor.
//!
//! Many versions of one ordered byte map coexist as root references into a
//! shared pool of immutable pages. Mutations write fresh pages into a
//! per-session [`WriteArena`]; a bulk commit moves the reachable ones into a
//! content-addressed [`BackingStore`](arbor_store::BackingStore) and yields a
//! root id that any later session can reopen, fetching pages lazily.
//!
//! # Key Types
//!
//! - [`PersistentTree`] -- Root handle: get/put/delete, snapshots, traversal
//! - [`Accessor`] -- One write session: store reference plus arena
//! - [`WriteArena`] -- Uncommitted pages addressed by local ids
//! - [`Page`] -- Leaf or internal node and its byte layout
//! - [`BulkCommit`] -- Persist an arena-overlaid tree in one batch
//! - [`TreeConfig`] -- Fan-out bounds and value inlining threshold
//!
//! # Example
//!
//! ```
//! use arbor_store::InMemoryBackingStore;
//! use arbor_tree::{Accessor, PersistentTree};
//!
//! let store = InMemoryBackingStore::new();
//! let mut acc = Accessor::new(&store);
//! let mut tree = PersistentTree::empty();
//! tree.put(&mut acc, b"key", b"value").unwrap();
//! let root = acc.commit(&mut tree).unwrap();
//!
//! let acc = Accessor::new(&store);
//! let reopened = PersistentTree::open(root);
//! assert_eq!(reopened.get(&acc, b"key").unwrap(), Some(b"value".to_vec()));
//! ```

pub mod accessor;
pub mod arena;
pub mod commit;
pub mod config;
pub mod error;
pub mod inspect;
pub mod page;
pub mod traverse;
pub mod tree;

pub use accessor::Accessor;
pub use arena::WriteArena;
pub use commit::BulkCommit;
pub use config::TreeConfig;
pub use error::{TreeError, TreeResult};
pub use inspect::TreeStats;
pub use page::{InternalPage, LeafPage, LeafValue, Page, PAGE_FORMAT_VERSION};
pub use tree::PersistentTree;
