//! Foundation types for Arbor.
//!
//! This crate provides the identifiers shared by every other Arbor crate: the
//! content identifiers that name committed pages, the transient identifiers
//! handed out by a write arena, and the tagged reference that lets a page point
//! at either kind.
//!
//! # Key Types
//!
//! - [`ContentId`] -- 128-bit content-addressed identifier (two `u64` halves)
//! - [`LocalId`] -- Arena-local identifier, valid for one arena generation
//! - [`PageRef`] -- Tagged union of the two: where a child page lives
//! - [`PageKind`] -- Leaf, internal, or out-of-line value blob

pub mod error;
pub mod local;
pub mod object;
pub mod page_ref;

pub use error::TypeError;
pub use local::LocalId;
pub use object::ContentId;
pub use page_ref::{PageKind, PageRef};
