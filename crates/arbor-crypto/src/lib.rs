//! Content hashing for Arbor.
//!
//! Provides the domain-separated BLAKE3 hasher that turns serialized pages
//! into [`ContentId`](arbor_types::ContentId)s. The id is the first 128 bits
//! of the BLAKE3 output, so it is stable across processes and machines.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;

pub use hasher::{ContentHasher, HasherError};
