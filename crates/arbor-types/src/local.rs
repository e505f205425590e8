use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a page held in a write arena.
///
/// A `LocalId` is only meaningful to the arena that issued it, and only for
/// the arena generation it was issued in. Resetting the arena bumps the
/// generation, which turns every outstanding `LocalId` into a stale handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId {
    generation: u32,
    slot: u32,
}

impl LocalId {
    /// Build a local id from an arena generation and slot index.
    pub const fn new(generation: u32, slot: u32) -> Self {
        Self { generation, slot }
    }

    /// Arena generation this id was issued in.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Slot index within the arena.
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({}:{})", self.generation, self.slot)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local:{}:{}", self.generation, self.slot)
    }
}
