//! Write arena: uncommitted pages of one write session.

use std::sync::atomic::{AtomicU32, Ordering};

use arbor_types::LocalId;
use bytes::Bytes;
use tracing::trace;

use crate::error::{TreeError, TreeResult};

/// Generations are drawn from one process-wide counter so that a `LocalId`
/// issued by one arena never resolves in another.
static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

fn next_generation() -> u32 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Append-only buffer of page bodies written by the current session.
///
/// Pages are addressed by [`LocalId`]s that stay valid until the arena is
/// [`reset`](WriteArena::reset), which happens once its contents have been
/// committed. The arena is owned by a single session and is not shared.
#[derive(Debug)]
pub struct WriteArena {
    generation: u32,
    pages: Vec<Bytes>,
    byte_size: usize,
}

impl WriteArena {
    /// Create an empty arena with a fresh generation.
    pub fn new() -> Self {
        Self {
            generation: next_generation(),
            pages: Vec::new(),
            byte_size: 0,
        }
    }

    /// Store a page body and return its local id.
    pub fn allocate(&mut self, bytes: impl Into<Bytes>) -> LocalId {
        let bytes = bytes.into();
        let slot = self.pages.len() as u32;
        self.byte_size += bytes.len();
        self.pages.push(bytes);
        LocalId::new(self.generation, slot)
    }

    /// Return the body stored under `id`.
    ///
    /// Fails with [`TreeError::StaleLocalRef`] if `id` was issued before the
    /// last reset or by another arena.
    pub fn resolve(&self, id: LocalId) -> TreeResult<Bytes> {
        if id.generation() != self.generation {
            return Err(self.stale(id));
        }
        self.pages
            .get(id.slot() as usize)
            .cloned()
            .ok_or_else(|| self.stale(id))
    }

    /// Number of pages allocated since the last reset.
    pub fn size(&self) -> usize {
        self.pages.len()
    }

    /// Returns `true` if nothing has been allocated since the last reset.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Total bytes allocated since the last reset.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Current generation; every live `LocalId` carries it.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Drop every page and invalidate all outstanding local ids.
    pub fn reset(&mut self) {
        trace!(
            generation = self.generation,
            pages = self.pages.len(),
            "resetting write arena"
        );
        self.pages.clear();
        self.byte_size = 0;
        self.generation = next_generation();
    }

    fn stale(&self, id: LocalId) -> TreeError {
        TreeError::StaleLocalRef {
            id,
            current: self.generation,
        }
    }
}

impl Default for WriteArena {
    fn default() -> Self {
        Self::new()
    }
}
