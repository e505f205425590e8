use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Content-addressed identifier for a committed page or value blob.
///
/// A `ContentId` is a 128-bit hash of the serialized bytes, kept as two
/// 64-bit halves. Identical content always produces the same `ContentId`,
/// which is what lets the backing store deduplicate pages shared between
/// tree versions. Ids cross the storage boundary, so the byte order of
/// [`ContentId::to_bytes`] is fixed (big-endian, `hi` first).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId {
    hi: u64,
    lo: u64,
}

impl ContentId {
    /// Length of the id in bytes.
    pub const LEN: usize = 16;

    /// Build an id from its two halves.
    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    /// Create a `ContentId` from a pre-computed 16-byte hash.
    pub fn from_hash(hash: [u8; 16]) -> Self {
        let mut hi = [0u8; 8];
        let mut lo = [0u8; 8];
        hi.copy_from_slice(&hash[..8]);
        lo.copy_from_slice(&hash[8..]);
        Self {
            hi: u64::from_be_bytes(hi),
            lo: u64::from_be_bytes(lo),
        }
    }

    /// High 64 bits.
    pub fn hi(&self) -> u64 {
        self.hi
    }

    /// Low 64 bits.
    pub fn lo(&self) -> u64 {
        self.lo
    }

    /// The 16 raw bytes, `hi` first.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.hi.to_be_bytes());
        out[8..].copy_from_slice(&self.lo.to_be_bytes());
        out
    }

    /// Hex-encoded string representation (32 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.to_bytes()[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != Self::LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self::from_hash(arr))
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.short_hex())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 16]> for ContentId {
    fn from(bytes: [u8; 16]) -> Self {
        Self::from_hash(bytes)
    }
}

impl From<ContentId> for [u8; 16] {
    fn from(id: ContentId) -> Self {
        id.to_bytes()
    }
}
