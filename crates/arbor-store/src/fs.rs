//! Loose-object filesystem store.
//!
//! Pages live under `<root>/objects/<first 2 hex>/<remaining 30 hex>`, the
//! same fan-out git uses for loose objects. Each file is framed as:
//!
//! ```text
//! [4 bytes: magic "ARBO"]
//! [1 byte:  flags (bit 0 = zstd-compressed payload)]
//! [4 bytes: CRC32 of the payload as stored (little-endian u32)]
//! [N bytes: payload]
//! ```
//!
//! Files are written to a temporary file in the target directory and renamed
//! into place, so a crash never leaves a torn page behind.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use arbor_crypto::ContentHasher;
use arbor_types::ContentId;
use bytes::Bytes;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BackingStore, StoreStats};

const MAGIC: &[u8; 4] = b"ARBO";
const FLAG_ZSTD: u8 = 0b0000_0001;
/// Header size: 4 bytes magic + 1 byte flags + 4 bytes CRC.
const HEADER_SIZE: usize = 9;

/// Backing store that keeps one file per page on the local filesystem.
pub struct FsBackingStore {
    objects_dir: PathBuf,
    config: StoreConfig,
    hasher: ContentHasher,
}

impl FsBackingStore {
    /// Open (or create) a store rooted at `config.root`.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let objects_dir = config.root.join("objects");
        fs::create_dir_all(&objects_dir)?;
        debug!(root = %config.root.display(), "opened filesystem store");
        Ok(Self {
            objects_dir,
            config,
            hasher: ContentHasher::PAGE,
        })
    }

    /// The configuration this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Path of the file that holds `id`.
    pub fn object_path(&self, id: &ContentId) -> PathBuf {
        let hex = id.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Count the stored pages and their decoded sizes.
    ///
    /// Files that cannot be decoded are skipped with a warning.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let mut stats = StoreStats::default();
        for id in self.all_ids()? {
            match self.read_object(&id) {
                Ok(bytes) => {
                    stats.objects += 1;
                    stats.bytes += bytes.len() as u64;
                }
                Err(e) => warn!(id = %id, error = %e, "skipping unreadable object"),
            }
        }
        Ok(stats)
    }

    /// Sorted list of every content id present on disk.
    pub fn all_ids(&self) -> StoreResult<Vec<ContentId>> {
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.objects_dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| StoreError::Io(io::Error::other(e.to_string())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(prefix) = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .and_then(|n| n.to_str())
            else {
                continue;
            };
            let Some(rest) = entry.file_name().to_str() else {
                continue;
            };
            match ContentId::from_hex(&format!("{prefix}{rest}")) {
                Ok(id) => ids.push(id),
                Err(_) => debug!(path = %entry.path().display(), "ignoring stray file"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read_object(&self, id: &ContentId) -> StoreResult<Bytes> {
        let path = self.object_path(id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::MissingData(*id));
            }
            Err(e) => return Err(e.into()),
        };
        let data = decode_frame(id, &raw)?;
        if self.config.verify_on_read {
            self.hasher
                .verify(&data, id)
                .map_err(|e| StoreError::CorruptObject {
                    id: *id,
                    reason: e.to_string(),
                })?;
        }
        Ok(Bytes::from(data))
    }

    fn write_object(&self, id: &ContentId, bytes: &[u8]) -> StoreResult<()> {
        let path = self.object_path(id);
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Config("object path has no parent".into()))?;
        fs::create_dir_all(dir)?;

        let frame = encode_frame(bytes, self.config.compression_level)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&frame)?;
        tmp.as_file().sync_data()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl BackingStore for FsBackingStore {
    fn lookup(&self, id: &ContentId) -> StoreResult<Bytes> {
        self.read_object(id)
    }

    fn allocate(&self, bytes: &[u8]) -> StoreResult<ContentId> {
        let id = self.hasher.hash(bytes);
        match self.read_object(&id) {
            Ok(existing) if existing.as_ref() == bytes => return Ok(id),
            Ok(existing) => {
                return Err(StoreError::HashCollision {
                    id,
                    existing_len: existing.len(),
                    incoming_len: bytes.len(),
                });
            }
            Err(StoreError::MissingData(_)) => {}
            Err(e) => return Err(e),
        }
        self.write_object(&id, bytes)?;
        Ok(id)
    }

    fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        Ok(self.object_path(id).is_file())
    }
}

impl std::fmt::Debug for FsBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBackingStore")
            .field("root", &self.config.root)
            .finish()
    }
}

fn encode_frame(bytes: &[u8], level: Option<i32>) -> StoreResult<Vec<u8>> {
    let (flags, payload) = match level {
        Some(level) => {
            let compressed = zstd::encode_all(bytes, level)
                .map_err(|e| StoreError::Compression(e.to_string()))?;
            (FLAG_ZSTD, compressed)
        }
        None => (0, bytes.to_vec()),
    };
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(MAGIC);
    frame.push(flags);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn decode_frame(id: &ContentId, raw: &[u8]) -> StoreResult<Vec<u8>> {
    let corrupt = |reason: String| StoreError::CorruptObject { id: *id, reason };
    if raw.len() < HEADER_SIZE {
        return Err(corrupt(format!("file too short: {} bytes", raw.len())));
    }
    if &raw[..4] != MAGIC {
        return Err(corrupt("bad magic".into()));
    }
    let flags = raw[4];
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&raw[5..HEADER_SIZE]);
    let payload = &raw[HEADER_SIZE..];
    if crc32fast::hash(payload) != u32::from_le_bytes(crc) {
        return Err(corrupt("CRC32 mismatch".into()));
    }
    if flags & FLAG_ZSTD != 0 {
        zstd::decode_all(payload).map_err(|e| StoreError::Compression(e.to_string()))
    } else {
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &Path) -> FsBackingStore {
        FsBackingStore::open(StoreConfig::at(dir)).unwrap()
    }

    #[test]
    fn allocate_and_lookup_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = store.allocate(b"on disk").unwrap();
        assert!(store.contains(&id).unwrap());
        assert_eq!(store.lookup(&id).unwrap().as_ref(), b"on disk");
    }

    #[test]
    fn uses_git_style_fanout() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = store.allocate(b"fanout").unwrap();
        let hex = id.to_hex();
        let expected = dir.path().join("objects").join(&hex[..2]).join(&hex[2..]);
        assert_eq!(store.object_path(&id), expected);
        assert!(expected.is_file());
    }

    #[test]
    fn uncompressed_pages_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBackingStore::open(StoreConfig {
            compression_level: None,
            ..StoreConfig::at(dir.path())
        })
        .unwrap();
        let data = vec![0xABu8; 10_000];
        let id = store.allocate(&data).unwrap();
        let on_disk = fs::metadata(store.object_path(&id)).unwrap().len();
        assert_eq!(on_disk, (HEADER_SIZE + data.len()) as u64);
        assert_eq!(store.lookup(&id).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn compression_shrinks_repetitive_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let data = vec![0xABu8; 100_000];
        let id = store.allocate(&data).unwrap();
        let on_disk = fs::metadata(store.object_path(&id)).unwrap().len();
        assert!(on_disk < data.len() as u64);
    }

    #[test]
    fn allocate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id1 = store.allocate(b"same").unwrap();
        let id2 = store.allocate(b"same").unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.stats().unwrap().objects, 1);
    }

    #[test]
    fn missing_page_is_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = ContentHasher::PAGE.hash(b"nope");
        assert!(matches!(store.lookup(&id), Err(StoreError::MissingData(_))));
    }

    #[test]
    fn flipped_byte_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = store.allocate(b"fragile content").unwrap();
        let path = store.object_path(&id);
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        fs::write(&path, raw).unwrap();

        let err = store.lookup(&id).unwrap_err();
        assert!(matches!(err, StoreError::CorruptObject { .. }));
    }

    #[test]
    fn collision_with_foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBackingStore::open(StoreConfig {
            verify_on_read: false,
            ..StoreConfig::at(dir.path())
        })
        .unwrap();
        let id = ContentHasher::PAGE.hash(b"genuine");
        store.write_object(&id, b"impostor bytes").unwrap();

        let err = store.allocate(b"genuine").unwrap_err();
        assert!(matches!(err, StoreError::HashCollision { .. }));
    }

    #[test]
    fn reopen_sees_previous_pages() {
        let dir = tempfile::tempdir().unwrap();
        let id = open_store(dir.path()).allocate(b"durable").unwrap();
        let reopened = open_store(dir.path());
        assert_eq!(reopened.lookup(&id).unwrap().as_ref(), b"durable");
        assert_eq!(reopened.all_ids().unwrap(), vec![id]);
    }

    #[test]
    fn stats_skip_stray_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.allocate(b"12345").unwrap();
        fs::create_dir_all(dir.path().join("objects").join("zz")).unwrap();
        fs::write(dir.path().join("objects").join("zz").join("junk"), b"x").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats, StoreStats { objects: 1, bytes: 5 });
    }
}
