//! Snapshot Codec: serialize/restore full state machine state,
//! integrity-checked with a trailing sha256 digest.
//!
//! The wire layout:
//!
//! ```text
//! header        { magic: "CNCS", version: u16, created_unix: u64,
//!                 last_applied_index: u64, last_applied_term: u64 }
//! index_catalog { count: u32, entries: [name, extractor_id]* }
//! records       { count: u64, entries: [key_len:u32, key, flags:u8,
//!                 expires_at:i64, version:u64, value_len:u32, value]* }
//! checksum      { sha256 of all preceding bytes }
//! ```
//!
//! Records must be supplied (and are emitted) in lexicographic key order
//! for byte-for-byte reproducibility across replicas.
//! This crate has no notion of the store or index engine themselves — it
//! only knows how to frame and checksum the bytes; `concord-engine` is
//! responsible for converting to/from this shape.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use concord_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Write};

/// Magic bytes identifying a Concord snapshot file.
pub const MAGIC: &[u8; 4] = b"CNCS";
/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

/// One entry of the index catalog section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCatalogEntry {
    /// Index name.
    pub name: String,
    /// Extractor id the index was created with.
    pub extractor_id: String,
}

/// One entry of the records section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    /// Raw key bytes.
    pub key: Vec<u8>,
    /// Whether `expires_at` is meaningful.
    pub has_expires_at: bool,
    /// Absolute expiry, in unix seconds; `0` when `has_expires_at` is false.
    pub expires_at: i64,
    /// Per-key version counter.
    pub version: u64,
    /// Raw (codec-framed) value bytes.
    pub value: Vec<u8>,
}

/// The full state machine state, ready to serialize or just restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotState {
    /// Unix-second timestamp the snapshot was produced at.
    pub created_unix: u64,
    /// Log index of the last applied command reflected in this snapshot.
    pub last_applied_index: u64,
    /// Log term of the last applied command reflected in this snapshot.
    pub last_applied_term: u64,
    /// Registered index descriptors at snapshot time.
    pub index_catalog: Vec<IndexCatalogEntry>,
    /// Every record in the store, in lexicographic key order.
    pub records: Vec<RecordEntry>,
}

/// Serialize `state` into the framed, checksummed snapshot format.
pub fn snapshot(state: &SnapshotState) -> Vec<u8> {
    let mut body = Vec::new();

    body.extend_from_slice(MAGIC);
    body.write_u16::<BigEndian>(FORMAT_VERSION).unwrap();
    body.write_u64::<BigEndian>(state.created_unix).unwrap();
    body.write_u64::<BigEndian>(state.last_applied_index).unwrap();
    body.write_u64::<BigEndian>(state.last_applied_term).unwrap();

    body.write_u32::<BigEndian>(state.index_catalog.len() as u32)
        .unwrap();
    for entry in &state.index_catalog {
        write_string(&mut body, &entry.name);
        write_string(&mut body, &entry.extractor_id);
    }

    body.write_u64::<BigEndian>(state.records.len() as u64)
        .unwrap();
    for record in &state.records {
        body.write_u32::<BigEndian>(record.key.len() as u32).unwrap();
        body.write_all(&record.key).unwrap();
        body.write_u8(if record.has_expires_at { 1 } else { 0 }).unwrap();
        body.write_i64::<BigEndian>(record.expires_at).unwrap();
        body.write_u64::<BigEndian>(record.version).unwrap();
        body.write_u32::<BigEndian>(record.value.len() as u32).unwrap();
        body.write_all(&record.value).unwrap();
    }

    let mut hasher = Sha256::new();
    hasher.update(&body);
    let checksum = hasher.finalize();

    let mut out = body;
    out.extend_from_slice(&checksum);
    out
}

/// Reverse `snapshot`, verifying the trailing checksum before trusting any
/// of the framed content. A checksum or header mismatch is a fatal
/// `SnapshotIntegrityFailure`: it indicates on-disk corruption, not a
/// recoverable condition.
pub fn restore(bytes: &[u8]) -> Result<SnapshotState> {
    if bytes.len() < 32 {
        return Err(Error::SnapshotIntegrityFailure("truncated snapshot".into()));
    }
    let (body, checksum) = bytes.split_at(bytes.len() - 32);

    let mut hasher = Sha256::new();
    hasher.update(body);
    let expected = hasher.finalize();
    if expected.as_slice() != checksum {
        return Err(Error::SnapshotIntegrityFailure("checksum mismatch".into()));
    }

    let mut cursor = Cursor::new(body);

    let mut magic = [0u8; 4];
    cursor
        .read_exact(&mut magic)
        .map_err(|e| Error::SnapshotIntegrityFailure(format!("magic: {e}")))?;
    if &magic != MAGIC {
        return Err(Error::SnapshotIntegrityFailure("bad magic".into()));
    }

    let version = read_u16(&mut cursor)?;
    if version != FORMAT_VERSION {
        return Err(Error::SnapshotIntegrityFailure(format!(
            "unsupported snapshot version {version}"
        )));
    }

    let created_unix = read_u64(&mut cursor)?;
    let last_applied_index = read_u64(&mut cursor)?;
    let last_applied_term = read_u64(&mut cursor)?;

    let catalog_count = read_u32(&mut cursor)?;
    let mut index_catalog = Vec::with_capacity(catalog_count as usize);
    for _ in 0..catalog_count {
        let name = read_string(&mut cursor)?;
        let extractor_id = read_string(&mut cursor)?;
        index_catalog.push(IndexCatalogEntry { name, extractor_id });
    }

    let record_count = read_u64(&mut cursor)?;
    let mut records = Vec::with_capacity(record_count.min(1 << 20) as usize);
    for _ in 0..record_count {
        let key_len = read_u32(&mut cursor)? as usize;
        let mut key = vec![0u8; key_len];
        cursor
            .read_exact(&mut key)
            .map_err(|e| Error::SnapshotIntegrityFailure(format!("key: {e}")))?;
        let has_expires_at = read_u8(&mut cursor)? != 0;
        let expires_at = read_i64(&mut cursor)?;
        let version = read_u64(&mut cursor)?;
        let value_len = read_u32(&mut cursor)? as usize;
        let mut value = vec![0u8; value_len];
        cursor
            .read_exact(&mut value)
            .map_err(|e| Error::SnapshotIntegrityFailure(format!("value: {e}")))?;
        records.push(RecordEntry {
            key,
            has_expires_at,
            expires_at,
            version,
            value,
        });
    }

    Ok(SnapshotState {
        created_unix,
        last_applied_index,
        last_applied_term,
        index_catalog,
        records,
    })
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.write_u32::<BigEndian>(s.len() as u32).unwrap();
    out.extend_from_slice(s.as_bytes());
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = read_u32(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| Error::SnapshotIntegrityFailure(format!("string: {e}")))?;
    String::from_utf8(buf).map_err(|e| Error::SnapshotIntegrityFailure(format!("utf8: {e}")))
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    cursor
        .read_u8()
        .map_err(|e| Error::SnapshotIntegrityFailure(format!("u8: {e}")))
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    cursor
        .read_u16::<BigEndian>()
        .map_err(|e| Error::SnapshotIntegrityFailure(format!("u16: {e}")))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|e| Error::SnapshotIntegrityFailure(format!("u32: {e}")))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    cursor
        .read_u64::<BigEndian>()
        .map_err(|e| Error::SnapshotIntegrityFailure(format!("u64: {e}")))
}

fn read_i64(cursor: &mut Cursor<&[u8]>) -> Result<i64> {
    cursor
        .read_i64::<BigEndian>()
        .map_err(|e| Error::SnapshotIntegrityFailure(format!("i64: {e}")))
}

/// Write a snapshot to `path` atomically: serialize, write to a temp file
/// in the same directory, fsync, then rename over the destination,
/// avoiding torn writes if the process dies mid-write.
pub fn write_atomic(state: &SnapshotState, path: &std::path::Path) -> std::io::Result<()> {
    let bytes = snapshot(state);
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot")
    ));
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SnapshotState {
        SnapshotState {
            created_unix: 1_700_000_000,
            last_applied_index: 42,
            last_applied_term: 3,
            index_catalog: vec![IndexCatalogEntry {
                name: "by_word".into(),
                extractor_id: "words".into(),
            }],
            records: vec![
                RecordEntry {
                    key: b"a".to_vec(),
                    has_expires_at: false,
                    expires_at: 0,
                    version: 1,
                    value: b"raw:hello".to_vec(),
                },
                RecordEntry {
                    key: b"b".to_vec(),
                    has_expires_at: true,
                    expires_at: 1_700_000_100,
                    version: 2,
                    value: b"raw:world".to_vec(),
                },
            ],
        }
    }

    #[test]
    fn snapshot_then_restore_is_identity() {
        let state = sample();
        let bytes = snapshot(&state);
        let restored = restore(&bytes).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn restore_rejects_flipped_byte() {
        let state = sample();
        let mut bytes = snapshot(&state);
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(restore(&bytes), Err(Error::SnapshotIntegrityFailure(_))));
    }

    #[test]
    fn restore_rejects_bad_magic() {
        let mut bytes = snapshot(&sample());
        bytes[0] = b'X';
        // Recompute checksum so only the magic is "valid-looking but wrong".
        let body_len = bytes.len() - 32;
        let mut hasher = Sha256::new();
        hasher.update(&bytes[..body_len]);
        let checksum = hasher.finalize();
        bytes[body_len..].copy_from_slice(&checksum);
        assert!(matches!(restore(&bytes), Err(Error::SnapshotIntegrityFailure(_))));
    }

    #[test]
    fn restore_rejects_truncated_input() {
        assert!(matches!(restore(&[1, 2, 3]), Err(Error::SnapshotIntegrityFailure(_))));
    }

    #[test]
    fn write_atomic_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot-42.snap");
        write_atomic(&sample(), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(restore(&bytes).unwrap(), sample());
    }

    #[test]
    fn empty_store_snapshots_and_restores() {
        let state = SnapshotState {
            created_unix: 0,
            last_applied_index: 0,
            last_applied_term: 0,
            index_catalog: vec![],
            records: vec![],
        };
        let bytes = snapshot(&state);
        assert_eq!(restore(&bytes).unwrap(), state);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_arbitrary_keys_and_values(key in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..64),
                                                  value in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..128),
                                                  version in proptest::prelude::any::<u64>()) {
            let state = SnapshotState {
                created_unix: 1,
                last_applied_index: 1,
                last_applied_term: 1,
                index_catalog: vec![],
                records: vec![RecordEntry { key, has_expires_at: false, expires_at: 0, version, value }],
            };
            let bytes = snapshot(&state);
            let restored = restore(&bytes).unwrap();
            proptest::prop_assert_eq!(restored, state);
        }
    }
}
