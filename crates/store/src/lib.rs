//! Store: the in-memory ordered map from key to record.
//!
//! Backed by a `BTreeMap` behind a `parking_lot::RwLock`. Ordering comes
//! for free from `BTreeMap`'s key order, so `range`/`prefix` iteration is
//! naturally lexicographic without an extra sort pass.
//!
//! `Store` never consults the wall clock: every expiry check takes `now`
//! as an explicit parameter, which is what lets replaying the log from a
//! snapshot produce byte-identical state on every replica.

use concord_core::{Key, Record};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The in-memory ordered key-value map.
#[derive(Debug, Default)]
pub struct Store {
    data: RwLock<BTreeMap<Key, Record>>,
}

/// A point-in-time, read-only view of the store.
///
/// Cloning the underlying map is O(n) but keeps readers fully isolated
/// from the single apply-loop thread's writes: a query never blocks
/// `apply`, and `apply` never blocks behind a slow scan.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    data: Arc<BTreeMap<Key, Record>>,
}

impl Store {
    /// An empty store.
    pub fn new() -> Self {
        Store {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Fetch the record at `key`, filtering it out if expired as of `now`.
    pub fn get(&self, key: &Key, now: i64) -> Option<Record> {
        let data = self.data.read();
        data.get(key)
            .filter(|r| !r.is_expired(now))
            .cloned()
    }

    /// Fetch the raw record regardless of expiry (used internally by
    /// conditional commands that need to observe the current version even
    /// if the TTL has technically elapsed but cleanup hasn't run yet).
    pub fn get_raw(&self, key: &Key) -> Option<Record> {
        self.data.read().get(key).cloned()
    }

    /// Insert or replace the record at `key`.
    pub fn put(&self, key: Key, record: Record) {
        self.data.write().insert(key, record);
    }

    /// Remove the record at `key`, returning it if present.
    pub fn delete(&self, key: &Key) -> Option<Record> {
        self.data.write().remove(key)
    }

    /// All non-expired keys in `[from, to)`, in lexicographic order.
    pub fn range(&self, from: &Key, to: &Key, now: i64) -> Vec<(Key, Record)> {
        self.data
            .read()
            .range(from.clone()..to.clone())
            .filter(|(_, r)| !r.is_expired(now))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    /// All non-expired keys with the given byte prefix, in lexicographic order.
    pub fn prefix(&self, prefix: &[u8], now: i64) -> Vec<(Key, Record)> {
        self.data
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter(|(_, r)| !r.is_expired(now))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    /// Every non-expired entry, in lexicographic key order.
    pub fn iter(&self, now: i64) -> Vec<(Key, Record)> {
        self.data
            .read()
            .iter()
            .filter(|(_, r)| !r.is_expired(now))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    /// Number of entries, including expired-but-not-yet-reaped ones.
    pub fn size(&self) -> usize {
        self.data.read().len()
    }

    /// Approximate byte footprint of keys + record payloads. This is an
    /// estimate, not an allocator-accurate figure: it ignores BTreeMap node
    /// overhead and serde framing.
    pub fn memory_usage(&self) -> usize {
        self.data
            .read()
            .iter()
            .map(|(k, r)| k.as_bytes().len() + r.value.len() + 16)
            .sum()
    }

    /// Every entry regardless of expiry, used by the reaper to find what
    /// to clean up and by the snapshot codec to persist full state.
    pub fn iter_all(&self) -> Vec<(Key, Record)> {
        self.data
            .read()
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    /// Take a point-in-time read-only snapshot for concurrent queries.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            data: Arc::new(self.data.read().clone()),
        }
    }

    /// Replace the entire contents, used when restoring from a snapshot.
    pub fn replace_all(&self, entries: Vec<(Key, Record)>) {
        let mut data = self.data.write();
        data.clear();
        data.extend(entries);
    }
}

impl StoreSnapshot {
    /// Fetch the record at `key` from this frozen view, filtering expiry.
    pub fn get(&self, key: &Key, now: i64) -> Option<Record> {
        self.data.get(key).filter(|r| !r.is_expired(now)).cloned()
    }

    /// Non-expired entries in `[from, to)` from this frozen view.
    pub fn range(&self, from: &Key, to: &Key, now: i64) -> Vec<(Key, Record)> {
        self.data
            .range(from.clone()..to.clone())
            .filter(|(_, r)| !r.is_expired(now))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    /// Non-expired entries with the given prefix from this frozen view.
    pub fn prefix(&self, prefix: &[u8], now: i64) -> Vec<(Key, Record)> {
        self.data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter(|(_, r)| !r.is_expired(now))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    /// Every non-expired entry from this frozen view, in key order.
    pub fn iter(&self, now: i64) -> Vec<(Key, Record)> {
        self.data
            .iter()
            .filter(|(_, r)| !r.is_expired(now))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }
}
