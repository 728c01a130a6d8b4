//! `Record`: the stored `{value, expires_at, version}` triple.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A stored entry. `expires_at`, when present, is an absolute
/// unix-second deadline; `version` monotonically increases per key
/// across successful writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The value, possibly compressed (opaque to everything above the codec).
    pub value: Value,
    /// Absolute expiration instant, in unix seconds.
    pub expires_at: Option<i64>,
    /// Monotonic per-key version counter.
    pub version: u64,
}

impl Record {
    /// Build a record with no expiration and version 1.
    pub fn new(value: Value) -> Self {
        Record {
            value,
            expires_at: None,
            version: 1,
        }
    }

    /// Whether this record is logically expired as of `now` (unix seconds).
    ///
    /// A read observing `now >= expires_at` must behave as if the key is
    /// absent. `now` is always supplied by the caller — a `Record` never
    /// consults the wall clock itself.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    /// Return a copy with `value` replaced and `version` bumped by one.
    pub fn overwritten_with(&self, value: Value, expires_at: Option<i64>) -> Self {
        Record {
            value,
            expires_at,
            version: self.version + 1,
        }
    }
}
