//! Read-only queries: `get`, `get_with_ttl`, `ttl`, `get_all`,
//! `get_all_with_ttl`, `get_many`, `lookup_index`, `keys_by`, `stats`.
//!
//! Unlike commands, queries never travel the log -- they run as plain
//! closures over `&StateMachine` via the consensus contract's
//! `local_query`/`leader_query`/`linearizable_query`, so there
//! is no wire encoding here, only the result shapes.

use concord_core::{Key, Value};

/// A decoded value plus its version, as returned by `get`/`get_many`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryValue {
    /// Decoded (decompressed) value bytes.
    pub value: Value,
    /// The record's version at read time.
    pub version: u64,
}

/// A decoded value plus version and expiry, as returned by
/// `get_with_ttl`/`get_all_with_ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryValueWithTtl {
    /// Decoded (decompressed) value bytes.
    pub value: Value,
    /// The record's version at read time.
    pub version: u64,
    /// Absolute expiry, in unix seconds, if set.
    pub expires_at: Option<i64>,
}

/// The answer to a `ttl` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// The key does not exist (or is expired as of the query's `now`).
    Absent,
    /// The key exists and has no expiry set.
    NoExpiry,
    /// The key exists; this many seconds remain until expiry.
    ExpiresIn(i64),
}

/// A `keys_by` selection criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeysPattern {
    /// Keys with this exact byte prefix.
    Prefix(Vec<u8>),
    /// Keys in `[from, to)`, lexicographically.
    Range(Key, Key),
    /// Keys matching a `*`-glob over their UTF-8 (lossy) representation.
    /// A simplified pattern language: `*` matches any run of bytes,
    /// every other character must match literally.
    Glob(String),
}

/// Point-in-time state machine statistics, used by the `stats` query and
/// surfaced by the `status` CLI command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Number of entries in the store, including expired-but-unreaped ones.
    pub size: usize,
    /// Approximate memory footprint, in bytes.
    pub memory_usage: usize,
    /// Number of registered secondary indexes.
    pub index_count: usize,
    /// Highest applied log index.
    pub last_applied_index: u64,
    /// Term of the last applied entry.
    pub last_applied_term: u64,
}

/// Match `key` (interpreted lossily as UTF-8) against a `*`-glob pattern.
pub(crate) fn glob_match(pattern: &str, key: &[u8]) -> bool {
    let text = String::from_utf8_lossy(key);
    glob_match_str(pattern, &text)
}

fn glob_match_str(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_rec(&p, &t)
}

fn glob_rec(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            glob_rec(&pattern[1..], text)
                || (!text.is_empty() && glob_rec(pattern, &text[1..]))
        }
        Some(c) => text.first() == Some(c) && glob_rec(&pattern[1..], &text[1..]),
    }
}
