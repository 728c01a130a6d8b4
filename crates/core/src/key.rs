//! The `Key` newtype and its length invariant.

use crate::error::{Error, Result};
use crate::limits::{MAX_KEY_LEN, MIN_KEY_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-empty byte string of at most [`MAX_KEY_LEN`] bytes.
///
/// Keys order lexicographically by their raw bytes, which is what makes
/// `Store::range`/`Store::prefix` iteration well-defined. Construction is
/// the single place the length invariant is enforced; once a `Key` exists,
/// every other component can assume it is valid.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Build a `Key`, rejecting empty or oversized byte strings.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() < MIN_KEY_LEN || bytes.len() > MAX_KEY_LEN {
            return Err(Error::InvalidKey(format!(
                "key length {} outside [{}, {}]",
                bytes.len(),
                MIN_KEY_LEN,
                MAX_KEY_LEN
            )));
        }
        Ok(Key(bytes))
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the key, returning the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Whether `self` begins with `prefix`.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Key({:?})", s),
            Err(_) => write!(f, "Key({:?})", self.0),
        }
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&str> for Key {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Key::new(s.as_bytes().to_vec())
    }
}

impl TryFrom<String> for Key {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Key::new(s.into_bytes())
    }
}

impl TryFrom<Vec<u8>> for Key {
    type Error = Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Key::new(bytes)
    }
}
