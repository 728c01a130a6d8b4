//! Enumerated node configuration.

use crate::error::{Error, Result};
use crate::limits::{
    DEFAULT_EVENT_BUFFER_SIZE, DEFAULT_MAX_BATCH_SIZE, DEFAULT_TTL_CLEANUP_INTERVAL_SECONDS,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Read consistency level for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadConsistency {
    /// Local snapshot-consistent read, no round trip.
    Eventual,
    /// Read against the current leader's applied state, not quorum-checked.
    Leader,
    /// Linearizable read gated by a read-index quorum barrier.
    Strong,
}

impl Default for ReadConsistency {
    fn default() -> Self {
        ReadConsistency::Leader
    }
}

impl std::str::FromStr for ReadConsistency {
    type Err = std::convert::Infallible;

    /// Unknown values fall back to `Leader`: a misconfigured consistency
    /// string must never become a hard error at query time.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "eventual" => ReadConsistency::Eventual,
            "strong" => ReadConsistency::Strong,
            _ => ReadConsistency::Leader,
        })
    }
}

/// Compression algorithm choice for the value codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    /// zlib (deflate with a zlib wrapper).
    Zlib,
    /// gzip.
    Gzip,
}

/// Value codec configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Master switch; when `false`, all values are stored raw.
    pub enabled: bool,
    /// Algorithm used when compression is applied.
    pub algorithm: CompressionAlgorithm,
    /// Values shorter than this are stored raw regardless of `enabled`.
    pub threshold_bytes: u32,
    /// Compression level, 0..=9.
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            enabled: true,
            algorithm: CompressionAlgorithm::Zlib,
            threshold_bytes: 256,
            level: 6,
        }
    }
}

/// TTL subsystem configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Master switch for the reaper.
    pub enabled: bool,
    /// Suggested default TTL for callers; not enforced by the store.
    pub default_seconds: Option<u64>,
    /// Reaper cadence.
    pub cleanup_interval_seconds: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        TtlConfig {
            enabled: true,
            default_seconds: None,
            cleanup_interval_seconds: DEFAULT_TTL_CLEANUP_INTERVAL_SECONDS,
        }
    }
}

/// Change-data event stream configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStreamConfig {
    /// Master switch; when `false`, no events are published.
    pub enabled: bool,
    /// Per-subscriber bounded buffer size.
    pub buffer_size: usize,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        EventStreamConfig {
            enabled: true,
            buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logical cluster id.
    pub cluster_name: String,
    /// On-disk root for snapshots.
    pub data_dir: PathBuf,
    /// Hard limit on bulk-command size.
    pub max_batch_size: usize,
    /// Default consistency level applied when a query doesn't specify one.
    pub default_read_consistency: ReadConsistency,
    /// TTL subsystem settings.
    pub ttl: TtlConfig,
    /// Value codec settings.
    pub compression: CompressionConfig,
    /// Event publisher settings.
    pub event_stream: EventStreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cluster_name: "concord".to_string(),
            data_dir: PathBuf::from("./data"),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            default_read_consistency: ReadConsistency::default(),
            ttl: TtlConfig::default(),
            compression: CompressionConfig::default(),
            event_stream: EventStreamConfig::default(),
        }
    }
}

impl Config {
    /// Start from defaults and set the cluster name and data directory,
    /// the two fields every deployment must customize.
    pub fn new(cluster_name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Config {
            cluster_name: cluster_name.into(),
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set `max_batch_size`.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Set `default_read_consistency`.
    pub fn with_default_read_consistency(mut self, level: ReadConsistency) -> Self {
        self.default_read_consistency = level;
        self
    }

    /// Set the TTL subsystem config.
    pub fn with_ttl(mut self, ttl: TtlConfig) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the compression config.
    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// Set the event stream config.
    pub fn with_event_stream(mut self, event_stream: EventStreamConfig) -> Self {
        self.event_stream = event_stream;
        self
    }

    /// Reject configurations that cannot be served correctly.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(Error::InvalidConfig("cluster_name must not be empty".into()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig("max_batch_size must be > 0".into()));
        }
        if self.compression.level > 9 {
            return Err(Error::InvalidConfig("compression.level must be 0..=9".into()));
        }
        Ok(())
    }
}
