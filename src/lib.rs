//! # Concord
//!
//! A strongly-consistent, embedded, replicated key-value store. Consensus
//! (leader election, log replication, membership) is assumed to be
//! supplied externally, through the [`concord_consensus::Consensus`]
//! trait; this crate provides everything above that boundary: a
//! deterministic state machine, a value codec with transparent
//! compression, user-declared secondary indexes, conditional and bulk
//! writes, TTL expiration, and a change-data event stream.
//!
//! # Quick start
//!
//! ```no_run
//! use concord::{Config, ExtractorRegistry, Node, PredicateRegistry, Value};
//!
//! fn main() -> concord::Result<()> {
//!     let config = Config::new("my-cluster", "./data");
//!     let node = Node::start("node-1", config, ExtractorRegistry::new(), PredicateRegistry::new())?;
//!
//!     node.put(b"user:1".to_vec(), Value::from("alice"), None)?;
//!     let outcome = node.get(concord::Key::new(b"user:1".to_vec())?)?;
//!     assert_eq!(outcome.result.unwrap().value, Value::from("alice"));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | **Value Codec** | Transparent zlib/gzip compression with a tagged wire format |
//! | **Store** | In-memory ordered map from key to versioned, TTL-aware record |
//! | **Secondary Index Engine** | User-declared inverted indexes, maintained incrementally |
//! | **State Machine** | The deterministic interpreter applying commands to the store and indexes |
//! | **Command Dispatcher** | Local validation plus submission of writes to the replicated log |
//! | **Query Router** | Routes reads to the consistency level the caller asked for |
//! | **TTL Reaper** | Background sweep of expired records, leader-driven |
//!
//! Internal crates (`concord-store`, `concord-index`, `concord-engine`,
//! `concord-dispatch`, `concord-reaper`) are not meant to be depended on
//! directly; [`Node`], re-exported here from `concord-api`, is the stable
//! entry point.

pub use concord_api::*;
pub use concord_core::{
    CompressionAlgorithm, CompressionConfig, Config, Error, EventStreamConfig, Key,
    ReadConsistency, Record, Result, TtlConfig, Value,
};
pub use concord_dispatch::{ConditionSpec, DispatchOptions, PutRequest, QueryOutcome, TouchRequest};
pub use concord_engine::{
    Command, Condition, Event, EventOp, KeysPattern, PredicateRegistry, PutOp, QueryValue,
    QueryValueWithTtl, Stats, Subscription, SubscriptionFilter, TouchOp, TtlStatus,
};
pub use concord_index::{ExtractorRegistry, IndexDescriptor};
