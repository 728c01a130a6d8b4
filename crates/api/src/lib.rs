//! Public facade wiring the value codec, store, secondary index engine,
//! state machine, command dispatcher, query router, and TTL reaper
//! behind one embeddable [`Node`].
//!
//! A `Node` always runs over [`concord_consensus::LocalConsensus`]: this
//! workspace defines the consensus contract but not a real multi-node
//! implementation, so a `Node` here is a fully functional single-node
//! deployment, or a building block for an embedder supplying their own
//! `Consensus` implementation directly against `concord-dispatch` and
//! `concord-engine`.

#![warn(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use concord_consensus::{ApplyMeta, Consensus, LocalConsensus};
use concord_core::{
    Config, Error, Key, Result, Value,
};
use concord_dispatch::{ConditionSpec, DispatchOptions, Dispatcher, PutRequest, QueryOutcome, QueryRouter, TouchRequest};
use concord_engine::{
    decode_command, encode_reply, KeysPattern, PredicateRegistry, QueryValue, QueryValueWithTtl,
    StateMachine, Stats, Subscription, SubscriptionFilter, TtlStatus,
};
use concord_index::{ExtractorRegistry, IndexDescriptor};
use concord_reaper::Reaper;

type NodeConsensus = LocalConsensus<StateMachine>;

/// An embedded, single-process Concord node: owns its state machine,
/// runs commands through the dispatcher, serves reads through the query
/// router, and runs the TTL reaper in the background.
pub struct Node {
    config: Config,
    consensus: Arc<NodeConsensus>,
    dispatcher: Arc<Dispatcher<NodeConsensus>>,
    router: QueryRouter<NodeConsensus>,
    #[allow(dead_code)]
    reaper: Arc<Reaper<NodeConsensus>>,
}

impl Node {
    /// Start a node under `node_id`, validating `config` and wiring the
    /// state machine with `extractors`/`predicates` registered at boot.
    /// Extractors and predicates are looked up by id from the log, so
    /// every node in a cluster must register the same set before serving
    /// traffic.
    pub fn start(
        node_id: impl Into<String>,
        config: Config,
        extractors: ExtractorRegistry,
        predicates: PredicateRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let node_id = node_id.into();

        let state = StateMachine::new(
            node_id.clone(),
            config.compression.clone(),
            extractors,
            predicates,
            config.event_stream.enabled,
            config.event_stream.buffer_size,
        );

        let consensus = Arc::new(LocalConsensus::new(
            node_id,
            state,
            |state: &mut StateMachine, payload: &[u8], meta: ApplyMeta| {
                let result = decode_command(payload).and_then(|cmd| state.apply(&cmd, meta));
                encode_reply(&result)
            },
            |state: &StateMachine| {
                let snapshot_state = state.to_snapshot_state(chrono::Utc::now().timestamp());
                concord_snapshot::snapshot(&snapshot_state)
            },
            |state: &mut StateMachine, bytes: &[u8]| {
                if let Ok(snapshot_state) = concord_snapshot::restore(bytes) {
                    if let Err(err) = state.restore_from_snapshot(snapshot_state) {
                        tracing::warn!(error = %err, "discarding malformed installed snapshot");
                    }
                }
            },
            || chrono::Utc::now().timestamp(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(consensus.clone(), config.max_batch_size));
        let router = QueryRouter::new(consensus.clone());
        let reaper = Reaper::new(dispatcher.clone(), &*consensus, &config.ttl);

        Ok(Node {
            config,
            consensus,
            dispatcher,
            router,
            reaper,
        })
    }

    fn opts(&self, ttl_seconds: Option<i64>) -> DispatchOptions {
        DispatchOptions {
            timeout_ms: 5_000,
            ttl_seconds,
            auth_token: None,
        }
    }

    // ---- Writes ----

    /// Store `value` at `key`, replacing any existing record and bumping
    /// its version. Returns the new version.
    pub fn put(&self, key: Vec<u8>, value: Value, ttl_seconds: Option<i64>) -> Result<u64> {
        self.dispatcher.put(key, value, &self.opts(ttl_seconds))
    }

    /// Remove `key`. Errors with `NotFound` if it is absent or expired.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.dispatcher.delete(key, &self.opts(None))
    }

    /// Extend `key`'s expiry by `additional_seconds` without changing its
    /// value or version. Returns the new absolute expiry.
    pub fn touch(&self, key: Vec<u8>, additional_seconds: i64) -> Result<i64> {
        self.dispatcher.touch(key, additional_seconds, &self.opts(None))
    }

    /// Conditionally store `value` at `key`, committing only if
    /// `condition` holds. Returns the new version.
    pub fn put_if(&self, key: Vec<u8>, value: Value, condition: ConditionSpec, ttl_seconds: Option<i64>) -> Result<u64> {
        self.dispatcher.put_if(key, value, condition, &self.opts(ttl_seconds))
    }

    /// Conditionally remove `key`, committing only if `condition` holds.
    pub fn delete_if(&self, key: Vec<u8>, condition: ConditionSpec) -> Result<()> {
        self.dispatcher.delete_if(key, condition, &self.opts(None))
    }

    /// Apply every put in `ops` atomically.
    pub fn put_many(&self, ops: Vec<PutRequest>) -> Result<usize> {
        self.dispatcher.put_many(ops, &self.opts(None))
    }

    /// Delete every key in `keys`, best-effort; absent keys are no-ops.
    pub fn delete_many(&self, keys: Vec<Vec<u8>>) -> Result<usize> {
        self.dispatcher.delete_many(keys, &self.opts(None))
    }

    /// Extend every key in `ops` atomically; fails entirely if any key is
    /// absent.
    pub fn touch_many(&self, ops: Vec<TouchRequest>) -> Result<usize> {
        self.dispatcher.touch_many(ops, &self.opts(None))
    }

    /// Force an immediate expired-record sweep, bypassing the reaper's
    /// schedule. Returns the number of records removed.
    pub fn cleanup_expired(&self) -> Result<u64> {
        self.dispatcher.cleanup_expired(chrono::Utc::now().timestamp(), &self.opts(None))
    }

    /// Register a new secondary index.
    pub fn index_create(&self, descriptor: IndexDescriptor, reindex: bool) -> Result<()> {
        self.dispatcher.index_create(descriptor, reindex, &self.opts(None))
    }

    /// Remove a secondary index.
    pub fn index_drop(&self, name: String) -> Result<()> {
        self.dispatcher.index_drop(name, &self.opts(None))
    }

    /// Rebuild a secondary index from scratch against current data.
    pub fn index_reindex(&self, name: String) -> Result<()> {
        self.dispatcher.index_reindex(name, &self.opts(None))
    }

    // ---- Queries ----

    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Fetch `key` at the node's default read consistency.
    pub fn get(&self, key: Key) -> Result<QueryOutcome<Option<QueryValue>>> {
        self.get_with_consistency(key, self.config.default_read_consistency)
    }

    /// Fetch `key` at an explicit consistency level.
    pub fn get_with_consistency(
        &self,
        key: Key,
        consistency: concord_core::ReadConsistency,
    ) -> Result<QueryOutcome<Option<QueryValue>>> {
        let now = self.now();
        self.router.route(consistency, Duration::from_secs(5), move |sm| sm.get(&key, now).unwrap_or(None))
    }

    /// Fetch `key` with its expiry, at the node's default read
    /// consistency.
    pub fn get_with_ttl(&self, key: Key) -> Result<QueryOutcome<Option<QueryValueWithTtl>>> {
        let now = self.now();
        self.router.route(self.config.default_read_consistency, Duration::from_secs(5), move |sm| {
            sm.get_with_ttl(&key, now).unwrap_or(None)
        })
    }

    /// Remaining time-to-live for `key`.
    pub fn ttl(&self, key: Key) -> Result<QueryOutcome<TtlStatus>> {
        let now = self.now();
        self.router
            .route(self.config.default_read_consistency, Duration::from_secs(5), move |sm| sm.ttl(&key, now))
    }

    /// Every non-expired entry, decoded, in lexicographic key order.
    pub fn get_all(&self) -> Result<QueryOutcome<Vec<(Key, QueryValue)>>> {
        let now = self.now();
        self.router.route(self.config.default_read_consistency, Duration::from_secs(5), move |sm| {
            sm.get_all(now).unwrap_or_default()
        })
    }

    /// Fetch several keys at once, preserving input order.
    pub fn get_many(&self, keys: Vec<Key>) -> Result<QueryOutcome<Vec<(Key, Option<QueryValue>)>>> {
        let now = self.now();
        self.router.route(self.config.default_read_consistency, Duration::from_secs(5), move |sm| {
            sm.get_many(&keys, now).unwrap_or_default()
        })
    }

    /// Keys currently mapped to `token` under index `name`.
    pub fn lookup_index(&self, name: String, token: String) -> Result<QueryOutcome<BTreeSet<Key>>> {
        self.router
            .route(self.config.default_read_consistency, Duration::from_secs(5), move |sm| sm.lookup_index(&name, &token))
    }

    /// Keys matching `pattern`, paginated by `limit`/`offset`.
    pub fn keys_by(&self, pattern: KeysPattern, limit: usize, offset: usize) -> Result<QueryOutcome<Vec<Key>>> {
        let now = self.now();
        self.router.route(self.config.default_read_consistency, Duration::from_secs(5), move |sm| {
            sm.keys_by(&pattern, limit, offset, now)
        })
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> Stats {
        self.consensus.local_query(|sm| sm.stats())
    }

    /// Cluster membership as seen by this node's consensus provider.
    pub fn members(&self) -> Vec<String> {
        self.consensus.members()
    }

    /// Subscribe to the change-data event stream.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.consensus.local_query(move |sm| sm.subscribe(filter.clone()))
    }

    /// Write a snapshot of current applied state to `path`, for manual
    /// backup. Cluster-coordinated backup scheduling and retention are
    /// the embedder's responsibility; this only captures one node's view.
    pub fn backup_to(&self, path: &std::path::Path) -> Result<()> {
        let bytes = self.consensus.take_snapshot();
        let snapshot_state =
            concord_snapshot::restore(&bytes).map_err(|_| Error::CorruptState("snapshot produced by take_snapshot failed to decode".into()))?;
        concord_snapshot::write_atomic(&snapshot_state, path).map_err(|e| Error::InvalidOperationFormat(e.to_string()))
    }

    /// Restore applied state from a snapshot file previously written by
    /// [`Node::backup_to`].
    pub fn restore_from(&self, path: &std::path::Path) -> Result<()> {
        let bytes = std::fs::read(path).map_err(|e| Error::InvalidOperationFormat(e.to_string()))?;
        self.consensus.install_snapshot(bytes)
    }
}
