//! The deterministic state machine: the command/query
//! interpreter over the store, secondary indexes, and value codec. This
//! is "the heart" -- everything else in the workspace exists to get
//! commands to `apply` in the same order on every replica and to read
//! its state back out.

use crate::command::{Command, Condition, PutOp, TouchOp};
use crate::events::{Event, EventOp, EventPublisher, Subscription, SubscriptionFilter};
use crate::query::{glob_match, KeysPattern, QueryValue, QueryValueWithTtl, Stats, TtlStatus};
use concord_consensus::ApplyMeta;
use concord_core::{CompressionConfig, Error, Key, Record, Result, Value};
use concord_index::{ExtractorRegistry, IndexDescriptor, IndexEngine};
use concord_snapshot::{IndexCatalogEntry, RecordEntry, SnapshotState};
use concord_store::Store;
use std::collections::BTreeSet;

use crate::predicate::PredicateRegistry;
use tracing::{debug, warn};

/// What `apply` returns for a successfully committed command.
///
/// Serializable so it can cross the `Consensus::submit_command` opaque-bytes
/// boundary (see [`crate::reply`]).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ApplyReply {
    /// `put`, `put_if`.
    Ack {
        /// The record's version after this write.
        version: u64,
    },
    /// `delete`, `delete_if`.
    Deleted,
    /// `touch`.
    Touched {
        /// The record's new absolute expiry.
        expires_at: i64,
    },
    /// `put_many`, `touch_many`.
    BulkAck {
        /// Number of sub-operations applied.
        count: usize,
    },
    /// `delete_many`.
    BulkDeleted {
        /// Number of keys actually removed (absent keys are no-ops).
        count: usize,
    },
    /// `cleanup_expired`.
    CleanupAck {
        /// Number of expired records removed.
        deleted: u64,
    },
    /// `index_create`, `index_drop`, `index_reindex`.
    IndexAck,
}

fn command_kind(cmd: &Command) -> &'static str {
    match cmd {
        Command::Put { .. } => "put",
        Command::Delete { .. } => "delete",
        Command::Touch { .. } => "touch",
        Command::PutIf { .. } => "put_if",
        Command::DeleteIf { .. } => "delete_if",
        Command::PutMany { .. } => "put_many",
        Command::DeleteMany { .. } => "delete_many",
        Command::TouchMany { .. } => "touch_many",
        Command::CleanupExpired { .. } => "cleanup_expired",
        Command::IndexCreate { .. } => "index_create",
        Command::IndexDrop { .. } => "index_drop",
        Command::IndexReindex { .. } => "index_reindex",
    }
}

/// The replicated key-value state machine.
pub struct StateMachine {
    store: Store,
    indexes: IndexEngine,
    extractors: ExtractorRegistry,
    predicates: PredicateRegistry,
    compression: CompressionConfig,
    events: EventPublisher,
    node_id: String,
    last_applied_index: u64,
    last_applied_term: u64,
}

impl StateMachine {
    /// Build an empty state machine. `extractors`/`predicates` must be
    /// identical across every node in the cluster: they are
    /// registered at startup, never shipped across the log.
    pub fn new(
        node_id: impl Into<String>,
        compression: CompressionConfig,
        extractors: ExtractorRegistry,
        predicates: PredicateRegistry,
        event_stream_enabled: bool,
        event_buffer_size: usize,
    ) -> Self {
        StateMachine {
            store: Store::new(),
            indexes: IndexEngine::new(),
            extractors,
            predicates,
            compression,
            events: EventPublisher::new(event_stream_enabled, event_buffer_size),
            node_id: node_id.into(),
            last_applied_index: 0,
            last_applied_term: 0,
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        concord_codec::decode(bytes)
    }

    fn encode(&self, value: &[u8]) -> Vec<u8> {
        concord_codec::encode(value, &self.compression)
    }

    fn publish(&self, op: EventOp, keys: Vec<Key>, version: u64, applied_index: u64) {
        self.events.publish(Event {
            op,
            keys,
            version,
            applied_index,
            node_id: self.node_id.clone(),
        });
    }

    /// Register a new event subscriber.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.events.subscribe(filter)
    }

    /// Total events dropped across all subscribers due to backpressure.
    pub fn backpressure_dropped(&self) -> u64 {
        self.events.backpressure_dropped()
    }

    /// Apply a committed log entry. Never panics on well-formed input;
    /// an internal inconsistency surfaces as `Error::CorruptState`, which
    /// the host must treat as fatal.
    pub fn apply(&mut self, cmd: &Command, meta: ApplyMeta) -> Result<ApplyReply> {
        self.last_applied_index = meta.log_index;
        self.last_applied_term = meta.log_term;

        debug!(target: "concord::engine", command = command_kind(cmd), log_index = meta.log_index, "applying command");

        let result = match cmd {
            Command::Put { key, value, expires_at } => {
                self.apply_put(key, value, *expires_at, meta)
            }
            Command::Delete { key } => self.apply_delete(key, meta),
            Command::Touch { key, additional_seconds } => {
                self.apply_touch(key, *additional_seconds, meta)
            }
            Command::PutIf { key, value, expires_at, condition } => {
                self.apply_put_if(key, value, *expires_at, condition, meta)
            }
            Command::DeleteIf { key, condition } => self.apply_delete_if(key, condition, meta),
            Command::PutMany { ops } => self.apply_put_many(ops, meta),
            Command::DeleteMany { keys } => self.apply_delete_many(keys, meta),
            Command::TouchMany { ops } => self.apply_touch_many(ops, meta),
            Command::CleanupExpired { now_seconds } => self.apply_cleanup_expired(*now_seconds, meta),
            Command::IndexCreate { descriptor, reindex } => {
                self.apply_index_create(descriptor.clone(), *reindex, meta)
            }
            Command::IndexDrop { name } => self.apply_index_drop(name, meta),
            Command::IndexReindex { name } => self.apply_index_reindex(name, meta),
        };

        if let Err(err) = &result {
            warn!(target: "concord::engine", error = %err, log_index = meta.log_index, "command application failed");
        }

        result
    }

    fn apply_put(
        &mut self,
        key: &Key,
        value: &Value,
        expires_at: Option<i64>,
        meta: ApplyMeta,
    ) -> Result<ApplyReply> {
        let old = self.store.get_raw(key);
        let version = old.as_ref().map(|r| r.version + 1).unwrap_or(1);
        let encoded = self.encode(value.as_bytes());
        let new_record = Record {
            value: Value::from(encoded),
            expires_at,
            version,
        };
        self.store.put(key.clone(), new_record.clone());
        let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
        self.indexes
            .on_put(key, old.as_ref(), Some(&new_record), &self.extractors, decode);
        self.publish(EventOp::Put, vec![key.clone()], version, meta.log_index);
        Ok(ApplyReply::Ack { version })
    }

    fn apply_delete(&mut self, key: &Key, meta: ApplyMeta) -> Result<ApplyReply> {
        let old = self
            .store
            .get(key, meta.now_seconds)
            .ok_or(Error::NotFound)?;
        self.store.delete(key);
        let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
        self.indexes.on_delete(key, &old, &self.extractors, decode);
        self.publish(EventOp::Delete, vec![key.clone()], old.version, meta.log_index);
        Ok(ApplyReply::Deleted)
    }

    fn apply_touch(
        &mut self,
        key: &Key,
        additional_seconds: i64,
        meta: ApplyMeta,
    ) -> Result<ApplyReply> {
        let current = self
            .store
            .get(key, meta.now_seconds)
            .ok_or(Error::NotFound)?;
        let base = current.expires_at.unwrap_or(meta.now_seconds).max(meta.now_seconds);
        let new_expires = base + additional_seconds;
        let new_record = Record {
            value: current.value.clone(),
            expires_at: Some(new_expires),
            version: current.version,
        };
        self.store.put(key.clone(), new_record);
        self.publish(EventOp::Touch, vec![key.clone()], current.version, meta.log_index);
        Ok(ApplyReply::Touched { expires_at: new_expires })
    }

    fn evaluate_condition(&self, condition: &Condition, record: &Record) -> Result<bool> {
        let decoded = self.decode(record.value.as_bytes())?;
        Ok(match condition {
            Condition::Expected(expected) => decoded == expected.as_bytes(),
            Condition::PredicateToken { predicate_id, token } => {
                self.predicates.evaluate(predicate_id, &decoded, token)
            }
        })
    }

    fn apply_put_if(
        &mut self,
        key: &Key,
        value: &Value,
        expires_at: Option<i64>,
        condition: &Condition,
        meta: ApplyMeta,
    ) -> Result<ApplyReply> {
        let current = self
            .store
            .get(key, meta.now_seconds)
            .ok_or(Error::NotFound)?;
        if !self.evaluate_condition(condition, &current)? {
            return Err(Error::ConditionFailed);
        }
        let version = current.version + 1;
        let encoded = self.encode(value.as_bytes());
        let new_record = Record {
            value: Value::from(encoded),
            expires_at,
            version,
        };
        self.store.put(key.clone(), new_record.clone());
        let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
        self.indexes
            .on_put(key, Some(&current), Some(&new_record), &self.extractors, decode);
        self.publish(EventOp::PutIf, vec![key.clone()], version, meta.log_index);
        Ok(ApplyReply::Ack { version })
    }

    fn apply_delete_if(
        &mut self,
        key: &Key,
        condition: &Condition,
        meta: ApplyMeta,
    ) -> Result<ApplyReply> {
        let current = self
            .store
            .get(key, meta.now_seconds)
            .ok_or(Error::NotFound)?;
        if !self.evaluate_condition(condition, &current)? {
            return Err(Error::ConditionFailed);
        }
        self.store.delete(key);
        let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
        self.indexes.on_delete(key, &current, &self.extractors, decode);
        self.publish(EventOp::DeleteIf, vec![key.clone()], current.version, meta.log_index);
        Ok(ApplyReply::Deleted)
    }

    fn apply_put_many(&mut self, ops: &[PutOp], meta: ApplyMeta) -> Result<ApplyReply> {
        // Nothing here can fail: every key was already validated before
        // the command reached the log, and a plain put carries no
        // precondition. Applying "all at once" still demonstrates the
        // all-or-nothing property expected of bulk writes.
        let mut keys = Vec::with_capacity(ops.len());
        for op in ops {
            let old = self.store.get_raw(&op.key);
            let version = old.as_ref().map(|r| r.version + 1).unwrap_or(1);
            let encoded = self.encode(op.value.as_bytes());
            let new_record = Record {
                value: Value::from(encoded),
                expires_at: op.expires_at,
                version,
            };
            self.store.put(op.key.clone(), new_record.clone());
            let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
            self.indexes
                .on_put(&op.key, old.as_ref(), Some(&new_record), &self.extractors, decode);
            keys.push(op.key.clone());
        }
        self.publish(EventOp::PutMany, keys, 0, meta.log_index);
        Ok(ApplyReply::BulkAck { count: ops.len() })
    }

    fn apply_delete_many(&mut self, keys: &[Key], meta: ApplyMeta) -> Result<ApplyReply> {
        let mut removed = Vec::new();
        for key in keys {
            if let Some(old) = self.store.get(key, meta.now_seconds) {
                self.store.delete(key);
                let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
                self.indexes.on_delete(key, &old, &self.extractors, decode);
                removed.push(key.clone());
            }
        }
        let count = removed.len();
        self.publish(EventOp::DeleteMany, removed, 0, meta.log_index);
        Ok(ApplyReply::BulkDeleted { count })
    }

    fn apply_touch_many(&mut self, ops: &[TouchOp], meta: ApplyMeta) -> Result<ApplyReply> {
        // All-or-nothing: a touch on a single missing key fails the whole
        // batch, so every key's presence is checked before any mutation.
        let mut currents = Vec::with_capacity(ops.len());
        for op in ops {
            let current = self
                .store
                .get(&op.key, meta.now_seconds)
                .ok_or(Error::NotFound)?;
            currents.push(current);
        }

        let mut keys = Vec::with_capacity(ops.len());
        for (op, current) in ops.iter().zip(currents) {
            let base = current.expires_at.unwrap_or(meta.now_seconds).max(meta.now_seconds);
            let new_expires = base + op.additional_seconds;
            let new_record = Record {
                value: current.value.clone(),
                expires_at: Some(new_expires),
                version: current.version,
            };
            self.store.put(op.key.clone(), new_record);
            keys.push(op.key.clone());
        }
        self.publish(EventOp::TouchMany, keys, 0, meta.log_index);
        Ok(ApplyReply::BulkAck { count: ops.len() })
    }

    fn apply_cleanup_expired(&mut self, now_seconds: i64, meta: ApplyMeta) -> Result<ApplyReply> {
        let expired: Vec<(Key, Record)> = self
            .store
            .iter_all()
            .into_iter()
            .filter(|(_, r)| r.is_expired(now_seconds))
            .collect();

        let mut keys = Vec::with_capacity(expired.len());
        for (key, record) in &expired {
            self.store.delete(key);
            let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
            self.indexes.on_delete(key, record, &self.extractors, decode);
            keys.push(key.clone());
        }
        let deleted = keys.len() as u64;
        self.publish(EventOp::CleanupExpired, keys, 0, meta.log_index);
        Ok(ApplyReply::CleanupAck { deleted })
    }

    fn apply_index_create(
        &mut self,
        descriptor: IndexDescriptor,
        reindex: bool,
        meta: ApplyMeta,
    ) -> Result<ApplyReply> {
        let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
        self.indexes.create(
            descriptor,
            reindex,
            &self.extractors,
            &self.store,
            meta.now_seconds,
            decode,
        )?;
        self.publish(EventOp::IndexCreate, vec![], 0, meta.log_index);
        Ok(ApplyReply::IndexAck)
    }

    fn apply_index_drop(&mut self, name: &str, meta: ApplyMeta) -> Result<ApplyReply> {
        self.indexes.drop(name)?;
        self.publish(EventOp::IndexDrop, vec![], 0, meta.log_index);
        Ok(ApplyReply::IndexAck)
    }

    fn apply_index_reindex(&mut self, name: &str, meta: ApplyMeta) -> Result<ApplyReply> {
        let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
        self.indexes
            .reindex(name, &self.extractors, &self.store, meta.now_seconds, decode)?;
        self.publish(EventOp::IndexReindex, vec![], 0, meta.log_index);
        Ok(ApplyReply::IndexAck)
    }

    // ---- Queries: read-only, never mutate state. ----

    /// Fetch and decode the value at `key`, `None` if absent or expired
    /// as of `now`.
    pub fn get(&self, key: &Key, now: i64) -> Result<Option<QueryValue>> {
        match self.store.get(key, now) {
            None => Ok(None),
            Some(record) => {
                let decoded = self.decode(record.value.as_bytes())?;
                Ok(Some(QueryValue { value: Value::from(decoded), version: record.version }))
            }
        }
    }

    /// Like `get`, also returning the record's expiry.
    pub fn get_with_ttl(&self, key: &Key, now: i64) -> Result<Option<QueryValueWithTtl>> {
        match self.store.get(key, now) {
            None => Ok(None),
            Some(record) => {
                let decoded = self.decode(record.value.as_bytes())?;
                Ok(Some(QueryValueWithTtl {
                    value: Value::from(decoded),
                    version: record.version,
                    expires_at: record.expires_at,
                }))
            }
        }
    }

    /// Remaining time-to-live for `key`.
    pub fn ttl(&self, key: &Key, now: i64) -> TtlStatus {
        match self.store.get(key, now) {
            None => TtlStatus::Absent,
            Some(record) => match record.expires_at {
                None => TtlStatus::NoExpiry,
                Some(exp) => TtlStatus::ExpiresIn(exp - now),
            },
        }
    }

    /// Every non-expired entry, decoded, in lexicographic key order.
    pub fn get_all(&self, now: i64) -> Result<Vec<(Key, QueryValue)>> {
        self.store
            .iter(now)
            .into_iter()
            .map(|(k, r)| {
                let decoded = self.decode(r.value.as_bytes())?;
                Ok((k, QueryValue { value: Value::from(decoded), version: r.version }))
            })
            .collect()
    }

    /// Like `get_all`, also returning each record's expiry.
    pub fn get_all_with_ttl(&self, now: i64) -> Result<Vec<(Key, QueryValueWithTtl)>> {
        self.store
            .iter(now)
            .into_iter()
            .map(|(k, r)| {
                let decoded = self.decode(r.value.as_bytes())?;
                Ok((
                    k,
                    QueryValueWithTtl {
                        value: Value::from(decoded),
                        version: r.version,
                        expires_at: r.expires_at,
                    },
                ))
            })
            .collect()
    }

    /// Fetch several keys at once, preserving input order.
    pub fn get_many(&self, keys: &[Key], now: i64) -> Result<Vec<(Key, Option<QueryValue>)>> {
        keys.iter()
            .map(|k| {
                let value = self.get(k, now)?;
                Ok((k.clone(), value))
            })
            .collect()
    }

    /// Keys currently mapped to `token` under index `name`.
    pub fn lookup_index(&self, name: &str, token: &str) -> BTreeSet<Key> {
        self.indexes.lookup(name, token)
    }

    /// Keys matching `pattern`, lexicographically ordered, paginated by
    /// `limit`/`offset`.
    pub fn keys_by(&self, pattern: &KeysPattern, limit: usize, offset: usize, now: i64) -> Vec<Key> {
        let all: Vec<Key> = match pattern {
            KeysPattern::Prefix(prefix) => {
                self.store.prefix(prefix, now).into_iter().map(|(k, _)| k).collect()
            }
            KeysPattern::Range(from, to) => {
                self.store.range(from, to, now).into_iter().map(|(k, _)| k).collect()
            }
            KeysPattern::Glob(pattern) => self
                .store
                .iter(now)
                .into_iter()
                .filter(|(k, _)| glob_match(pattern, k.as_bytes()))
                .map(|(k, _)| k)
                .collect(),
        };
        all.into_iter().skip(offset).take(limit).collect()
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> Stats {
        Stats {
            size: self.store.size(),
            memory_usage: self.store.memory_usage(),
            index_count: self.indexes.descriptors().len(),
            last_applied_index: self.last_applied_index,
            last_applied_term: self.last_applied_term,
        }
    }

    /// Highest applied log index.
    pub fn last_applied_index(&self) -> u64 {
        self.last_applied_index
    }

    /// Term of the last applied entry.
    pub fn last_applied_term(&self) -> u64 {
        self.last_applied_term
    }

    /// Serialize full state for the snapshot codec. Records
    /// are emitted in lexicographic key order for reproducibility.
    pub fn to_snapshot_state(&self, created_unix: u64) -> SnapshotState {
        let records = self
            .store
            .iter_all()
            .into_iter()
            .map(|(key, record)| RecordEntry {
                key: key.into_bytes(),
                has_expires_at: record.expires_at.is_some(),
                expires_at: record.expires_at.unwrap_or(0),
                version: record.version,
                value: record.value.into_bytes(),
            })
            .collect();

        let index_catalog = self
            .indexes
            .descriptors()
            .into_iter()
            .map(|d| IndexCatalogEntry { name: d.name, extractor_id: d.extractor_id })
            .collect();

        SnapshotState {
            created_unix,
            last_applied_index: self.last_applied_index,
            last_applied_term: self.last_applied_term,
            index_catalog,
            records,
        }
    }

    /// Restore full state from a decoded snapshot, rebuilding every
    /// secondary index by replaying its extractor, which is acceptable
    /// since extractor identity is part of the descriptor.
    pub fn restore_from_snapshot(&mut self, state: SnapshotState) -> Result<()> {
        let entries: Vec<(Key, Record)> = state
            .records
            .into_iter()
            .map(|r| {
                let key = Key::new(r.key)?;
                let record = Record {
                    value: Value::from(r.value),
                    expires_at: if r.has_expires_at { Some(r.expires_at) } else { None },
                    version: r.version,
                };
                Ok((key, record))
            })
            .collect::<Result<_>>()?;
        self.store.replace_all(entries);
        self.last_applied_index = state.last_applied_index;
        self.last_applied_term = state.last_applied_term;

        for entry in state.index_catalog {
            let desc = IndexDescriptor {
                name: entry.name,
                extractor_id: entry.extractor_id,
                reindex_on_create: true,
            };
            let decode = |b: &[u8]| self.decode(b).unwrap_or_default();
            self.indexes.create(
                desc,
                true,
                &self.extractors,
                &self.store,
                state.last_applied_index as i64,
                decode,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        Key::new(s.as_bytes().to_vec()).unwrap()
    }

    fn meta(index: u64, now: i64) -> ApplyMeta {
        ApplyMeta { log_index: index, log_term: 1, now_seconds: now }
    }

    fn machine() -> StateMachine {
        StateMachine::new(
            "n1",
            CompressionConfig::default(),
            ExtractorRegistry::new(),
            PredicateRegistry::new(),
            true,
            100,
        )
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut sm = machine();
        sm.apply(&Command::Put { key: key("a"), value: Value::from("1"), expires_at: None }, meta(1, 0))
            .unwrap();
        let got = sm.get(&key("a"), 0).unwrap().unwrap();
        assert_eq!(got.value, Value::from("1"));
        assert_eq!(got.version, 1);
    }

    #[test]
    fn put_overwrite_bumps_version() {
        let mut sm = machine();
        sm.apply(&Command::Put { key: key("a"), value: Value::from("1"), expires_at: None }, meta(1, 0))
            .unwrap();
        let reply = sm
            .apply(&Command::Put { key: key("a"), value: Value::from("2"), expires_at: None }, meta(2, 0))
            .unwrap();
        assert_eq!(reply, ApplyReply::Ack { version: 2 });
    }

    #[test]
    fn delete_then_delete_again_is_not_found() {
        let mut sm = machine();
        sm.apply(&Command::Put { key: key("a"), value: Value::from("1"), expires_at: None }, meta(1, 0))
            .unwrap();
        sm.apply(&Command::Delete { key: key("a") }, meta(2, 0)).unwrap();
        let err = sm.apply(&Command::Delete { key: key("a") }, meta(3, 0)).unwrap_err();
        assert_eq!(err, Error::NotFound);
    }

    #[test]
    fn touch_extends_expiry_without_bumping_version() {
        let mut sm = machine();
        sm.apply(
            &Command::Put { key: key("a"), value: Value::from("1"), expires_at: Some(100) },
            meta(1, 0),
        )
        .unwrap();
        let reply = sm.apply(&Command::Touch { key: key("a"), additional_seconds: 50 }, meta(2, 10)).unwrap();
        assert_eq!(reply, ApplyReply::Touched { expires_at: 150 });
        let got = sm.get(&key("a"), 10).unwrap().unwrap();
        assert_eq!(got.version, 1);
    }

    #[test]
    fn touch_on_missing_key_is_not_found() {
        let mut sm = machine();
        let err = sm.apply(&Command::Touch { key: key("a"), additional_seconds: 10 }, meta(1, 0)).unwrap_err();
        assert_eq!(err, Error::NotFound);
    }

    #[test]
    fn put_if_expected_succeeds_and_fails_correctly() {
        let mut sm = machine();
        sm.apply(&Command::Put { key: key("a"), value: Value::from("0"), expires_at: None }, meta(1, 0))
            .unwrap();

        let good = sm.apply(
            &Command::PutIf {
                key: key("a"),
                value: Value::from("1"),
                expires_at: None,
                condition: Condition::Expected(Value::from("0")),
            },
            meta(2, 0),
        );
        assert!(good.is_ok());

        let bad = sm.apply(
            &Command::PutIf {
                key: key("a"),
                value: Value::from("2"),
                expires_at: None,
                condition: Condition::Expected(Value::from("0")),
            },
            meta(3, 0),
        );
        assert_eq!(bad.unwrap_err(), Error::ConditionFailed);
    }

    #[test]
    fn put_if_on_missing_key_is_not_found() {
        let mut sm = machine();
        let err = sm
            .apply(
                &Command::PutIf {
                    key: key("a"),
                    value: Value::from("1"),
                    expires_at: None,
                    condition: Condition::Expected(Value::from("0")),
                },
                meta(1, 0),
            )
            .unwrap_err();
        assert_eq!(err, Error::NotFound);
    }

    #[test]
    fn put_many_applies_every_op() {
        let mut sm = machine();
        let ops = vec![
            PutOp { key: key("a"), value: Value::from("1"), expires_at: None },
            PutOp { key: key("b"), value: Value::from("2"), expires_at: None },
        ];
        let reply = sm.apply(&Command::PutMany { ops }, meta(1, 0)).unwrap();
        assert_eq!(reply, ApplyReply::BulkAck { count: 2 });
        assert!(sm.get(&key("a"), 0).unwrap().is_some());
        assert!(sm.get(&key("b"), 0).unwrap().is_some());
    }

    #[test]
    fn touch_many_fails_entirely_if_any_key_missing() {
        let mut sm = machine();
        sm.apply(&Command::Put { key: key("a"), value: Value::from("1"), expires_at: Some(100) }, meta(1, 0))
            .unwrap();
        let ops = vec![
            TouchOp { key: key("a"), additional_seconds: 10 },
            TouchOp { key: key("missing"), additional_seconds: 10 },
        ];
        let err = sm.apply(&Command::TouchMany { ops }, meta(2, 0)).unwrap_err();
        assert_eq!(err, Error::NotFound);
        // "a" must be untouched since the batch failed atomically.
        let got = sm.get_with_ttl(&key("a"), 0).unwrap().unwrap();
        assert_eq!(got.expires_at, Some(100));
    }

    #[test]
    fn delete_many_is_a_no_op_for_absent_keys() {
        let mut sm = machine();
        sm.apply(&Command::Put { key: key("a"), value: Value::from("1"), expires_at: None }, meta(1, 0))
            .unwrap();
        let reply = sm
            .apply(&Command::DeleteMany { keys: vec![key("a"), key("missing")] }, meta(2, 0))
            .unwrap();
        assert_eq!(reply, ApplyReply::BulkDeleted { count: 1 });
    }

    #[test]
    fn cleanup_expired_removes_only_expired_records() {
        let mut sm = machine();
        sm.apply(&Command::Put { key: key("a"), value: Value::from("1"), expires_at: Some(50) }, meta(1, 0))
            .unwrap();
        sm.apply(&Command::Put { key: key("b"), value: Value::from("2"), expires_at: None }, meta(2, 0))
            .unwrap();
        let reply = sm.apply(&Command::CleanupExpired { now_seconds: 100 }, meta(3, 100)).unwrap();
        assert_eq!(reply, ApplyReply::CleanupAck { deleted: 1 });
        assert!(sm.get(&key("a"), 100).unwrap().is_none());
        assert!(sm.get(&key("b"), 100).unwrap().is_some());
    }

    #[test]
    fn cleanup_expired_on_empty_store_is_ok_zero() {
        let mut sm = machine();
        let reply = sm.apply(&Command::CleanupExpired { now_seconds: 100 }, meta(1, 100)).unwrap();
        assert_eq!(reply, ApplyReply::CleanupAck { deleted: 0 });
    }

    #[test]
    fn index_create_rejects_unregistered_extractor() {
        let mut sm = machine();
        let desc = IndexDescriptor { name: "by_word".into(), extractor_id: "missing".into(), reindex_on_create: false };
        let err = sm.apply(&Command::IndexCreate { descriptor: desc, reindex: false }, meta(1, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidOperationFormat(_)));
    }

    #[test]
    fn index_lookup_reflects_writes_through_decoded_values() {
        let mut extractors = ExtractorRegistry::new();
        extractors.register("words", |v: &[u8]| {
            String::from_utf8_lossy(v).split_whitespace().map(|w| w.to_string()).collect()
        });
        let mut sm = StateMachine::new(
            "n1",
            CompressionConfig { enabled: true, algorithm: concord_core::CompressionAlgorithm::Zlib, threshold_bytes: 1, level: 6 },
            extractors,
            PredicateRegistry::new(),
            true,
            100,
        );
        let desc = IndexDescriptor { name: "by_word".into(), extractor_id: "words".into(), reindex_on_create: false };
        sm.apply(&Command::IndexCreate { descriptor: desc, reindex: false }, meta(1, 0)).unwrap();
        sm.apply(
            &Command::Put { key: key("doc1"), value: Value::from("hello world this value is long enough to compress"), expires_at: None },
            meta(2, 0),
        )
        .unwrap();
        // Lookup must see tokens extracted from the *decoded* value even
        // though the stored bytes are compressed.
        assert!(sm.lookup_index("by_word", "hello").contains(&key("doc1")));
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let mut sm = machine();
        sm.apply(&Command::Put { key: key("a"), value: Value::from("1"), expires_at: None }, meta(1, 0))
            .unwrap();
        sm.apply(&Command::Put { key: key("b"), value: Value::from("2"), expires_at: Some(500) }, meta(2, 0))
            .unwrap();
        let snap = sm.to_snapshot_state(1000);

        let mut sm2 = machine();
        sm2.restore_from_snapshot(snap).unwrap();
        assert_eq!(sm2.get(&key("a"), 0).unwrap().unwrap().value, Value::from("1"));
        assert_eq!(sm2.get(&key("b"), 0).unwrap().unwrap().value, Value::from("2"));
        assert_eq!(sm2.last_applied_index(), 2);
    }

    #[test]
    fn keys_by_prefix_is_ordered_and_paginated() {
        let mut sm = machine();
        for k in ["user:3", "user:1", "user:2"] {
            sm.apply(&Command::Put { key: key(k), value: Value::from("v"), expires_at: None }, meta(1, 0))
                .unwrap();
        }
        let got = sm.keys_by(&KeysPattern::Prefix(b"user:".to_vec()), 2, 0, 0);
        assert_eq!(got, vec![key("user:1"), key("user:2")]);
    }

    #[test]
    fn ttl_query_reports_absent_no_expiry_and_remaining() {
        let mut sm = machine();
        sm.apply(&Command::Put { key: key("a"), value: Value::from("1"), expires_at: None }, meta(1, 0))
            .unwrap();
        sm.apply(&Command::Put { key: key("b"), value: Value::from("1"), expires_at: Some(110) }, meta(2, 0))
            .unwrap();
        assert_eq!(sm.ttl(&key("missing"), 100), TtlStatus::Absent);
        assert_eq!(sm.ttl(&key("a"), 100), TtlStatus::NoExpiry);
        assert_eq!(sm.ttl(&key("b"), 100), TtlStatus::ExpiresIn(10));
    }
}
