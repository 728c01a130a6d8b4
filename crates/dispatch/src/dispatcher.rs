//! Command Dispatcher: local validation plus submission of write commands
//! to the replicated log.
//!
//! Every public method here builds a `Command`, validates it against the
//! configured limits before it ever reaches the log, encodes it, and
//! submits it through the `Consensus` contract. The decoded reply is
//! translated back into a typed result. Validation failures never touch
//! consensus at all; everything past that point is committed to the log
//! exactly as any other replica would see it.

use std::sync::Arc;
use std::time::Duration;

use concord_consensus::Consensus;
use concord_core::{Error, Key, Result, Value};
use concord_engine::{
    decode_reply, encode_command, ApplyReply, Command, Condition, PutOp, StateMachine, TouchOp,
};

/// Per-call options threaded through every dispatcher method.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Deadline for the call to observe a commit.
    pub timeout_ms: u64,
    /// TTL for writes that create or replace a record; `None` means no
    /// expiration.
    pub ttl_seconds: Option<i64>,
    /// Opaque bearer token forwarded by the host's auth layer. The
    /// dispatcher never inspects it.
    pub auth_token: Option<String>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        DispatchOptions {
            timeout_ms: 5_000,
            ttl_seconds: None,
            auth_token: None,
        }
    }
}

impl DispatchOptions {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A `put_if`/`delete_if` precondition as supplied by a caller, before it
/// is known to be well-formed.
#[derive(Debug, Clone, Default)]
pub struct ConditionSpec {
    /// Expect the current decoded value to equal this.
    pub expected: Option<Value>,
    /// Expect `predicate_id` to return true for the current value and this token.
    pub predicate: Option<(String, String)>,
}

impl ConditionSpec {
    fn resolve(self) -> Result<Condition> {
        match (self.expected, self.predicate) {
            (Some(_), Some(_)) => Err(Error::ConflictingConditions),
            (None, None) => Err(Error::MissingCondition),
            (Some(value), None) => Ok(Condition::Expected(value)),
            (None, Some((predicate_id, token))) => {
                Ok(Condition::PredicateToken { predicate_id, token })
            }
        }
    }
}

/// One write op within a `put_many` request, before key validation.
#[derive(Debug, Clone)]
pub struct PutRequest {
    /// Target key bytes.
    pub key: Vec<u8>,
    /// Value to store.
    pub value: Value,
    /// TTL for this specific op; overrides `DispatchOptions::ttl_seconds`.
    pub ttl_seconds: Option<i64>,
}

/// One touch op within a `touch_many` request, before key validation.
#[derive(Debug, Clone)]
pub struct TouchRequest {
    /// Target key bytes.
    pub key: Vec<u8>,
    /// Seconds to extend the expiry by.
    pub additional_seconds: i64,
}

/// Validates and submits write commands to the replicated log.
pub struct Dispatcher<C> {
    consensus: Arc<C>,
    max_batch_size: usize,
}

impl<C> Dispatcher<C>
where
    C: Consensus<State = StateMachine>,
{
    /// Build a dispatcher over `consensus`, rejecting any bulk command
    /// larger than `max_batch_size`.
    pub fn new(consensus: Arc<C>, max_batch_size: usize) -> Self {
        Dispatcher { consensus, max_batch_size }
    }

    fn check_ttl(ttl_seconds: Option<i64>) -> Result<()> {
        if let Some(ttl) = ttl_seconds {
            if ttl <= 0 {
                return Err(Error::InvalidTTL(format!("ttl_seconds must be positive, got {ttl}")));
            }
        }
        Ok(())
    }

    fn check_batch_size(&self, len: usize) -> Result<()> {
        if len > self.max_batch_size {
            return Err(Error::BatchTooLarge { len, limit: self.max_batch_size });
        }
        Ok(())
    }

    fn expires_at(&self, ttl_seconds: Option<i64>) -> Option<i64> {
        ttl_seconds.map(|ttl| chrono::Utc::now().timestamp() + ttl)
    }

    fn submit(&self, cmd: Command, opts: &DispatchOptions) -> Result<ApplyReply> {
        let payload = encode_command(&cmd);
        let commit = self.consensus.submit_command(payload, opts.timeout())?;
        decode_reply(&commit.reply)
    }

    /// Insert or overwrite a record.
    pub fn put(&self, key: Vec<u8>, value: Value, opts: &DispatchOptions) -> Result<u64> {
        Self::check_ttl(opts.ttl_seconds)?;
        let key = Key::new(key)?;
        let cmd = Command::Put { key, value, expires_at: self.expires_at(opts.ttl_seconds) };
        match self.submit(cmd, opts)? {
            ApplyReply::Ack { version } => Ok(version),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Remove a record.
    pub fn delete(&self, key: Vec<u8>, opts: &DispatchOptions) -> Result<()> {
        let key = Key::new(key)?;
        let cmd = Command::Delete { key };
        match self.submit(cmd, opts)? {
            ApplyReply::Deleted => Ok(()),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Extend a record's expiry.
    pub fn touch(&self, key: Vec<u8>, additional_seconds: i64, opts: &DispatchOptions) -> Result<i64> {
        if additional_seconds <= 0 {
            return Err(Error::InvalidTTL(format!(
                "additional_seconds must be positive, got {additional_seconds}"
            )));
        }
        let key = Key::new(key)?;
        let cmd = Command::Touch { key, additional_seconds };
        match self.submit(cmd, opts)? {
            ApplyReply::Touched { expires_at } => Ok(expires_at),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Conditionally insert or overwrite a record.
    pub fn put_if(
        &self,
        key: Vec<u8>,
        value: Value,
        condition: ConditionSpec,
        opts: &DispatchOptions,
    ) -> Result<u64> {
        Self::check_ttl(opts.ttl_seconds)?;
        let key = Key::new(key)?;
        let condition = condition.resolve()?;
        let cmd = Command::PutIf {
            key,
            value,
            expires_at: self.expires_at(opts.ttl_seconds),
            condition,
        };
        match self.submit(cmd, opts)? {
            ApplyReply::Ack { version } => Ok(version),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Conditionally remove a record.
    pub fn delete_if(&self, key: Vec<u8>, condition: ConditionSpec, opts: &DispatchOptions) -> Result<()> {
        let key = Key::new(key)?;
        let condition = condition.resolve()?;
        let cmd = Command::DeleteIf { key, condition };
        match self.submit(cmd, opts)? {
            ApplyReply::Deleted => Ok(()),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Atomically apply every put, or none.
    pub fn put_many(&self, ops: Vec<PutRequest>, opts: &DispatchOptions) -> Result<usize> {
        self.check_batch_size(ops.len())?;
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            let ttl = op.ttl_seconds.or(opts.ttl_seconds);
            Self::check_ttl(ttl)?;
            out.push(PutOp {
                key: Key::new(op.key)?,
                value: op.value,
                expires_at: self.expires_at(ttl),
            });
        }
        let cmd = Command::PutMany { ops: out };
        match self.submit(cmd, opts)? {
            ApplyReply::BulkAck { count } => Ok(count),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Atomically remove every key present; absent keys are no-ops.
    pub fn delete_many(&self, keys: Vec<Vec<u8>>, opts: &DispatchOptions) -> Result<usize> {
        self.check_batch_size(keys.len())?;
        let keys = keys.into_iter().map(Key::new).collect::<Result<Vec<_>>>()?;
        let cmd = Command::DeleteMany { keys };
        match self.submit(cmd, opts)? {
            ApplyReply::BulkDeleted { count } => Ok(count),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Atomically extend every key's expiry; fails entirely if any key is
    /// absent or expired.
    pub fn touch_many(&self, ops: Vec<TouchRequest>, opts: &DispatchOptions) -> Result<usize> {
        self.check_batch_size(ops.len())?;
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            if op.additional_seconds <= 0 {
                return Err(Error::InvalidTTL(format!(
                    "additional_seconds must be positive, got {}",
                    op.additional_seconds
                )));
            }
            out.push(TouchOp { key: Key::new(op.key)?, additional_seconds: op.additional_seconds });
        }
        let cmd = Command::TouchMany { ops: out };
        match self.submit(cmd, opts)? {
            ApplyReply::BulkAck { count } => Ok(count),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Submit a cleanup sweep for every record expired as of `now_seconds`.
    /// Used by the TTL reaper; also exposed here for manual/administrative
    /// invocation.
    pub fn cleanup_expired(&self, now_seconds: i64, opts: &DispatchOptions) -> Result<u64> {
        let cmd = Command::CleanupExpired { now_seconds };
        match self.submit(cmd, opts)? {
            ApplyReply::CleanupAck { deleted } => Ok(deleted),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Register a new secondary index.
    pub fn index_create(
        &self,
        descriptor: concord_index::IndexDescriptor,
        reindex: bool,
        opts: &DispatchOptions,
    ) -> Result<()> {
        let cmd = Command::IndexCreate { descriptor, reindex };
        match self.submit(cmd, opts)? {
            ApplyReply::IndexAck => Ok(()),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Remove a secondary index.
    pub fn index_drop(&self, name: String, opts: &DispatchOptions) -> Result<()> {
        let cmd = Command::IndexDrop { name };
        match self.submit(cmd, opts)? {
            ApplyReply::IndexAck => Ok(()),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Rebuild a secondary index from the store in a single scan.
    pub fn index_reindex(&self, name: String, opts: &DispatchOptions) -> Result<()> {
        let cmd = Command::IndexReindex { name };
        match self.submit(cmd, opts)? {
            ApplyReply::IndexAck => Ok(()),
            other => Err(unexpected_reply(other)),
        }
    }
}

fn unexpected_reply(reply: ApplyReply) -> Error {
    Error::CorruptState(format!("command produced an unexpected reply shape: {reply:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_consensus::{ApplyMeta, LocalConsensus};
    use concord_core::CompressionConfig;

    fn test_dispatcher() -> Dispatcher<LocalConsensus<StateMachine>> {
        let consensus = Arc::new(LocalConsensus::new(
            "n1",
            StateMachine::new(
                "n1",
                CompressionConfig::default(),
                concord_index::ExtractorRegistry::new(),
                concord_engine::PredicateRegistry::new(),
                false,
                10,
            ),
            |state: &mut StateMachine, payload: &[u8], meta: ApplyMeta| {
                let result = concord_engine::decode_command(payload)
                    .and_then(|cmd| state.apply(&cmd, meta));
                concord_engine::encode_reply(&result)
            },
            |_state: &StateMachine| Vec::new(),
            |_state: &mut StateMachine, _bytes: &[u8]| {},
            || 1_000,
        ));
        Dispatcher::new(consensus, 4)
    }

    #[test]
    fn put_then_delete_round_trips() {
        let d = test_dispatcher();
        let opts = DispatchOptions::default();
        let version = d.put(b"a".to_vec(), Value::from("1"), &opts).unwrap();
        assert_eq!(version, 1);
        d.delete(b"a".to_vec(), &opts).unwrap();
        let err = d.delete(b"a".to_vec(), &opts).unwrap_err();
        assert_eq!(err, Error::NotFound);
    }

    #[test]
    fn rejects_empty_key_before_submission() {
        let d = test_dispatcher();
        let opts = DispatchOptions::default();
        let err = d.put(Vec::new(), Value::from("1"), &opts).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn rejects_non_positive_ttl() {
        let d = test_dispatcher();
        let mut opts = DispatchOptions::default();
        opts.ttl_seconds = Some(0);
        let err = d.put(b"a".to_vec(), Value::from("1"), &opts).unwrap_err();
        assert!(matches!(err, Error::InvalidTTL(_)));
    }

    #[test]
    fn rejects_batch_over_limit() {
        let d = test_dispatcher();
        let opts = DispatchOptions::default();
        let ops: Vec<PutRequest> = (0..5)
            .map(|i| PutRequest { key: format!("k{i}").into_bytes(), value: Value::from("v"), ttl_seconds: None })
            .collect();
        let err = d.put_many(ops, &opts).unwrap_err();
        assert!(matches!(err, Error::BatchTooLarge { len: 5, limit: 4 }));
    }

    #[test]
    fn conflicting_and_missing_conditions_are_rejected_locally() {
        let d = test_dispatcher();
        let opts = DispatchOptions::default();
        d.put(b"a".to_vec(), Value::from("0"), &opts).unwrap();

        let missing = d.put_if(b"a".to_vec(), Value::from("1"), ConditionSpec::default(), &opts);
        assert_eq!(missing.unwrap_err(), Error::MissingCondition);

        let conflicting = d.put_if(
            b"a".to_vec(),
            Value::from("1"),
            ConditionSpec { expected: Some(Value::from("0")), predicate: Some(("p".into(), "t".into())) },
            &opts,
        );
        assert_eq!(conflicting.unwrap_err(), Error::ConflictingConditions);
    }

    #[test]
    fn put_if_commits_on_matching_expectation() {
        let d = test_dispatcher();
        let opts = DispatchOptions::default();
        d.put(b"a".to_vec(), Value::from("0"), &opts).unwrap();
        let version = d
            .put_if(
                b"a".to_vec(),
                Value::from("1"),
                ConditionSpec { expected: Some(Value::from("0")), predicate: None },
                &opts,
            )
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn put_many_then_delete_many_are_atomic_and_idempotent() {
        let d = test_dispatcher();
        let opts = DispatchOptions::default();
        let ops = vec![
            PutRequest { key: b"a".to_vec(), value: Value::from("1"), ttl_seconds: None },
            PutRequest { key: b"b".to_vec(), value: Value::from("2"), ttl_seconds: None },
        ];
        assert_eq!(d.put_many(ops, &opts).unwrap(), 2);
        assert_eq!(d.delete_many(vec![b"a".to_vec(), b"missing".to_vec()], &opts).unwrap(), 1);
    }
}
