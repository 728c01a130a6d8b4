//! Write commands and their wire encoding.
//!
//! Every command on the log is `tag: u8, schema_version: u16, payload`.
//! The tag lets a replica reject or route an entry without a full decode;
//! `schema_version` lets a rolling upgrade refuse an entry it doesn't
//! understand yet instead of misinterpreting it.

use concord_core::limits::CURRENT_SCHEMA_VERSION;
use concord_core::{Error, Key, Result, Value};
use concord_index::IndexDescriptor;
use serde::{Deserialize, Serialize};

/// A `put_if`/`delete_if` precondition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Succeeds iff the stored (decoded) value equals `expected`.
    Expected(Value),
    /// Succeeds iff `predicate_id`, evaluated against the decoded value
    /// and `token`, returns true.
    PredicateToken {
        /// Id of a predicate registered in the node's `PredicateRegistry`.
        predicate_id: String,
        /// Token passed to the predicate alongside the decoded value.
        token: String,
    },
}

/// One `put` within a `put_many` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutOp {
    /// Target key.
    pub key: Key,
    /// Value to store (pre-compression; the engine encodes it).
    pub value: Value,
    /// Optional absolute expiry, in unix seconds.
    pub expires_at: Option<i64>,
}

/// One `touch` within a `touch_many` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouchOp {
    /// Target key.
    pub key: Key,
    /// Seconds to extend the expiry by.
    pub additional_seconds: i64,
}

/// A command as it travels through the replicated log.
///
/// Keys arriving here have already passed the dispatcher's shape
/// validation: constructing a `Key` can fail, but by the time a
/// `Command` exists, every key inside it is already valid. `apply`
/// therefore never returns `InvalidKey`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Insert or overwrite a record, bumping its version.
    Put {
        /// Target key.
        key: Key,
        /// Value to store.
        value: Value,
        /// Optional absolute expiry, in unix seconds.
        expires_at: Option<i64>,
    },
    /// Remove a record.
    Delete {
        /// Target key.
        key: Key,
    },
    /// Extend a record's expiry.
    Touch {
        /// Target key.
        key: Key,
        /// Seconds to extend the expiry by.
        additional_seconds: i64,
    },
    /// Conditionally insert or overwrite a record.
    PutIf {
        /// Target key.
        key: Key,
        /// Value to store if the condition holds.
        value: Value,
        /// Optional absolute expiry, in unix seconds.
        expires_at: Option<i64>,
        /// Precondition on the current record.
        condition: Condition,
    },
    /// Conditionally remove a record.
    DeleteIf {
        /// Target key.
        key: Key,
        /// Precondition on the current record.
        condition: Condition,
    },
    /// Atomically apply every op, or none.
    PutMany {
        /// The batch of puts.
        ops: Vec<PutOp>,
    },
    /// Atomically remove every key present (absent keys are no-ops).
    DeleteMany {
        /// Keys to remove.
        keys: Vec<Key>,
    },
    /// Atomically extend every key's expiry, failing entirely if any key
    /// is absent or expired.
    TouchMany {
        /// The batch of touches.
        ops: Vec<TouchOp>,
    },
    /// Remove every record whose `expires_at <= now_seconds`.
    CleanupExpired {
        /// Wall-clock value sampled by the leader at proposal time.
        now_seconds: i64,
    },
    /// Register a new secondary index.
    IndexCreate {
        /// The index's declaration.
        descriptor: IndexDescriptor,
        /// Whether to populate it from existing data immediately.
        reindex: bool,
    },
    /// Remove a secondary index.
    IndexDrop {
        /// Index name.
        name: String,
    },
    /// Rebuild a secondary index from the store in a single scan.
    IndexReindex {
        /// Index name.
        name: String,
    },
}

const TAG_PUT: u8 = 0x01;
const TAG_DELETE: u8 = 0x02;
const TAG_TOUCH: u8 = 0x03;
const TAG_PUT_IF: u8 = 0x04;
const TAG_DELETE_IF: u8 = 0x05;
const TAG_PUT_MANY: u8 = 0x10;
const TAG_DELETE_MANY: u8 = 0x11;
const TAG_TOUCH_MANY: u8 = 0x12;
const TAG_CLEANUP_EXPIRED: u8 = 0x20;
const TAG_INDEX_CREATE: u8 = 0x30;
const TAG_INDEX_DROP: u8 = 0x31;
const TAG_INDEX_REINDEX: u8 = 0x32;

fn command_tag(cmd: &Command) -> u8 {
    match cmd {
        Command::Put { .. } => TAG_PUT,
        Command::Delete { .. } => TAG_DELETE,
        Command::Touch { .. } => TAG_TOUCH,
        Command::PutIf { .. } => TAG_PUT_IF,
        Command::DeleteIf { .. } => TAG_DELETE_IF,
        Command::PutMany { .. } => TAG_PUT_MANY,
        Command::DeleteMany { .. } => TAG_DELETE_MANY,
        Command::TouchMany { .. } => TAG_TOUCH_MANY,
        Command::CleanupExpired { .. } => TAG_CLEANUP_EXPIRED,
        Command::IndexCreate { .. } => TAG_INDEX_CREATE,
        Command::IndexDrop { .. } => TAG_INDEX_DROP,
        Command::IndexReindex { .. } => TAG_INDEX_REINDEX,
    }
}

/// Encode `cmd` as `tag, schema_version, msgpack(cmd)` for submission to
/// the replicated log.
pub fn encode_command(cmd: &Command) -> Vec<u8> {
    let payload = rmp_serde::to_vec(cmd).expect("Command encodes to msgpack infallibly");
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(command_tag(cmd));
    out.extend_from_slice(&CURRENT_SCHEMA_VERSION.to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Reverse `encode_command`. Rejects truncated input, an unsupported
/// `schema_version`, or a tag that doesn't match the decoded payload's
/// variant (a sign of either corruption or a schema drift bug).
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    if bytes.len() < 3 {
        return Err(Error::InvalidOperationFormat("truncated command".into()));
    }
    let tag = bytes[0];
    let schema_version = u16::from_be_bytes([bytes[1], bytes[2]]);
    if schema_version != CURRENT_SCHEMA_VERSION {
        return Err(Error::InvalidOperationFormat(format!(
            "unsupported schema_version {schema_version}"
        )));
    }
    let cmd: Command = rmp_serde::from_slice(&bytes[3..])
        .map_err(|e| Error::InvalidOperationFormat(format!("command decode: {e}")))?;
    if command_tag(&cmd) != tag {
        return Err(Error::InvalidOperationFormat(
            "command tag does not match payload".into(),
        ));
    }
    Ok(cmd)
}
