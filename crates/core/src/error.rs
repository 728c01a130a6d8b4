//! Unified error taxonomy for Concord.
//!
//! One enum covers every error kind except Authorization, which the
//! host's auth layer owns entirely. Validation errors are raised before a
//! command reaches the log; Conditional errors are returned as part of a
//! normal commit; Transport errors come from the consensus layer; Fatal
//! errors mean the node must stop applying.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy shared across the workspace.
///
/// Serializable so it can cross the `Consensus::submit_command` opaque-bytes
/// boundary as part of a command's encoded reply.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum Error {
    // ---- Validation: local, never enter the log ----
    /// Key failed the non-empty/<=1024-byte invariant.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Bulk command exceeded `max_batch_size`.
    #[error("batch too large: {len} ops, limit {limit}")]
    BatchTooLarge {
        /// Number of operations submitted.
        len: usize,
        /// Configured limit.
        limit: usize,
    },

    /// TTL was zero, negative, or otherwise malformed.
    #[error("invalid ttl: {0}")]
    InvalidTTL(String),

    /// A command's wire payload did not match its declared shape.
    #[error("invalid operation format: {0}")]
    InvalidOperationFormat(String),

    /// A conditional command was submitted without its required condition.
    #[error("missing condition for conditional command")]
    MissingCondition,

    /// A conditional command specified more than one, mutually exclusive condition.
    #[error("conflicting conditions supplied")]
    ConflictingConditions,

    // ---- Conditional: returned as part of a normal commit ----
    /// The target key does not exist (or is expired).
    #[error("not found")]
    NotFound,

    /// A `put_if`/`delete_if`/`touch` precondition did not hold.
    #[error("condition failed")]
    ConditionFailed,

    // ---- Transport: from the consensus layer, may be retried ----
    /// The call's deadline elapsed before a commit was observed.
    #[error("timeout")]
    Timeout,

    /// The cluster has no leader or is otherwise not ready to accept writes.
    #[error("cluster not ready")]
    ClusterNotReady,

    /// This node is not the leader; the consensus library is expected to
    /// forward the request transparently, so callers should rarely see
    /// this directly.
    #[error("not leader")]
    NotLeader,

    // ---- Fatal: the node must not continue applying ----
    /// The value codec encountered an unknown tag or failed an integrity check.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// A snapshot failed its checksum or header validation.
    #[error("snapshot integrity failure: {0}")]
    SnapshotIntegrityFailure(String),

    /// The state machine detected an invariant violation it cannot recover from.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    // ---- Configuration ----
    /// A `Config` value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Transport errors are not authoritative: the command may have
    /// committed anyway. Callers requiring exactly-once semantics must
    /// embed their own idempotency token in the value.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::ClusterNotReady | Error::NotLeader)
    }

    /// Fatal errors mean the node must stop applying and rejoin via
    /// snapshot + log catch-up.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MalformedEncoding(_)
                | Error::SnapshotIntegrityFailure(_)
                | Error::CorruptState(_)
        )
    }

    /// Validation errors are raised before submission and never enter the log.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidKey(_)
                | Error::BatchTooLarge { .. }
                | Error::InvalidTTL(_)
                | Error::InvalidOperationFormat(_)
                | Error::MissingCondition
                | Error::ConflictingConditions
        )
    }

    /// Conditional errors are committed to the log like any other outcome.
    pub fn is_conditional(&self) -> bool {
        matches!(self, Error::NotFound | Error::ConditionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::ClusterNotReady.is_retryable());
        assert!(!Error::NotFound.is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(Error::CorruptState("x".into()).is_fatal());
        assert!(!Error::ConditionFailed.is_fatal());
    }

    #[test]
    fn validation_classification() {
        assert!(Error::InvalidKey("x".into()).is_validation());
        assert!(!Error::Timeout.is_validation());
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(Error::NotFound.to_string(), "not found");
        assert_eq!(Error::ConditionFailed.to_string(), "condition failed");
    }
}
