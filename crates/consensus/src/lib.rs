//! Consensus-layer contract: the interface the core requires from
//! whatever replication engine hosts its log. Implementing a real
//! multi-node Raft (or any other) protocol is out of scope here; this
//! crate defines only the trait boundary plus [`LocalConsensus`], a
//! single-node in-process test double that lets the rest of the
//! workspace exercise the full command/query path without one.
//!
//! The trait is generic over `State`, the type the consensus layer
//! applies committed commands into and runs read closures against. In
//! this workspace that type is the state machine built in
//! `concord-engine`; this crate knows nothing about its shape.

use concord_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::time::Duration;

/// Identifies a member of the cluster (address, hostname, or opaque id --
/// the consensus layer's choice).
pub type NodeId = String;

/// Metadata attached to a command as it is applied, handed to the state
/// machine alongside the command payload so `apply` stays pure: no
/// wall-clock reads, no hidden state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyMeta {
    /// Position of this command in the replicated log.
    pub log_index: u64,
    /// Term under which this command was committed.
    pub log_term: u64,
    /// Wall-clock seconds at commit time, supplied by the consensus layer
    /// so every replica applies the same value.
    pub now_seconds: i64,
}

/// The outcome of a successfully committed command.
#[derive(Debug, Clone)]
pub struct CommandCommit {
    /// Log index the command was committed at.
    pub committed_index: u64,
    /// Opaque reply bytes produced by the state machine's `apply`.
    pub reply: Vec<u8>,
}

/// What the core requires from its consensus provider.
pub trait Consensus: Send + Sync {
    /// The applied state machine type, opaque to this crate.
    type State;

    /// Replicate `payload`, blocking until it commits, times out, or is
    /// rejected because this node isn't the leader or the cluster lacks
    /// a quorum.
    fn submit_command(&self, payload: Vec<u8>, timeout: Duration) -> Result<CommandCommit>;

    /// Run `f` against this replica's locally applied state. No round
    /// trip; may observe state that is stale relative to the leader.
    fn local_query<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Self::State) -> R;

    /// Run `f` against the current leader's latest applied state. A
    /// single round trip if this node isn't the leader, but not gated by
    /// a quorum read-index barrier.
    fn leader_query<F, R>(&self, f: F, timeout: Duration) -> Result<R>
    where
        F: FnOnce(&Self::State) -> R;

    /// Run `f` against the leader's state after confirming, via a
    /// read-index quorum barrier, that no newer leader has been elected.
    /// This is what backs `ReadConsistency::Strong`.
    fn linearizable_query<F, R>(&self, f: F, timeout: Duration) -> Result<R>
    where
        F: FnOnce(&Self::State) -> R;

    /// Install a snapshot (received out-of-band, e.g. during bootstrap or
    /// manual catch-up), replacing local applied state.
    fn install_snapshot(&self, bytes: Vec<u8>) -> Result<()>;

    /// Produce a snapshot of current applied state for the consensus
    /// layer's own log-truncation bookkeeping.
    fn take_snapshot(&self) -> Vec<u8>;

    /// Register a callback invoked whenever this node's leadership status
    /// changes. Implementations should invoke it once immediately with
    /// the current status, so a late subscriber isn't left unaware.
    fn on_leader_change(&self, cb: Box<dyn Fn(bool) + Send + Sync>);

    /// Current cluster membership.
    fn members(&self) -> Vec<NodeId>;

    /// Highest log index this node has applied.
    fn applied_index(&self) -> u64;

    /// Term of the last applied entry.
    fn applied_term(&self) -> u64;
}

type ApplyFn<S> = dyn Fn(&mut S, &[u8], ApplyMeta) -> Vec<u8> + Send + Sync;
type SnapshotFn<S> = dyn Fn(&S) -> Vec<u8> + Send + Sync;
type RestoreFn<S> = dyn Fn(&mut S, &[u8]) + Send + Sync;
type NowFn = dyn Fn() -> i64 + Send + Sync;

/// A single-node stand-in for a real consensus library: every submitted
/// command "commits" immediately against a local, monotonically
/// increasing log index, and this node is always the leader. Intended
/// for tests and for embedding without a real cluster, never for
/// production use -- it provides no durability, no replication, and no
/// recovery from process crash on its own.
pub struct LocalConsensus<S> {
    node_id: NodeId,
    state: RwLock<S>,
    apply: Box<ApplyFn<S>>,
    snapshot_fn: Box<SnapshotFn<S>>,
    restore_fn: Box<RestoreFn<S>>,
    now_fn: Box<NowFn>,
    log_index: std::sync::atomic::AtomicU64,
    term: std::sync::atomic::AtomicU64,
    leader_callbacks: Mutex<Vec<Box<dyn Fn(bool) + Send + Sync>>>,
}

impl<S> LocalConsensus<S> {
    /// Construct a single-node consensus double wrapping `initial_state`.
    ///
    /// - `apply` is invoked for every submitted command, in submission
    ///   order, and must be a pure function of `(state, payload, meta)`.
    /// - `snapshot_fn`/`restore_fn` back [`Consensus::take_snapshot`] and
    ///   [`Consensus::install_snapshot`].
    /// - `now_fn` supplies the wall-clock value handed to `apply` as
    ///   `ApplyMeta::now_seconds`; tests typically pass a fixed clock.
    pub fn new(
        node_id: impl Into<NodeId>,
        initial_state: S,
        apply: impl Fn(&mut S, &[u8], ApplyMeta) -> Vec<u8> + Send + Sync + 'static,
        snapshot_fn: impl Fn(&S) -> Vec<u8> + Send + Sync + 'static,
        restore_fn: impl Fn(&mut S, &[u8]) + Send + Sync + 'static,
        now_fn: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        LocalConsensus {
            node_id: node_id.into(),
            state: RwLock::new(initial_state),
            apply: Box::new(apply),
            snapshot_fn: Box::new(snapshot_fn),
            restore_fn: Box::new(restore_fn),
            now_fn: Box::new(now_fn),
            log_index: std::sync::atomic::AtomicU64::new(0),
            term: std::sync::atomic::AtomicU64::new(1),
            leader_callbacks: Mutex::new(Vec::new()),
        }
    }
}

impl<S> Consensus for LocalConsensus<S> {
    type State = S;

    fn submit_command(&self, payload: Vec<u8>, _timeout: Duration) -> Result<CommandCommit> {
        use std::sync::atomic::Ordering;
        let mut state = self.state.write();
        let index = self.log_index.fetch_add(1, Ordering::SeqCst) + 1;
        let meta = ApplyMeta {
            log_index: index,
            log_term: self.term.load(Ordering::SeqCst),
            now_seconds: (self.now_fn)(),
        };
        let reply = (self.apply)(&mut state, &payload, meta);
        Ok(CommandCommit {
            committed_index: index,
            reply,
        })
    }

    fn local_query<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Self::State) -> R,
    {
        let state = self.state.read();
        f(&state)
    }

    fn leader_query<F, R>(&self, f: F, timeout: Duration) -> Result<R>
    where
        F: FnOnce(&Self::State) -> R,
    {
        let _ = timeout;
        Ok(self.local_query(f))
    }

    fn linearizable_query<F, R>(&self, f: F, timeout: Duration) -> Result<R>
    where
        F: FnOnce(&Self::State) -> R,
    {
        // Single node: no peers to confirm a read-index barrier against,
        // so the leader's latest applied state already satisfies it.
        let _ = timeout;
        Ok(self.local_query(f))
    }

    fn install_snapshot(&self, bytes: Vec<u8>) -> Result<()> {
        let mut state = self.state.write();
        (self.restore_fn)(&mut state, &bytes);
        Ok(())
    }

    fn take_snapshot(&self) -> Vec<u8> {
        let state = self.state.read();
        (self.snapshot_fn)(&state)
    }

    fn on_leader_change(&self, cb: Box<dyn Fn(bool) + Send + Sync>) {
        cb(true);
        self.leader_callbacks.lock().push(cb);
    }

    fn members(&self) -> Vec<NodeId> {
        vec![self.node_id.clone()]
    }

    fn applied_index(&self) -> u64 {
        self.log_index.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn applied_term(&self) -> u64 {
        self.term.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Errors a `Consensus` implementation is expected to surface through
/// `Result` rather than panicking. Re-exported for callers that want to
/// match on specific rejection reasons without importing `concord_core`
/// directly.
pub fn not_leader() -> Error {
    Error::NotLeader
}

/// See [`not_leader`]; the cluster-not-ready counterpart.
pub fn cluster_not_ready() -> Error {
    Error::ClusterNotReady
}

/// See [`not_leader`]; the timeout counterpart.
pub fn timeout() -> Error {
    Error::Timeout
}
