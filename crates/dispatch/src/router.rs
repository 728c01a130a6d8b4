//! Query Router: routes reads by consistency level and stamps every
//! result with the applied index/term it was served at.

use std::sync::Arc;
use std::time::Duration;

use concord_consensus::Consensus;
use concord_core::{ReadConsistency, Result};
use concord_engine::StateMachine;

/// A query result paired with the applied position it was served at, for
/// observability and for callers correlating reads across replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOutcome<R> {
    /// The query's return value.
    pub result: R,
    /// Highest log index reflected in `result`.
    pub applied_index: u64,
    /// Term of the last applied entry reflected in `result`.
    pub applied_term: u64,
}

/// Routes a read-only query to the right place depending on the requested
/// consistency level.
pub struct QueryRouter<C> {
    consensus: Arc<C>,
}

impl<C> QueryRouter<C>
where
    C: Consensus<State = StateMachine>,
{
    /// Build a router over `consensus`.
    pub fn new(consensus: Arc<C>) -> Self {
        QueryRouter { consensus }
    }

    /// Run `f` against state selected by `consistency`:
    /// - `Eventual`: this replica's local applied state, no round trip.
    /// - `Leader`: the current leader's latest applied state, not
    ///   quorum-checked.
    /// - `Strong`: the leader's state after a read-index quorum barrier,
    ///   giving a linearizable read.
    pub fn route<F, R>(&self, consistency: ReadConsistency, timeout: Duration, f: F) -> Result<QueryOutcome<R>>
    where
        F: FnOnce(&StateMachine) -> R,
    {
        let result = match consistency {
            ReadConsistency::Eventual => self.consensus.local_query(f),
            ReadConsistency::Leader => self.consensus.leader_query(f, timeout)?,
            ReadConsistency::Strong => self.consensus.linearizable_query(f, timeout)?,
        };
        Ok(QueryOutcome {
            result,
            applied_index: self.consensus.applied_index(),
            applied_term: self.consensus.applied_term(),
        })
    }
}
