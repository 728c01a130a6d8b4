//! Predicate registry backing `put_if`/`delete_if`'s `predicate_id(token)`
//! condition form. Mirrors `concord_index::ExtractorRegistry`
//! exactly: predicates are registered at startup under a stable id, never
//! shipped as closures across the log, and a panicking predicate is
//! caught and treated as "false" rather than aborting the state machine.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Identifies a registered predicate.
pub type PredicateId = String;

/// A deterministic, pure function testing whether a decoded value
/// satisfies `token`.
pub type PredicateFn = dyn Fn(&[u8], &str) -> bool + Send + Sync;

/// Maps predicate ids to their implementations.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: HashMap<PredicateId, Arc<PredicateFn>>,
}

impl PredicateRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        PredicateRegistry {
            predicates: HashMap::new(),
        }
    }

    /// Register `f` under `id`, overwriting any prior registration.
    pub fn register(
        &mut self,
        id: impl Into<PredicateId>,
        f: impl Fn(&[u8], &str) -> bool + Send + Sync + 'static,
    ) {
        self.predicates.insert(id.into(), Arc::new(f));
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.predicates.contains_key(id)
    }

    /// Evaluate the predicate registered under `id` against `value` and
    /// `token`. Returns `false` if `id` is unregistered or the predicate
    /// panics.
    pub fn evaluate(&self, id: &str, value: &[u8], token: &str) -> bool {
        let Some(f) = self.predicates.get(id) else {
            return false;
        };
        catch_unwind(AssertUnwindSafe(|| f(value, token))).unwrap_or(false)
    }
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("registered", &self.predicates.keys().collect::<Vec<_>>())
            .finish()
    }
}
