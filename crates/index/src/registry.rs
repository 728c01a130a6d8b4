//! Extractor registry: extractors are registered at process
//! startup under a stable id, never shipped by reference across the log.
//! Every node in a cluster must start with the same registry contents —
//! an index descriptor on the log carries only the id, so a node missing
//! the corresponding registration cannot serve that index at all.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Identifies a registered extractor. Carried on the log inside an index
/// descriptor; never the function itself -- anonymous, unregistered
/// extractors would break determinism across restarts.
pub type ExtractorId = String;

/// A deterministic, pure function from a value to zero or more index
/// tokens.
pub type ExtractorFn = dyn Fn(&[u8]) -> Vec<String> + Send + Sync;

/// Maps extractor ids to their implementations.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<ExtractorId, Arc<ExtractorFn>>,
}

impl ExtractorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        ExtractorRegistry {
            extractors: HashMap::new(),
        }
    }

    /// Register `f` under `id`, overwriting any prior registration.
    pub fn register(
        &mut self,
        id: impl Into<ExtractorId>,
        f: impl Fn(&[u8]) -> Vec<String> + Send + Sync + 'static,
    ) {
        self.extractors.insert(id.into(), Arc::new(f));
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.extractors.contains_key(id)
    }

    /// Run the extractor registered under `id` against `value`.
    ///
    /// Returns an empty token set if `id` is unregistered, or if the
    /// extractor panics — extractor failures are caught at this boundary
    /// and never abort the state machine.
    pub fn extract(&self, id: &str, value: &[u8]) -> Vec<String> {
        let Some(f) = self.extractors.get(id) else {
            return Vec::new();
        };
        catch_unwind(AssertUnwindSafe(|| f(value))).unwrap_or_default()
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("registered", &self.extractors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_id_yields_no_tokens() {
        let reg = ExtractorRegistry::new();
        assert!(reg.extract("missing", b"x").is_empty());
    }

    #[test]
    fn registered_extractor_runs() {
        let mut reg = ExtractorRegistry::new();
        reg.register("upper", |v: &[u8]| {
            vec![String::from_utf8_lossy(v).to_uppercase()]
        });
        assert_eq!(reg.extract("upper", b"hi"), vec!["HI".to_string()]);
    }

    #[test]
    fn panicking_extractor_yields_no_tokens_not_a_crash() {
        let mut reg = ExtractorRegistry::new();
        reg.register("boom", |_v: &[u8]| panic!("bad extractor"));
        assert!(reg.extract("boom", b"x").is_empty());
    }
}
