//! Secondary Index Engine: user-declared inverted indexes over
//! the store, maintained incrementally on every write and rebuildable from
//! scratch via `reindex`.

mod registry;

pub use registry::{ExtractorFn, ExtractorId, ExtractorRegistry};

use concord_core::{Error, Key, Record, Result};
use concord_store::Store;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// An index's declaration: name, which extractor builds its
/// tokens, and whether it should be populated from existing data at
/// creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Unique index name.
    pub name: String,
    /// Stable id of the registered extractor that produces this index's tokens.
    pub extractor_id: ExtractorId,
    /// Whether `create` should scan the existing store to populate the index.
    pub reindex_on_create: bool,
}

/// `(index_name, token) -> set<key>`, maintained incrementally.
#[derive(Debug, Default)]
pub struct IndexEngine {
    descriptors: RwLock<HashMap<String, IndexDescriptor>>,
    maps: RwLock<HashMap<String, HashMap<String, BTreeSet<Key>>>>,
}

impl IndexEngine {
    /// An engine with no indexes registered.
    pub fn new() -> Self {
        IndexEngine {
            descriptors: RwLock::new(HashMap::new()),
            maps: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new index. If `reindex` (or `desc.reindex_on_create`) is
    /// set, immediately scans `store` to populate it deterministically.
    pub fn create(
        &self,
        desc: IndexDescriptor,
        reindex: bool,
        registry: &ExtractorRegistry,
        store: &Store,
        now: i64,
        decode: impl Fn(&[u8]) -> Vec<u8>,
    ) -> Result<()> {
        if !registry.contains(&desc.extractor_id) {
            return Err(Error::InvalidOperationFormat(format!(
                "extractor_id {:?} is not registered",
                desc.extractor_id
            )));
        }
        let name = desc.name.clone();
        self.descriptors.write().insert(name.clone(), desc);
        self.maps.write().entry(name.clone()).or_default();

        if reindex {
            self.reindex(&name, registry, store, now, decode)?;
        }
        Ok(())
    }

    /// Remove an index entirely.
    pub fn drop(&self, name: &str) -> Result<()> {
        if self.descriptors.write().remove(name).is_none() {
            return Err(Error::NotFound);
        }
        self.maps.write().remove(name);
        Ok(())
    }

    /// Rebuild an index from the current store contents in a single
    /// deterministic scan, in lexicographic key order.
    pub fn reindex(
        &self,
        name: &str,
        registry: &ExtractorRegistry,
        store: &Store,
        now: i64,
        decode: impl Fn(&[u8]) -> Vec<u8>,
    ) -> Result<()> {
        let extractor_id = {
            let descriptors = self.descriptors.read();
            let desc = descriptors.get(name).ok_or(Error::NotFound)?;
            desc.extractor_id.clone()
        };

        let mut fresh: HashMap<String, BTreeSet<Key>> = HashMap::new();
        for (key, record) in store.iter(now) {
            let decoded = decode(record.value.as_bytes());
            for token in registry.extract(&extractor_id, &decoded) {
                fresh.entry(token).or_default().insert(key.clone());
            }
        }

        self.maps.write().insert(name.to_string(), fresh);
        Ok(())
    }

    /// All keys currently mapped to `token` under index `name`.
    pub fn lookup(&self, name: &str, token: &str) -> BTreeSet<Key> {
        self.maps
            .read()
            .get(name)
            .and_then(|m| m.get(token))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether an index named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.read().contains_key(name)
    }

    /// List every registered index descriptor.
    pub fn descriptors(&self) -> Vec<IndexDescriptor> {
        self.descriptors.read().values().cloned().collect()
    }

    /// Update every registered index after `key`'s record changed from
    /// `old` to `new` (either may be absent), by computing the token-set
    /// delta and applying only the difference.
    pub fn on_put(
        &self,
        key: &Key,
        old: Option<&Record>,
        new: Option<&Record>,
        registry: &ExtractorRegistry,
        decode: impl Fn(&[u8]) -> Vec<u8>,
    ) {
        let names: Vec<String> = self.descriptors.read().keys().cloned().collect();
        for name in names {
            let extractor_id = {
                let descriptors = self.descriptors.read();
                match descriptors.get(&name) {
                    Some(d) => d.extractor_id.clone(),
                    None => continue,
                }
            };
            let old_tokens: BTreeSet<String> = old
                .map(|r| registry.extract(&extractor_id, &decode(r.value.as_bytes())))
                .unwrap_or_default()
                .into_iter()
                .collect();
            let new_tokens: BTreeSet<String> = new
                .map(|r| registry.extract(&extractor_id, &decode(r.value.as_bytes())))
                .unwrap_or_default()
                .into_iter()
                .collect();

            if old_tokens == new_tokens {
                continue;
            }

            let mut maps = self.maps.write();
            let index_map = maps.entry(name.clone()).or_default();
            for removed in old_tokens.difference(&new_tokens) {
                if let Some(set) = index_map.get_mut(removed) {
                    set.remove(key);
                    if set.is_empty() {
                        index_map.remove(removed);
                    }
                }
            }
            for added in new_tokens.difference(&old_tokens) {
                index_map.entry(added.clone()).or_default().insert(key.clone());
            }
        }
    }

    /// Remove `key` from every index, given its pre-delete record.
    pub fn on_delete(
        &self,
        key: &Key,
        old: &Record,
        registry: &ExtractorRegistry,
        decode: impl Fn(&[u8]) -> Vec<u8>,
    ) {
        self.on_put(key, Some(old), None, registry, decode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::Value;

    fn key(s: &str) -> Key {
        Key::new(s.as_bytes().to_vec()).unwrap()
    }

    fn word_extractor(registry: &mut ExtractorRegistry) {
        registry.register("words", |v: &[u8]| {
            String::from_utf8_lossy(v)
                .split_whitespace()
                .map(|w| w.to_string())
                .collect()
        });
    }

    fn identity(b: &[u8]) -> Vec<u8> {
        b.to_vec()
    }

    #[test]
    fn create_rejects_unregistered_extractor() {
        let engine = IndexEngine::new();
        let registry = ExtractorRegistry::new();
        let store = Store::new();
        let desc = IndexDescriptor {
            name: "by_word".into(),
            extractor_id: "missing".into(),
            reindex_on_create: false,
        };
        assert!(engine.create(desc, false, &registry, &store, 0, identity).is_err());
    }

    #[test]
    fn lookup_reflects_put_delta() {
        let engine = IndexEngine::new();
        let mut registry = ExtractorRegistry::new();
        word_extractor(&mut registry);
        let store = Store::new();

        let desc = IndexDescriptor {
            name: "by_word".into(),
            extractor_id: "words".into(),
            reindex_on_create: false,
        };
        engine.create(desc, false, &registry, &store, 0, identity).unwrap();

        let k = key("doc1");
        let v1 = Record::new(Value::from("hello world"));
        engine.on_put(&k, None, Some(&v1), &registry, identity);
        store.put(k.clone(), v1.clone());

        assert!(engine.lookup("by_word", "hello").contains(&k));
        assert!(engine.lookup("by_word", "world").contains(&k));

        let v2 = Record::new(Value::from("hello there"));
        engine.on_put(&k, Some(&v1), Some(&v2), &registry, identity);

        assert!(engine.lookup("by_word", "hello").contains(&k));
        assert!(!engine.lookup("by_word", "world").contains(&k));
        assert!(engine.lookup("by_word", "there").contains(&k));
    }

    #[test]
    fn on_delete_removes_all_tokens() {
        let engine = IndexEngine::new();
        let mut registry = ExtractorRegistry::new();
        word_extractor(&mut registry);
        let store = Store::new();
        let desc = IndexDescriptor {
            name: "by_word".into(),
            extractor_id: "words".into(),
            reindex_on_create: false,
        };
        engine.create(desc, false, &registry, &store, 0, identity).unwrap();

        let k = key("doc1");
        let v1 = Record::new(Value::from("alpha beta"));
        engine.on_put(&k, None, Some(&v1), &registry, identity);
        engine.on_delete(&k, &v1, &registry, identity);

        assert!(engine.lookup("by_word", "alpha").is_empty());
        assert!(engine.lookup("by_word", "beta").is_empty());
    }

    #[test]
    fn reindex_rebuilds_deterministically_from_store() {
        let engine = IndexEngine::new();
        let mut registry = ExtractorRegistry::new();
        word_extractor(&mut registry);
        let store = Store::new();
        store.put(key("a"), Record::new(Value::from("red green")));
        store.put(key("b"), Record::new(Value::from("green blue")));

        let desc = IndexDescriptor {
            name: "by_word".into(),
            extractor_id: "words".into(),
            reindex_on_create: true,
        };
        engine.create(desc, true, &registry, &store, 0, identity).unwrap();

        let greens = engine.lookup("by_word", "green");
        assert_eq!(greens.len(), 2);
        assert!(greens.contains(&key("a")));
        assert!(greens.contains(&key("b")));
    }

    #[test]
    fn drop_removes_descriptor_and_map() {
        let engine = IndexEngine::new();
        let registry = ExtractorRegistry::new();
        let store = Store::new();
        let desc = IndexDescriptor {
            name: "by_word".into(),
            extractor_id: "words".into(),
            reindex_on_create: false,
        };
        // extractor isn't registered but create requires it; register a no-op.
        let mut registry2 = ExtractorRegistry::new();
        registry2.register("words", |_v| Vec::new());
        engine.create(desc, false, &registry2, &store, 0, identity).unwrap();
        assert!(engine.contains("by_word"));
        engine.drop("by_word").unwrap();
        assert!(!engine.contains("by_word"));
        let _ = registry;
        assert!(engine.drop("by_word").is_err());
    }
}
