//! A collection: shard-routed document storage with indexes and WAL-backed
//! durability.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::document::{validate_key, Document, KeyGenerator, RevisionGenerator};
use crate::index::IndexRegistry;
use crate::storage::{ScanBounds, StorageEngine};
use crate::wal::{WalOp, WalWriter};

use super::sharding::shard_index;
use super::{CatalogError, CatalogResult};

#[derive(Debug, Clone)]
pub struct CollectionOptions {
    pub number_of_shards: usize,
    pub shard_keys: Vec<String>,
    pub replication_factor: usize,
    pub distribute_shards_like: Option<String>,
    pub edge: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            number_of_shards: 1,
            shard_keys: vec!["_key".to_string()],
            replication_factor: 1,
            distribute_shards_like: None,
            edge: false,
        }
    }
}

impl CollectionOptions {
    pub fn with_shards(shards: usize) -> Self {
        Self {
            number_of_shards: shards,
            ..Default::default()
        }
    }

    pub fn edge() -> Self {
        Self {
            edge: true,
            ..Default::default()
        }
    }

    pub fn sharded_by(&self) -> &[String] {
        &self.shard_keys
    }

    pub fn sharded_by_key(&self) -> bool {
        self.shard_keys == ["_key"]
    }
}

pub struct Collection {
    name: String,
    database: String,
    options: CollectionOptions,
    storage: Arc<dyn StorageEngine>,
    indexes: IndexRegistry,
    keys: KeyGenerator,
    revisions: Arc<RevisionGenerator>,
    wal: Option<Arc<Mutex<WalWriter>>>,
}

impl Collection {
    pub(crate) fn new(
        name: String,
        database: String,
        options: CollectionOptions,
        storage: Arc<dyn StorageEngine>,
        revisions: Arc<RevisionGenerator>,
        wal: Option<Arc<Mutex<WalWriter>>>,
    ) -> Self {
        storage.create_collection(&name, options.number_of_shards);
        let indexes = if options.edge {
            IndexRegistry::for_edges()
        } else {
            IndexRegistry::for_documents()
        };
        Self {
            name,
            database,
            options,
            storage,
            indexes,
            keys: KeyGenerator::new(),
            revisions,
            wal,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    pub fn indexes(&self) -> &IndexRegistry {
        &self.indexes
    }

    pub fn number_of_shards(&self) -> usize {
        self.options.number_of_shards
    }

    /// Shard names in numeric order (`s0001`, `s0002`, ...).
    pub fn shard_names(&self) -> Vec<String> {
        (1..=self.options.number_of_shards)
            .map(|i| format!("s{:04}", i))
            .collect()
    }

    fn route(&self, key: &str, body: &Map<String, Value>) -> usize {
        shard_index(
            &self.options.shard_keys,
            key,
            body,
            self.options.number_of_shards,
        )
    }

    fn log(&self, op: WalOp, key: &str, document: Value) -> CatalogResult<()> {
        if let Some(wal) = &self.wal {
            wal.lock()
                .expect("wal poisoned")
                .append(op, &self.database, &self.name, key, document)?;
        }
        Ok(())
    }

    /// Inserts a document. A client-supplied `_key` is only legal when the
    /// collection is sharded by `_key`.
    pub fn insert(&self, body: Value) -> CatalogResult<Document> {
        let map = match &body {
            Value::Object(map) => map.clone(),
            _ => return Err(CatalogError::Document(crate::document::DocumentError::NotAnObject)),
        };

        let key = match map.get("_key").and_then(Value::as_str) {
            Some(key) => {
                if !self.options.sharded_by_key() {
                    return Err(CatalogError::MustNotSpecifyKey);
                }
                validate_key(key)?;
                key.to_string()
            }
            None => self.keys.next_key(),
        };

        let shard = self.route(&key, &map);
        if self.storage.get(&self.name, shard, &key)?.is_some() {
            return Err(CatalogError::UniqueConstraintViolated(key));
        }

        let document = Document::assemble(&self.name, key.clone(), self.revisions.next(), body)?;
        self.storage.put(&self.name, shard, document.clone())?;
        self.log(WalOp::Insert, &key, document.as_value())?;
        Ok(document)
    }

    /// Point lookup by key, searching the routed shard when possible.
    pub fn document(&self, key: &str) -> CatalogResult<Option<Document>> {
        if self.options.sharded_by_key() {
            let shard = self.route(key, &Map::new());
            return Ok(self.storage.get(&self.name, shard, key)?);
        }
        // the key alone does not determine the shard here
        for shard in 0..self.options.number_of_shards {
            if let Some(doc) = self.storage.get(&self.name, shard, key)? {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    /// Applies a partial update. Changing a shard-key attribute is refused.
    pub fn update(
        &self,
        key: &str,
        patch: &Map<String, Value>,
        keep_null: bool,
    ) -> CatalogResult<(Document, Document)> {
        let old = self
            .document(key)?
            .ok_or_else(|| CatalogError::DocumentNotFound(key.to_string()))?;
        self.check_shard_keys_unchanged(&old, patch)?;

        let mut new = old.clone();
        new.update_with(patch, keep_null)?;
        new.set_rev(self.revisions.next());
        let shard = self.route(key, old.object());
        self.storage.put(&self.name, shard, new.clone())?;
        self.log(WalOp::Update, key, new.as_value())?;
        Ok((old, new))
    }

    /// Replaces the whole document body. Shard-key values must be preserved.
    pub fn replace(&self, key: &str, body: Value) -> CatalogResult<(Document, Document)> {
        let old = self
            .document(key)?
            .ok_or_else(|| CatalogError::DocumentNotFound(key.to_string()))?;
        let map = match &body {
            Value::Object(map) => map.clone(),
            _ => return Err(CatalogError::Document(crate::document::DocumentError::NotAnObject)),
        };
        self.check_shard_keys_unchanged(&old, &map)?;

        let new = Document::assemble(&self.name, key.to_string(), self.revisions.next(), body)?;
        let shard = self.route(key, old.object());
        self.storage.put(&self.name, shard, new.clone())?;
        self.log(WalOp::Replace, key, new.as_value())?;
        Ok((old, new))
    }

    fn check_shard_keys_unchanged(
        &self,
        old: &Document,
        patch: &Map<String, Value>,
    ) -> CatalogResult<()> {
        if self.options.sharded_by_key() {
            return Ok(());
        }
        for field in &self.options.shard_keys {
            if let Some(new_value) = patch.get(field) {
                let old_value = old.get(field).cloned().unwrap_or(Value::Null);
                if !crate::query::value::values_equal(new_value, &old_value) {
                    return Err(CatalogError::MustNotChangeShardingAttributes);
                }
            }
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> CatalogResult<Document> {
        let old = self
            .document(key)?
            .ok_or_else(|| CatalogError::DocumentNotFound(key.to_string()))?;
        let shard = self.route(key, old.object());
        self.storage.remove(&self.name, shard, key)?;
        self.log(WalOp::Remove, key, Value::Null)?;
        Ok(old)
    }

    pub fn truncate(&self) -> CatalogResult<()> {
        self.storage.truncate(&self.name)?;
        self.log(WalOp::Truncate, "", Value::Null)?;
        Ok(())
    }

    pub fn count(&self) -> CatalogResult<usize> {
        let mut total = 0;
        for shard in 0..self.options.number_of_shards {
            total += self.storage.count(&self.name, shard)?;
        }
        Ok(total)
    }

    /// All documents of one shard, key-ordered.
    pub fn scan_shard(&self, shard: usize) -> CatalogResult<Vec<Document>> {
        Ok(self.storage.scan(&self.name, shard, &ScanBounds::all())?)
    }

    /// Edge adjacency: all edges whose `_from` (outbound) or `_to`
    /// (inbound) equals `vertex`.
    pub fn edges_for_vertex(&self, vertex: &str, outbound: bool) -> CatalogResult<Vec<Document>> {
        let field = if outbound { "_from" } else { "_to" };
        let mut out = Vec::new();
        for shard in 0..self.options.number_of_shards {
            for doc in self.storage.scan(&self.name, shard, &ScanBounds::all())? {
                if doc.get(field).and_then(Value::as_str) == Some(vertex) {
                    out.push(doc);
                }
            }
        }
        Ok(out)
    }

    /// Re-applies a logged or replicated write without assigning a new
    /// revision (the document carries the one from the source).
    pub fn apply_document(&self, op: WalOp, key: &str, document: Value) -> CatalogResult<()> {
        match op {
            WalOp::Insert | WalOp::Update | WalOp::Replace => {
                let map = match document {
                    Value::Object(map) => map,
                    _ => {
                        return Err(CatalogError::Document(
                            crate::document::DocumentError::NotAnObject,
                        ))
                    }
                };
                let doc = Document::from_object(map);
                let shard = self.route(doc.key(), doc.object());
                self.storage.put(&self.name, shard, doc)?;
            }
            WalOp::Remove => {
                if let Some(existing) = self.document(key)? {
                    let shard = self.route(key, existing.object());
                    self.storage.remove(&self.name, shard, key)?;
                }
            }
            WalOp::Truncate => {
                self.storage.truncate(&self.name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEngine;
    use serde_json::json;

    fn collection(options: CollectionOptions) -> Collection {
        Collection::new(
            "c".into(),
            "_system".into(),
            options,
            Arc::new(MemoryEngine::new()),
            Arc::new(RevisionGenerator::new()),
            None,
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let c = collection(CollectionOptions::default());
        let doc = c.insert(json!({"_key": "a", "v": 1})).unwrap();
        assert_eq!(doc.id(), "c/a");
        assert_eq!(c.document("a").unwrap().unwrap().get("v"), Some(&json!(1)));
    }

    #[test]
    fn test_generated_keys_when_absent() {
        let c = collection(CollectionOptions::default());
        let doc = c.insert(json!({"v": 1})).unwrap();
        assert!(!doc.key().is_empty());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let c = collection(CollectionOptions::default());
        c.insert(json!({"_key": "a"})).unwrap();
        assert!(matches!(
            c.insert(json!({"_key": "a"})),
            Err(CatalogError::UniqueConstraintViolated(_))
        ));
    }

    #[test]
    fn test_explicit_key_rejected_on_custom_shard_key() {
        let options = CollectionOptions {
            number_of_shards: 3,
            shard_keys: vec!["region".into()],
            ..Default::default()
        };
        let c = collection(options);
        assert!(matches!(
            c.insert(json!({"_key": "a", "region": "eu"})),
            Err(CatalogError::MustNotSpecifyKey)
        ));
    }

    #[test]
    fn test_shard_key_change_rejected() {
        let options = CollectionOptions {
            number_of_shards: 3,
            shard_keys: vec!["region".into()],
            ..Default::default()
        };
        let c = collection(options);
        let doc = c.insert(json!({"region": "eu", "v": 1})).unwrap();
        let patch = json!({"region": "us"});
        assert!(matches!(
            c.update(doc.key(), patch.as_object().unwrap(), true),
            Err(CatalogError::MustNotChangeShardingAttributes)
        ));
        // unchanged value is fine
        let patch = json!({"region": "eu", "v": 2});
        assert!(c.update(doc.key(), patch.as_object().unwrap(), true).is_ok());
    }

    #[test]
    fn test_update_bumps_revision() {
        let c = collection(CollectionOptions::default());
        let doc = c.insert(json!({"_key": "a", "v": 1})).unwrap();
        let patch = json!({"v": 2});
        let (old, new) = c.update("a", patch.as_object().unwrap(), true).unwrap();
        assert_eq!(old.rev(), doc.rev());
        assert_ne!(new.rev(), old.rev());
    }

    #[test]
    fn test_multi_shard_count() {
        let c = collection(CollectionOptions::with_shards(4));
        for i in 0..50 {
            c.insert(json!({"_key": format!("k{}", i)})).unwrap();
        }
        assert_eq!(c.count().unwrap(), 50);
    }

    #[test]
    fn test_edges_for_vertex() {
        let c = collection(CollectionOptions::edge());
        c.insert(json!({"_key": "e1", "_from": "v/a", "_to": "v/b"})).unwrap();
        c.insert(json!({"_key": "e2", "_from": "v/a", "_to": "v/c"})).unwrap();
        c.insert(json!({"_key": "e3", "_from": "v/b", "_to": "v/a"})).unwrap();
        assert_eq!(c.edges_for_vertex("v/a", true).unwrap().len(), 2);
        assert_eq!(c.edges_for_vertex("v/a", false).unwrap().len(), 1);
    }
}
