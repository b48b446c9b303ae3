//! In-memory storage engine: one ordered map per shard.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::document::Document;

use super::{ScanBounds, StorageEngine, StorageError, StorageResult};

type Shard = BTreeMap<String, Document>;

#[derive(Default)]
pub struct MemoryEngine {
    collections: RwLock<HashMap<String, Vec<RwLock<Shard>>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_shard<T>(
        &self,
        collection: &str,
        shard: usize,
        f: impl FnOnce(&RwLock<Shard>) -> T,
    ) -> StorageResult<T> {
        let collections = self.collections.read().expect("storage poisoned");
        let shards = collections
            .get(collection)
            .ok_or_else(|| StorageError::UnknownCollection(collection.to_string()))?;
        let shard = shards.get(shard).ok_or_else(|| StorageError::UnknownShard {
            collection: collection.to_string(),
            shard,
        })?;
        Ok(f(shard))
    }
}

impl StorageEngine for MemoryEngine {
    fn create_collection(&self, collection: &str, shards: usize) {
        let mut collections = self.collections.write().expect("storage poisoned");
        collections
            .entry(collection.to_string())
            .or_insert_with(|| (0..shards.max(1)).map(|_| RwLock::new(Shard::new())).collect());
    }

    fn drop_collection(&self, collection: &str) {
        self.collections
            .write()
            .expect("storage poisoned")
            .remove(collection);
    }

    fn get(&self, collection: &str, shard: usize, key: &str) -> StorageResult<Option<Document>> {
        self.with_shard(collection, shard, |s| {
            s.read().expect("shard poisoned").get(key).cloned()
        })
    }

    fn put(&self, collection: &str, shard: usize, document: Document) -> StorageResult<()> {
        self.with_shard(collection, shard, |s| {
            s.write()
                .expect("shard poisoned")
                .insert(document.key().to_string(), document);
        })
    }

    fn remove(
        &self,
        collection: &str,
        shard: usize,
        key: &str,
    ) -> StorageResult<Option<Document>> {
        self.with_shard(collection, shard, |s| {
            s.write().expect("shard poisoned").remove(key)
        })
    }

    fn scan(
        &self,
        collection: &str,
        shard: usize,
        bounds: &ScanBounds,
    ) -> StorageResult<Vec<Document>> {
        self.with_shard(collection, shard, |s| {
            let shard = s.read().expect("shard poisoned");
            shard
                .iter()
                .filter(|(key, _)| {
                    bounds.lower.as_ref().map(|l| key.as_str() >= l.as_str()).unwrap_or(true)
                        && bounds.upper.as_ref().map(|u| key.as_str() <= u.as_str()).unwrap_or(true)
                })
                .map(|(_, doc)| doc.clone())
                .collect()
        })
    }

    fn count(&self, collection: &str, shard: usize) -> StorageResult<usize> {
        self.with_shard(collection, shard, |s| s.read().expect("shard poisoned").len())
    }

    fn shard_count(&self, collection: &str) -> StorageResult<usize> {
        let collections = self.collections.read().expect("storage poisoned");
        collections
            .get(collection)
            .map(|shards| shards.len())
            .ok_or_else(|| StorageError::UnknownCollection(collection.to_string()))
    }

    fn checksum(&self, collection: &str) -> StorageResult<u32> {
        let collections = self.collections.read().expect("storage poisoned");
        let shards = collections
            .get(collection)
            .ok_or_else(|| StorageError::UnknownCollection(collection.to_string()))?;
        let mut hasher = crc32fast::Hasher::new();
        for shard in shards {
            let shard = shard.read().expect("shard poisoned");
            for (key, doc) in shard.iter() {
                hasher.update(key.as_bytes());
                hasher.update(doc.rev().as_bytes());
            }
        }
        Ok(hasher.finalize())
    }

    fn truncate(&self, collection: &str) -> StorageResult<()> {
        let collections = self.collections.read().expect("storage poisoned");
        let shards = collections
            .get(collection)
            .ok_or_else(|| StorageError::UnknownCollection(collection.to_string()))?;
        for shard in shards {
            shard.write().expect("shard poisoned").clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::RevisionGenerator;
    use serde_json::json;

    fn doc(key: &str) -> Document {
        Document::assemble("c", key.to_string(), RevisionGenerator::new().next(), json!({}))
            .unwrap()
    }

    #[test]
    fn test_put_get_remove() {
        let engine = MemoryEngine::new();
        engine.create_collection("c", 2);
        engine.put("c", 0, doc("a")).unwrap();
        assert!(engine.get("c", 0, "a").unwrap().is_some());
        assert!(engine.get("c", 1, "a").unwrap().is_none());
        assert!(engine.remove("c", 0, "a").unwrap().is_some());
        assert!(engine.get("c", 0, "a").unwrap().is_none());
    }

    #[test]
    fn test_scan_is_key_ordered_and_bounded() {
        let engine = MemoryEngine::new();
        engine.create_collection("c", 1);
        for key in ["d", "a", "c", "b"] {
            engine.put("c", 0, doc(key)).unwrap();
        }
        let all = engine.scan("c", 0, &ScanBounds::all()).unwrap();
        let keys: Vec<&str> = all.iter().map(|d| d.key()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);

        let bounded = engine
            .scan(
                "c",
                0,
                &ScanBounds {
                    lower: Some("b".into()),
                    upper: Some("c".into()),
                },
            )
            .unwrap();
        assert_eq!(bounded.len(), 2);
    }

    #[test]
    fn test_unknown_collection_is_an_error() {
        let engine = MemoryEngine::new();
        assert!(engine.get("missing", 0, "k").is_err());
    }

    #[test]
    fn test_checksum_tracks_content() {
        let engine = MemoryEngine::new();
        engine.create_collection("c", 1);
        let empty = engine.checksum("c").unwrap();
        engine.put("c", 0, doc("a")).unwrap();
        let one = engine.checksum("c").unwrap();
        assert_ne!(empty, one);
    }
}
