//! A database: a named set of collections sharing one storage engine, one
//! revision source and one operation log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::document::RevisionGenerator;
use crate::storage::{MemoryEngine, StorageEngine};
use crate::wal::{WalRecord, WalWriter};

use super::collection::{Collection, CollectionOptions};
use super::{CatalogError, CatalogResult};

pub struct Database {
    name: String,
    storage: Arc<dyn StorageEngine>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    revisions: Arc<RevisionGenerator>,
    wal: Option<Arc<Mutex<WalWriter>>>,
}

impl Database {
    /// A purely in-memory database (no durability), the default for tests
    /// and coordinators.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: Arc::new(MemoryEngine::new()),
            collections: RwLock::new(HashMap::new()),
            revisions: Arc::new(RevisionGenerator::new()),
            wal: None,
        }
    }

    /// A database whose mutations are logged through `wal`.
    pub fn with_wal(name: impl Into<String>, wal: Arc<Mutex<WalWriter>>) -> Self {
        Self {
            name: name.into(),
            storage: Arc::new(MemoryEngine::new()),
            collections: RwLock::new(HashMap::new()),
            revisions: Arc::new(RevisionGenerator::new()),
            wal: Some(wal),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wal(&self) -> Option<Arc<Mutex<WalWriter>>> {
        self.wal.clone()
    }

    pub fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> CatalogResult<Arc<Collection>> {
        let mut collections = self.collections.write().expect("catalog poisoned");
        if collections.contains_key(name) {
            return Err(CatalogError::DuplicateCollection(name.to_string()));
        }
        let mut options = options;
        if let Some(prototype) = &options.distribute_shards_like {
            let proto = collections
                .get(prototype)
                .ok_or_else(|| CatalogError::DistributeShardsLikeUnknown(prototype.clone()))?;
            // shard count is inherited so the shard-for-shard mirror exists
            options.number_of_shards = proto.number_of_shards();
            options.replication_factor = proto.options().replication_factor;
        }
        let collection = Arc::new(Collection::new(
            name.to_string(),
            self.name.clone(),
            options,
            Arc::clone(&self.storage),
            Arc::clone(&self.revisions),
            self.wal.clone(),
        ));
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    pub fn collection(&self, name: &str) -> CatalogResult<Arc<Collection>> {
        self.collections
            .read()
            .expect("catalog poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::CollectionNotFound(name.to_string()))
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .expect("catalog poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn drop_collection(&self, name: &str) -> CatalogResult<()> {
        let mut collections = self.collections.write().expect("catalog poisoned");
        if collections.remove(name).is_none() {
            return Err(CatalogError::CollectionNotFound(name.to_string()));
        }
        self.storage.drop_collection(name);
        Ok(())
    }

    /// Re-applies one logged record (recovery replay or replication apply).
    /// Records for collections that do not exist yet create them with
    /// default options.
    pub fn apply_record(&self, record: &WalRecord) -> CatalogResult<()> {
        if record.database != self.name {
            return Ok(());
        }
        let collection = match self.collection(&record.collection) {
            Ok(collection) => collection,
            Err(CatalogError::CollectionNotFound(_)) => {
                // re-create with default layout; options are not logged
                self.create_collection(&record.collection, CollectionOptions::default())?
            }
            Err(other) => return Err(other),
        };
        collection.apply_document(record.op, &record.key, record.document.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_and_drop_collection() {
        let db = Database::new("_system");
        db.create_collection("users", CollectionOptions::default()).unwrap();
        assert!(db.collection("users").is_ok());
        assert!(matches!(
            db.create_collection("users", CollectionOptions::default()),
            Err(CatalogError::DuplicateCollection(_))
        ));
        db.drop_collection("users").unwrap();
        assert!(db.collection("users").is_err());
    }

    #[test]
    fn test_distribute_shards_like_inherits_shard_count() {
        let db = Database::new("_system");
        db.create_collection("proto", CollectionOptions::with_shards(5)).unwrap();
        let follower = db
            .create_collection(
                "follower",
                CollectionOptions {
                    number_of_shards: 2, // overridden by the prototype
                    distribute_shards_like: Some("proto".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(follower.number_of_shards(), 5);
    }

    #[test]
    fn test_distribute_shards_like_unknown_prototype() {
        let db = Database::new("_system");
        let err = db.create_collection(
            "follower",
            CollectionOptions {
                distribute_shards_like: Some("missing".into()),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(CatalogError::DistributeShardsLikeUnknown(_))));
    }

    #[test]
    fn test_apply_record_creates_collection() {
        let db = Database::new("_system");
        let record = WalRecord {
            tick: 1,
            op: crate::wal::WalOp::Insert,
            database: "_system".into(),
            collection: "fresh".into(),
            key: "a".into(),
            document: json!({"_key": "a", "_id": "fresh/a", "_rev": "x", "v": 1}),
        };
        db.apply_record(&record).unwrap();
        assert_eq!(db.collection("fresh").unwrap().count().unwrap(), 1);
    }
}
