//! Process-wide applier registry.
//!
//! One applier per follower database, addressed by database name. The
//! registry is an explicit instance owned by the server state, not ambient
//! global state; appliers live until explicitly forgotten or the process
//! exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::catalog::Database;

use super::applier::Applier;
use super::source::ReplicationSource;

#[derive(Default)]
pub struct ApplierRegistry {
    appliers: Mutex<HashMap<String, Arc<Applier>>>,
}

impl ApplierRegistry {
    pub fn new() -> Self {
        Self {
            appliers: Mutex::new(HashMap::new()),
        }
    }

    /// The applier for `database`, creating it against `source` on first
    /// use.
    pub fn get_or_create(
        &self,
        database: Arc<Database>,
        source: Arc<dyn ReplicationSource>,
    ) -> Arc<Applier> {
        let mut appliers = self.appliers.lock().expect("registry poisoned");
        appliers
            .entry(database.name().to_string())
            .or_insert_with(|| Applier::new(database, source))
            .clone()
    }

    pub fn get(&self, database: &str) -> Option<Arc<Applier>> {
        self.appliers
            .lock()
            .expect("registry poisoned")
            .get(database)
            .cloned()
    }

    /// Stops the applier and removes it from the registry.
    pub fn forget(&self, database: &str) -> bool {
        let applier = self
            .appliers
            .lock()
            .expect("registry poisoned")
            .remove(database);
        match applier {
            Some(applier) => {
                applier.forget();
                true
            }
            None => false,
        }
    }

    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .appliers
            .lock()
            .expect("registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::source::LocalSource;
    use crate::wal::WalWriter;

    fn source() -> (Arc<LocalSource>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let wal = Arc::new(std::sync::Mutex::new(WalWriter::open(dir.path()).unwrap()));
        let leader = Arc::new(Database::with_wal("_system", Arc::clone(&wal)));
        (Arc::new(LocalSource::new(leader, wal)), dir)
    }

    #[test]
    fn test_one_applier_per_database() {
        let registry = ApplierRegistry::new();
        let (source, _dir) = source();
        let follower = Arc::new(Database::new("_system"));
        let a = registry.get_or_create(Arc::clone(&follower), source.clone());
        let b = registry.get_or_create(follower, source);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.databases(), vec!["_system"]);
    }

    #[test]
    fn test_forget_removes_and_is_idempotent() {
        let registry = ApplierRegistry::new();
        let (source, _dir) = source();
        let follower = Arc::new(Database::new("_system"));
        registry.get_or_create(follower, source);
        assert!(registry.forget("_system"));
        assert!(!registry.forget("_system"));
        assert!(registry.get("_system").is_none());
    }
}
