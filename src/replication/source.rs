//! The leader-side surface an applier consumes.
//!
//! Modeled as a trait so tests drive the applier against an in-process
//! leader; a networked deployment would put its client behind the same
//! seam.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::catalog::Database;
use crate::wal::{BarrierId, RetentionBarriers, WalReader, WalRecord, WalWriter};

use super::{ReplicationError, ReplicationResult};

/// Everything a bulk sync transfers: collection contents at a consistent
/// tick.
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    /// Log tick the snapshot corresponds to; tailing continues from the
    /// next tick.
    pub last_log_tick: u64,
    /// Collection name -> full document set.
    pub collections: Vec<(String, Vec<Value>)>,
}

pub trait ReplicationSource: Send + Sync {
    /// Consistent full dump plus the tick it is valid at.
    fn dump(&self) -> ReplicationResult<SyncSnapshot>;

    fn last_log_tick(&self) -> ReplicationResult<u64>;

    /// Oldest tick the retained log can still serve.
    fn oldest_retained_tick(&self) -> ReplicationResult<u64>;

    /// Records with tick >= `from_tick`, in tick order.
    fn tail(&self, from_tick: u64) -> ReplicationResult<Vec<WalRecord>>;

    /// Pins ticks >= `from_tick` against log pruning.
    fn create_barrier(&self, from_tick: u64) -> ReplicationResult<BarrierId>;

    fn release_barrier(&self, id: BarrierId) -> ReplicationResult<()>;

    /// Content checksum of one collection, for sync verification.
    fn checksum(&self, collection: &str) -> ReplicationResult<u32>;
}

/// A leader living in the same process: its database, log and retention
/// barriers accessed directly.
pub struct LocalSource {
    database: Arc<Database>,
    wal: Arc<Mutex<WalWriter>>,
    barriers: Arc<Mutex<RetentionBarriers>>,
}

impl LocalSource {
    pub fn new(database: Arc<Database>, wal: Arc<Mutex<WalWriter>>) -> Self {
        Self {
            database,
            wal,
            barriers: Arc::new(Mutex::new(RetentionBarriers::new())),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Drops log segments below `keep_from`, honoring active barriers.
    pub fn prune(&self, keep_from: u64) -> ReplicationResult<usize> {
        let barriers = self.barriers.lock().expect("barriers poisoned");
        self.wal
            .lock()
            .expect("wal poisoned")
            .prune(keep_from, &barriers)
            .map_err(|e| ReplicationError::Source(e.to_string()))
    }
}

impl ReplicationSource for LocalSource {
    fn dump(&self) -> ReplicationResult<SyncSnapshot> {
        let last_log_tick = self.last_log_tick()?;
        let mut collections = Vec::new();
        for name in self.database.collection_names() {
            let collection = self
                .database
                .collection(&name)
                .map_err(|e| ReplicationError::Source(e.to_string()))?;
            let mut documents = Vec::new();
            for shard in 0..collection.number_of_shards() {
                for doc in collection
                    .scan_shard(shard)
                    .map_err(|e| ReplicationError::Source(e.to_string()))?
                {
                    documents.push(doc.into_value());
                }
            }
            collections.push((name, documents));
        }
        Ok(SyncSnapshot {
            last_log_tick,
            collections,
        })
    }

    fn last_log_tick(&self) -> ReplicationResult<u64> {
        Ok(self.wal.lock().expect("wal poisoned").last_tick())
    }

    fn oldest_retained_tick(&self) -> ReplicationResult<u64> {
        Ok(self.wal.lock().expect("wal poisoned").oldest_retained_tick())
    }

    fn tail(&self, from_tick: u64) -> ReplicationResult<Vec<WalRecord>> {
        let dir = {
            let wal = self.wal.lock().expect("wal poisoned");
            wal.dir().to_path_buf()
        };
        WalReader::read_from(&dir, from_tick)
            .map(|outcome| outcome.records)
            .map_err(|e| ReplicationError::Source(e.to_string()))
    }

    fn create_barrier(&self, from_tick: u64) -> ReplicationResult<BarrierId> {
        Ok(self
            .barriers
            .lock()
            .expect("barriers poisoned")
            .create(from_tick))
    }

    fn release_barrier(&self, id: BarrierId) -> ReplicationResult<()> {
        self.barriers.lock().expect("barriers poisoned").release(id);
        Ok(())
    }

    fn checksum(&self, collection: &str) -> ReplicationResult<u32> {
        let collection = self
            .database
            .collection(collection)
            .map_err(|e| ReplicationError::Source(e.to_string()))?;
        let mut hasher = crc32fast::Hasher::new();
        for shard in 0..collection.number_of_shards() {
            for doc in collection
                .scan_shard(shard)
                .map_err(|e| ReplicationError::Source(e.to_string()))?
            {
                hasher.update(doc.as_value().to_string().as_bytes());
            }
        }
        Ok(hasher.finalize())
    }
}
