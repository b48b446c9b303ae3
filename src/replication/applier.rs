//! The applier state machine.
//!
//! Stopped -> Syncing (bulk snapshot) -> Tailing (continuous apply) ->
//! Stopped, on explicit stop or unrecoverable error.
//! `lastProcessedContinuousTick` never decreases while tailing. With
//! `requireFromPresent`, tailing from a tick the source has already pruned
//! stops the applier with an error, unless a retention barrier taken at
//! sync time kept the tick alive; without it, tailing restarts at the
//! oldest retained tick and logs a warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{json, Value};

use crate::catalog::{CollectionOptions, Database};
use crate::observability::Logger;
use crate::wal::BarrierId;

use super::source::ReplicationSource;
use super::{ReplicationError, ReplicationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplierState {
    Stopped,
    Syncing,
    Tailing,
}

impl ApplierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplierState::Stopped => "stopped",
            ApplierState::Syncing => "syncing",
            ApplierState::Tailing => "tailing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApplierProperties {
    /// Refuse to tail from a tick the source no longer retains.
    pub require_from_present: bool,
    /// Take a retention barrier at sync time so the start tick stays
    /// tailable.
    pub use_barrier: bool,
    pub poll_interval: Duration,
}

impl Default for ApplierProperties {
    fn default() -> Self {
        Self {
            require_from_present: true,
            use_barrier: false,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Observable applier state.
#[derive(Debug, Clone)]
pub struct ApplierStatus {
    pub state: ApplierState,
    pub last_applied_continuous_tick: u64,
    pub last_processed_continuous_tick: u64,
    pub last_error: Option<String>,
}

impl ApplierStatus {
    pub fn running(&self) -> bool {
        self.state != ApplierState::Stopped
    }

    pub fn to_value(&self) -> Value {
        json!({
            "running": self.running(),
            "phase": self.state.as_str(),
            "lastAppliedContinuousTick": self.last_applied_continuous_tick,
            "lastProcessedContinuousTick": self.last_processed_continuous_tick,
            "lastError": self.last_error,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub last_log_tick: u64,
    pub barrier_id: Option<BarrierId>,
}

pub struct Applier {
    database: Arc<Database>,
    source: Arc<dyn ReplicationSource>,
    properties: RwLock<ApplierProperties>,
    status: Mutex<ApplierStatus>,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    barrier: Mutex<Option<BarrierId>>,
}

impl Applier {
    pub fn new(database: Arc<Database>, source: Arc<dyn ReplicationSource>) -> Arc<Self> {
        Arc::new(Self {
            database,
            source,
            properties: RwLock::new(ApplierProperties::default()),
            status: Mutex::new(ApplierStatus {
                state: ApplierState::Stopped,
                last_applied_continuous_tick: 0,
                last_processed_continuous_tick: 0,
                last_error: None,
            }),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            barrier: Mutex::new(None),
        })
    }

    pub fn properties(&self) -> ApplierProperties {
        self.properties.read().expect("properties poisoned").clone()
    }

    pub fn set_properties(&self, properties: ApplierProperties) -> ReplicationResult<()> {
        if self.status().running() {
            return Err(ReplicationError::AlreadyRunning);
        }
        *self.properties.write().expect("properties poisoned") = properties;
        Ok(())
    }

    pub fn status(&self) -> ApplierStatus {
        self.status.lock().expect("status poisoned").clone()
    }

    fn set_state(&self, state: ApplierState) {
        self.status.lock().expect("status poisoned").state = state;
    }

    fn record_error(&self, error: &ReplicationError) {
        let mut status = self.status.lock().expect("status poisoned");
        status.state = ApplierState::Stopped;
        status.last_error = Some(error.to_string());
    }

    /// Bulk snapshot: replaces the follower database's collections with the
    /// source's contents and reports the tick to tail from. Takes a
    /// retention barrier first when configured, so the tick outlives log
    /// rotation.
    pub fn sync(&self) -> ReplicationResult<SyncOutcome> {
        if self.status().running() {
            return Err(ReplicationError::AlreadyRunning);
        }
        self.set_state(ApplierState::Syncing);
        let outcome = self.sync_inner();
        match &outcome {
            Ok(outcome) => {
                let mut status = self.status.lock().expect("status poisoned");
                status.state = ApplierState::Stopped;
                status.last_applied_continuous_tick = outcome.last_log_tick;
                status.last_processed_continuous_tick = outcome.last_log_tick;
                status.last_error = None;
            }
            Err(error) => self.record_error(error),
        }
        outcome
    }

    fn sync_inner(&self) -> ReplicationResult<SyncOutcome> {
        let use_barrier = self.properties().use_barrier;
        // pin before dumping: the snapshot tick must stay tailable
        let barrier_id = if use_barrier {
            let tick = self.source.last_log_tick()?;
            Some(self.source.create_barrier(tick.max(1))?)
        } else {
            None
        };

        let snapshot = self.source.dump()?;
        for (name, documents) in &snapshot.collections {
            let collection = match self.database.collection(name) {
                Ok(collection) => {
                    collection
                        .truncate()
                        .map_err(|e| ReplicationError::Apply(e.to_string()))?;
                    collection
                }
                Err(_) => self
                    .database
                    .create_collection(name, CollectionOptions::default())
                    .map_err(|e| ReplicationError::Apply(e.to_string()))?,
            };
            for document in documents {
                let map = document
                    .as_object()
                    .ok_or_else(|| ReplicationError::Apply("non-object document".into()))?;
                let key = map.get("_key").and_then(Value::as_str).unwrap_or_default();
                collection
                    .apply_document(crate::wal::WalOp::Insert, key, document.clone())
                    .map_err(|e| ReplicationError::Apply(e.to_string()))?;
            }
        }

        if let Some(id) = barrier_id {
            *self.barrier.lock().expect("barrier poisoned") = Some(id);
        }
        Logger::info(
            "replication.synced",
            &[
                ("database", self.database.name()),
                ("last_log_tick", &snapshot.last_log_tick.to_string()),
                ("barrier", &barrier_id.map(|b| b.to_string()).unwrap_or_default()),
            ],
        );
        Ok(SyncOutcome {
            last_log_tick: snapshot.last_log_tick,
            barrier_id,
        })
    }

    /// Starts continuous tailing from `from_tick` (exclusive). Starting a
    /// running applier is an error.
    pub fn start(self: &Arc<Self>, from_tick: u64) -> ReplicationResult<()> {
        {
            let mut status = self.status.lock().expect("status poisoned");
            if status.state != ApplierState::Stopped {
                return Err(ReplicationError::AlreadyRunning);
            }
            status.state = ApplierState::Tailing;
            status.last_error = None;
            status.last_processed_continuous_tick = from_tick;
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let applier = Arc::clone(self);
        let handle = thread::spawn(move || applier.tail_loop(from_tick));
        *self.worker.lock().expect("worker poisoned") = Some(handle);
        Logger::info(
            "replication.applier.started",
            &[
                ("database", self.database.name()),
                ("from_tick", &from_tick.to_string()),
            ],
        );
        Ok(())
    }

    fn tail_loop(&self, from_tick: u64) {
        let properties = self.properties();
        let mut next_tick = from_tick + 1;
        let has_barrier = self.barrier.lock().expect("barrier poisoned").is_some();

        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                self.set_state(ApplierState::Stopped);
                return;
            }

            match self.tail_once(&mut next_tick, &properties, has_barrier) {
                Ok(()) => {}
                Err(error) => {
                    Logger::error(
                        "replication.applier.stopped",
                        &[
                            ("database", self.database.name()),
                            ("error", &error.to_string()),
                        ],
                    );
                    self.record_error(&error);
                    return;
                }
            }
            thread::sleep(properties.poll_interval);
        }
    }

    fn tail_once(
        &self,
        next_tick: &mut u64,
        properties: &ApplierProperties,
        has_barrier: bool,
    ) -> ReplicationResult<()> {
        let oldest = self.source.oldest_retained_tick()?;
        if *next_tick < oldest {
            // the segment holding our position was pruned; a barrier taken
            // at sync time would have prevented this
            if properties.require_from_present && !has_barrier {
                return Err(ReplicationError::StartTickNotPresent {
                    requested: *next_tick,
                    oldest,
                });
            }
            if !properties.require_from_present {
                Logger::warn(
                    "replication.applier.skipped_ahead",
                    &[
                        ("database", self.database.name()),
                        ("from", &next_tick.to_string()),
                        ("to", &oldest.to_string()),
                    ],
                );
                *next_tick = oldest;
            }
        }

        let records = self.source.tail(*next_tick)?;
        for record in records {
            self.database
                .apply_record(&record)
                .map_err(|e| ReplicationError::Apply(e.to_string()))?;
            let mut status = self.status.lock().expect("status poisoned");
            // monotone while tailing
            status.last_processed_continuous_tick =
                status.last_processed_continuous_tick.max(record.tick);
            status.last_applied_continuous_tick = status.last_processed_continuous_tick;
            *next_tick = record.tick + 1;
        }
        Ok(())
    }

    /// Stops tailing. Idempotent and safe to call from any thread or
    /// session; returns once the worker has exited.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().expect("worker poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.set_state(ApplierState::Stopped);
        Logger::info(
            "replication.applier.stopped",
            &[("database", self.database.name())],
        );
    }

    /// Stops and releases everything the applier holds on the source.
    pub fn forget(&self) {
        self.stop();
        let barrier = self.barrier.lock().expect("barrier poisoned").take();
        if let Some(id) = barrier {
            let _ = self.source.release_barrier(id);
        }
        let mut status = self.status.lock().expect("status poisoned");
        status.last_applied_continuous_tick = 0;
        status.last_processed_continuous_tick = 0;
        status.last_error = None;
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }
}

impl Drop for Applier {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().expect("worker poisoned").take() {
            let _ = handle.join();
        }
    }
}
