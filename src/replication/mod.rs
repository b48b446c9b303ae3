//! Replication: follower-side catch-up from a leader's logical log.
//!
//! A follower first bulk-syncs a snapshot (obtaining the `lastLogTick` the
//! snapshot corresponds to, optionally pinning the leader's log with a
//! retention barrier), then tails the log continuously from that tick.
//! One applier instance exists per follower database, held in a
//! process-wide registry with an explicit lifecycle: start, stop
//! (idempotent, callable from any thread), forget.

mod applier;
mod registry;
mod source;

pub use applier::{Applier, ApplierProperties, ApplierState, ApplierStatus, SyncOutcome};
pub use registry::ApplierRegistry;
pub use source::{LocalSource, ReplicationSource, SyncSnapshot};

use thiserror::Error;

use crate::errors::ErrorCode;

#[derive(Debug, Clone, Error)]
pub enum ReplicationError {
    #[error("applier is already running")]
    AlreadyRunning,

    #[error(
        "start tick {requested} is not present on the source any more \
         (oldest retained: {oldest})"
    )]
    StartTickNotPresent { requested: u64, oldest: u64 },

    #[error("replication source: {0}")]
    Source(String),

    #[error("apply failed: {0}")]
    Apply(String),
}

impl ReplicationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ReplicationError::AlreadyRunning => ErrorCode::ReplicationRunning,
            ReplicationError::StartTickNotPresent { .. } => {
                ErrorCode::ReplicationStartTickNotPresent
            }
            ReplicationError::Source(_) | ReplicationError::Apply(_) => ErrorCode::Internal,
        }
    }
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;
