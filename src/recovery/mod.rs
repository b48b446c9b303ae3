//! Startup recovery: rebuild database state by replaying the log.
//!
//! The in-memory engine holds no durable state of its own; after any stop
//! (clean or crash) the log is the single source of truth. Replay is
//! deterministic: applying the retained records in tick order reproduces
//! the state a clean shutdown at the same tick would have left. A torn
//! record at the log tail is discarded by the log layer; corruption
//! anywhere else fails recovery, and the data directory is left untouched
//! for postmortem.

mod replay;

pub use replay::{recover_database, RecoveryReport};

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::wal::WalError;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("log replay failed: {0}")]
    Wal(#[from] WalError),

    #[error("could not re-apply record: {0}")]
    Apply(#[from] CatalogError),
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;
