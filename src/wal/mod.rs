//! The logical operation log.
//!
//! Every document mutation appends one record, identified by a strictly
//! increasing tick. The log is the durability story (the in-memory engine is
//! rebuilt from it on startup) and the replication feed (appliers tail it
//! from a start tick). Segments rotate by size and are pruned by the
//! retention policy unless a barrier pins them.

mod reader;
mod record;
mod retention;
mod writer;

pub use reader::{ReadOutcome, WalReader};
pub use record::{WalOp, WalRecord};
pub use retention::{BarrierId, RetentionBarriers};
pub use writer::WalWriter;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("wal corruption at segment {segment}, offset {offset}")]
    Corruption { segment: u64, offset: u64 },

    #[error("wal record malformed: {0}")]
    Malformed(String),
}

pub type WalResult<T> = Result<T, WalError>;
