//! Secondary index descriptors and the per-collection index registry.

mod descriptor;
mod registry;

pub use descriptor::{IndexDescriptor, IndexType};
pub use registry::{EnsureIndexOutcome, IndexRegistry};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("invalid index definition: {0}")]
    InvalidDefinition(String),

    #[error("index '{0}' not found")]
    NotFound(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
