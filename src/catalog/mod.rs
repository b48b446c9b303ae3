//! Catalog: databases, collections, shard routing.
//!
//! A collection owns a fixed number of shards (`numberOfShards`, decided at
//! creation) and routes documents to them by hashing the shard-key field
//! values (default `_key`). Shard-key fields are immutable on documents;
//! collections not sharded by `_key` reject client-chosen keys.

mod collection;
mod database;
mod sharding;

pub use collection::{Collection, CollectionOptions};
pub use database::Database;
pub use sharding::shard_index;

use thiserror::Error;

use crate::document::DocumentError;
use crate::errors::ErrorCode;
use crate::storage::StorageError;
use crate::wal::WalError;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("collection '{0}' already exists")]
    DuplicateCollection(String),

    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("document '{0}' not found")]
    DocumentNotFound(String),

    #[error("unique constraint violated: key '{0}' already exists")]
    UniqueConstraintViolated(String),

    #[error("must not specify _key for this collection")]
    MustNotSpecifyKey,

    #[error("must not change the value of a shard key attribute")]
    MustNotChangeShardingAttributes,

    #[error("prototype collection '{0}' for distributeShardsLike not found")]
    DistributeShardsLikeUnknown(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Wal(#[from] WalError),
}

impl CatalogError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CatalogError::DuplicateCollection(_) => ErrorCode::Conflict,
            CatalogError::CollectionNotFound(_) => ErrorCode::DataSourceNotFound,
            CatalogError::DocumentNotFound(_) => ErrorCode::DocumentNotFound,
            CatalogError::UniqueConstraintViolated(_) => ErrorCode::UniqueConstraintViolated,
            CatalogError::MustNotSpecifyKey => ErrorCode::ClusterMustNotSpecifyKey,
            CatalogError::MustNotChangeShardingAttributes => {
                ErrorCode::ClusterMustNotChangeShardingAttributes
            }
            CatalogError::DistributeShardsLikeUnknown(_) => ErrorCode::DataSourceNotFound,
            CatalogError::Document(_) => ErrorCode::DocumentKeyBad,
            CatalogError::Storage(_) => ErrorCode::Internal,
            CatalogError::Wal(_) => ErrorCode::Internal,
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;
