//! Shard / replication coordination.
//!
//! The coordinator keeps the desired shard-to-server assignment (Plan) and
//! the observed one (Current) in the agency, mutates them only through
//! compare-and-set agency transactions, and drives the asynchronous jobs
//! (shard moves, server cleanout) that converge Current toward Plan.

mod coordinator;
mod distribution;
mod health;
mod jobs;
mod rebalance;

pub use coordinator::ClusterCoordinator;
pub use distribution::{
    shard_map_from_value, shard_map_to_value, strip_resigned, ShardAssignment, ShardMap,
};
pub use health::{HealthStatus, ServerHealth};
pub use jobs::{JobState, MoveShardJob};
pub use rebalance::{RebalanceOptions, RebalancePlan};

use thiserror::Error;

use crate::agency::AgencyError;
use crate::errors::ErrorCode;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("server '{0}' is unknown")]
    UnknownServer(String),

    #[error("server '{0}' is not in a usable state")]
    ServerUnusable(String),

    #[error("collection '{0}' has no registered shard distribution")]
    UnknownCollection(String),

    #[error("prototype collection '{0}' for distributeShardsLike not found")]
    UnknownPrototype(String),

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error(transparent)]
    Agency(#[from] AgencyError),
}

impl ClusterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClusterError::UnknownServer(_) | ClusterError::ServerUnusable(_) => {
                ErrorCode::ClusterServerUnknown
            }
            ClusterError::UnknownCollection(_) | ClusterError::UnknownPrototype(_) => {
                ErrorCode::DataSourceNotFound
            }
            ClusterError::BadParameter(_) => ErrorCode::HttpBadParameter,
            ClusterError::Agency(_) => ErrorCode::Internal,
        }
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
