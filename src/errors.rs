//! Central error-code table.
//!
//! Every user-visible failure carries a stable string code and a numeric
//! `errorNum`. The HTTP surface serializes them into the canonical body
//! `{error, code, errorNum, errorMessage}`; library callers match on the
//! enum. Numbers 1xxx follow the public numbering of the wire protocol this
//! engine is compatible with; corvusdb-local conditions live above 9000.

use serde::Serialize;

/// Stable error codes shared across subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Structurally invalid query text (lexer/parser rejection)
    QueryParse,
    /// Referenced bind parameter was not supplied
    QueryBindParameterMissing,
    /// Supplied bind parameter is not referenced by the query
    QueryBindParameterUnused,
    /// Referenced collection does not exist
    DataSourceNotFound,
    /// Named index does not exist or cannot serve the access pattern
    QueryForcedIndexHintUnusable,
    /// Invalid combination of query options (e.g. unsafe readOwnWrites)
    QueryInvalidOptionsAttribute,
    /// Query aborted by the client or a deadline
    QueryKilled,
    /// Explicit `_key` on insert into a collection not sharded by `_key`
    ClusterMustNotSpecifyKey,
    /// Update/replace would modify a shard-key attribute
    ClusterMustNotChangeShardingAttributes,
    /// Unique constraint violated on insert/update
    UniqueConstraintViolated,
    /// Document key fails the key pattern or is immutable
    DocumentKeyBad,
    /// Document not found
    DocumentNotFound,
    /// Revision conflict on a conditional write
    Conflict,
    /// Applier asked to tail a tick already pruned from the source log
    ReplicationStartTickNotPresent,
    /// Applier is already running
    ReplicationRunning,
    /// Rebalance/cleanout request malformed
    HttpBadParameter,
    /// Target server unknown or unhealthy
    ClusterServerUnknown,
    /// WAL corruption detected away from the segment tail
    WalCorruption,
    /// Internal invariant violation
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::QueryParse => "QUERY_PARSE",
            ErrorCode::QueryBindParameterMissing => "QUERY_BIND_PARAMETER_MISSING",
            ErrorCode::QueryBindParameterUnused => "QUERY_BIND_PARAMETER_UNDECLARED",
            ErrorCode::DataSourceNotFound => "DATA_SOURCE_NOT_FOUND",
            ErrorCode::QueryForcedIndexHintUnusable => "QUERY_FORCED_INDEX_HINT_UNUSABLE",
            ErrorCode::QueryInvalidOptionsAttribute => "QUERY_INVALID_OPTIONS_ATTRIBUTE",
            ErrorCode::QueryKilled => "QUERY_KILLED",
            ErrorCode::ClusterMustNotSpecifyKey => "CLUSTER_MUST_NOT_SPECIFY_KEY",
            ErrorCode::ClusterMustNotChangeShardingAttributes => {
                "CLUSTER_MUST_NOT_CHANGE_SHARDING_ATTRIBUTES"
            }
            ErrorCode::UniqueConstraintViolated => "UNIQUE_CONSTRAINT_VIOLATED",
            ErrorCode::DocumentKeyBad => "DOCUMENT_KEY_BAD",
            ErrorCode::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::ReplicationStartTickNotPresent => "REPLICATION_START_TICK_NOT_PRESENT",
            ErrorCode::ReplicationRunning => "REPLICATION_RUNNING",
            ErrorCode::HttpBadParameter => "HTTP_BAD_PARAMETER",
            ErrorCode::ClusterServerUnknown => "CLUSTER_SERVER_UNKNOWN",
            ErrorCode::WalCorruption => "WAL_CORRUPTION",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Numeric `errorNum` reported on the wire.
    pub fn num(&self) -> i32 {
        match self {
            ErrorCode::QueryParse => 1501,
            ErrorCode::QueryBindParameterMissing => 1551,
            ErrorCode::QueryBindParameterUnused => 1552,
            ErrorCode::DataSourceNotFound => 1203,
            ErrorCode::QueryForcedIndexHintUnusable => 1577,
            ErrorCode::QueryInvalidOptionsAttribute => 1548,
            ErrorCode::QueryKilled => 1500,
            ErrorCode::ClusterMustNotSpecifyKey => 1466,
            ErrorCode::ClusterMustNotChangeShardingAttributes => 1464,
            ErrorCode::UniqueConstraintViolated => 1210,
            ErrorCode::DocumentKeyBad => 1221,
            ErrorCode::DocumentNotFound => 1202,
            ErrorCode::Conflict => 1200,
            ErrorCode::ReplicationStartTickNotPresent => 1414,
            ErrorCode::ReplicationRunning => 1425,
            ErrorCode::HttpBadParameter => 400,
            ErrorCode::ClusterServerUnknown => 9001,
            ErrorCode::WalCorruption => 9002,
            ErrorCode::Internal => 4,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical wire-level error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: bool,
    pub code: u16,
    #[serde(rename = "errorNum")]
    pub error_num: i32,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
}

impl ErrorBody {
    pub fn new(http_status: u16, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: true,
            code: http_status,
            error_num: code.num(),
            error_message: message.into(),
        }
    }
}
