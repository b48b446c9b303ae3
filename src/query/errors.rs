//! Query error and warning types.

use thiserror::Error;

use crate::errors::ErrorCode;

/// Errors raised while parsing, planning or executing a query.
#[derive(Debug, Clone, Error)]
#[error("[{}] {message}", code.as_str())]
pub struct QueryError {
    pub code: ErrorCode,
    pub message: String,
}

impl QueryError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueryParse, message)
    }

    pub fn bind_missing(name: &str) -> Self {
        Self::new(
            ErrorCode::QueryBindParameterMissing,
            format!("no value specified for declared bind parameter '{}'", name),
        )
    }

    pub fn bind_undeclared(name: &str) -> Self {
        Self::new(
            ErrorCode::QueryBindParameterUnused,
            format!("bind parameter '{}' was not declared in the query", name),
        )
    }

    pub fn collection_not_found(name: &str) -> Self {
        Self::new(
            ErrorCode::DataSourceNotFound,
            format!("collection or view not found: {}", name),
        )
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueryInvalidOptionsAttribute, message)
    }

    pub fn num(&self) -> i32 {
        self.code.num()
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

/// Non-fatal warnings attached to a query result.
///
/// A warning never aborts the query; it marks inputs that are syntactically
/// valid but cannot produce results (e.g. an empty-string traversal start
/// vertex), so callers can tell "no matches" from "meaningless input".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryWarning {
    pub code: i32,
    pub message: String,
}

impl QueryWarning {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Warning for traversal start/end vertices that are empty strings.
    pub fn invalid_start_vertex(context: &str) -> Self {
        Self::new(
            1524,
            format!("invalid start vertex specified for {}", context),
        )
    }
}
