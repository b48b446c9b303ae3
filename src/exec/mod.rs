//! Pull-based execution.
//!
//! Every operator implements the same contract: `initialize` acquires
//! underlying resources (snapshots, cursors), `get_batch(n)` yields up to
//! `n` rows plus a has-more flag, `shutdown` releases resources and is
//! called on every exit path, including when a sibling branch fails. A row
//! is the set of variable bindings visible at that point of the pipeline.

mod collect;
mod context;
mod engine;
mod eval;
mod gather;
mod modify;
mod pipeline;
mod scan;
mod traversal;

pub use context::ExecutionContext;
pub use engine::{QueryEngine, QueryOptions, QueryResultSet};

use std::collections::HashMap;

use serde_json::Value;

use crate::query::errors::QueryResult;

/// Variable bindings for one row of the stream.
pub type Row = HashMap<String, Value>;

/// Binding under which a Return operator publishes its value.
pub(crate) const RESULT_BINDING: &str = "$result";

#[derive(Debug, Default)]
pub struct Batch {
    pub rows: Vec<Row>,
    pub has_more: bool,
}

impl Batch {
    pub fn done(rows: Vec<Row>) -> Self {
        Self {
            rows,
            has_more: false,
        }
    }

    pub fn more(rows: Vec<Row>) -> Self {
        Self {
            rows,
            has_more: true,
        }
    }
}

pub(crate) fn catalog_err(e: crate::catalog::CatalogError) -> crate::query::errors::QueryError {
    crate::query::errors::QueryError::new(e.code(), e.to_string())
}

/// The operator contract.
pub trait Operator: Send {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()>;

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch>;

    fn shutdown(&mut self);
}
