//! Shared per-query execution state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::Database;
use crate::errors::ErrorCode;
use crate::query::errors::{QueryError, QueryResult, QueryWarning};

/// Handed by reference to every operator call. Shard branches running on
/// gather threads share it, so everything here is Sync.
pub struct ExecutionContext<'a> {
    pub database: &'a Database,
    warnings: Mutex<Vec<QueryWarning>>,
    cancelled: Arc<AtomicBool>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(database: &'a Database) -> Self {
        Self::with_cancel(database, Arc::new(AtomicBool::new(false)))
    }

    /// A context whose query can be aborted from another thread (client
    /// disconnect, deadline). In-flight shard branches observe the flag at
    /// their next batch boundary.
    pub fn with_cancel(database: &'a Database, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            database,
            warnings: Mutex::new(Vec::new()),
            cancelled,
        }
    }

    /// Checked at every `get_batch`; a cancelled query aborts rather than
    /// returning partial results.
    pub fn check_cancelled(&self) -> QueryResult<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(QueryError::new(ErrorCode::QueryKilled, "query killed"));
        }
        Ok(())
    }

    pub fn warn(&self, warning: QueryWarning) {
        let mut warnings = self.warnings.lock().expect("warnings poisoned");
        if !warnings.contains(&warning) {
            warnings.push(warning);
        }
    }

    pub fn take_warnings(&self) -> Vec<QueryWarning> {
        std::mem::take(&mut self.warnings.lock().expect("warnings poisoned"))
    }
}
