//! Observability for corvusdb.
//!
//! One structured JSON log line per event, written synchronously with
//! deterministic key ordering so log output is diffable across runs. Query
//! execution, optimizer rule application, rebalance moves, applier
//! transitions and recovery replay all report through this module.

mod logger;

pub use logger::{Logger, Severity};
