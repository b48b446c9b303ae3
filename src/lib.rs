//! corvusdb: the execution and coordination core of a sharded document
//! database.
//!
//! The query side compiles a FOR/FILTER/COLLECT/RETURN language into a
//! plan-node arena, rewrites it with named optimizer rules and executes it
//! through pull-based operators. The cluster side keeps shard-to-server
//! assignment (Plan vs Current) in an agency-style consensus store and
//! converges it through asynchronous move jobs. Replication tails a
//! checksummed logical log from a sync snapshot; the same log drives crash
//! recovery.

pub mod agency;
pub mod catalog;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod crash_point;
pub mod document;
pub mod errors;
pub mod exec;
pub mod http_server;
pub mod index;
pub mod observability;
pub mod optimizer;
pub mod plan;
pub mod query;
pub mod recovery;
pub mod replication;
pub mod storage;
pub mod wal;
