//! Agency: the consensus key-value store backing cluster metadata.
//!
//! The store is a JSON tree addressed by slash-separated paths, mutated
//! through `set` / `delete` / `increment` operations, optionally guarded by
//! preconditions (compare-and-set). Callers go through `AgencyClient`,
//! which follows leader redirects over an injected transport, so the
//! coordinator never needs to know which node currently leads.

mod client;
mod store;

pub use client::{AgencyClient, AgencyTransport, LocalAgency, TransportResponse};
pub use store::AgencyStore;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AgencyError {
    #[error("malformed agency request: {0}")]
    Malformed(String),

    #[error("precondition failed")]
    PreconditionFailed,

    #[error("no reachable agency leader after {0} redirects")]
    NoLeader(usize),

    #[error("agency transport: {0}")]
    Transport(String),
}

pub type AgencyResult<T> = Result<T, AgencyError>;
