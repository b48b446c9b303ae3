//! The agency client seam.
//!
//! All consensus traffic goes through `AgencyClient`, which retries against
//! the discovered leader: a 307 or 303 response carries the leader's
//! endpoint, the client re-targets and repeats. The transport is injected
//! so tests and the in-process server use `LocalAgency` while a real
//! deployment would put HTTP behind the same trait.

use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use super::store::AgencyStore;
use super::{AgencyError, AgencyResult};

const MAX_REDIRECTS: usize = 8;

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
    /// Leader endpoint from the Location header on 307/303.
    pub redirect: Option<String>,
}

/// One POST to `/_api/agency/{action}` on one endpoint.
pub trait AgencyTransport: Send + Sync {
    fn post(&self, endpoint: &str, action: &str, body: &Value) -> AgencyResult<TransportResponse>;
}

pub struct AgencyClient {
    transport: Arc<dyn AgencyTransport>,
    /// Preferred endpoint first; rotated as redirects teach us the leader.
    endpoints: RwLock<Vec<String>>,
}

impl AgencyClient {
    pub fn new(transport: Arc<dyn AgencyTransport>, endpoints: Vec<String>) -> Self {
        Self {
            transport,
            endpoints: RwLock::new(endpoints),
        }
    }

    /// `read [[path, ...]]` -> the requested subtrees.
    pub fn read(&self, paths: &[&str]) -> AgencyResult<Value> {
        let body = Value::Array(vec![Value::Array(
            paths.iter().map(|p| Value::String(p.to_string())).collect(),
        )]);
        let out = self.request("read", &body)?;
        // one result object per path list
        Ok(out
            .as_array()
            .and_then(|results| results.first().cloned())
            .unwrap_or(Value::Null))
    }

    /// `write [[{path: {op, new}}]]`.
    pub fn write(&self, ops: Value) -> AgencyResult<Value> {
        let body = Value::Array(vec![Value::Array(vec![ops])]);
        self.request("write", &body)
    }

    /// `transact [[ops, preconditions]]`.
    pub fn transact(&self, ops: Value, preconditions: Value) -> AgencyResult<Value> {
        let body = Value::Array(vec![Value::Array(vec![ops, preconditions])]);
        self.request("transact", &body)
    }

    fn request(&self, action: &str, body: &Value) -> AgencyResult<Value> {
        let mut endpoint = self
            .endpoints
            .read()
            .expect("endpoints poisoned")
            .first()
            .cloned()
            .ok_or(AgencyError::NoLeader(0))?;

        for _ in 0..MAX_REDIRECTS {
            let response = self.transport.post(&endpoint, action, body)?;
            match response.status {
                200 => return Ok(response.body),
                307 | 303 => {
                    let Some(leader) = response.redirect else {
                        return Err(AgencyError::Transport(
                            "redirect without location".to_string(),
                        ));
                    };
                    // remember the leader for the next call
                    let mut endpoints = self.endpoints.write().expect("endpoints poisoned");
                    endpoints.retain(|e| e != &leader);
                    endpoints.insert(0, leader.clone());
                    endpoint = leader;
                }
                412 => return Err(AgencyError::PreconditionFailed),
                other => {
                    return Err(AgencyError::Transport(format!(
                        "agency {} returned status {}",
                        action, other
                    )))
                }
            }
        }
        Err(AgencyError::NoLeader(MAX_REDIRECTS))
    }
}

/// An in-process agency: one shared store, a configurable set of node
/// endpoints, exactly one of which answers as leader at a time. Non-leader
/// nodes redirect, like a real agency follower.
pub struct LocalAgency {
    store: Arc<AgencyStore>,
    endpoints: Vec<String>,
    leader: RwLock<String>,
}

impl LocalAgency {
    pub fn new(endpoints: Vec<String>) -> Self {
        let leader = endpoints.first().cloned().unwrap_or_default();
        Self {
            store: Arc::new(AgencyStore::new()),
            endpoints,
            leader: RwLock::new(leader),
        }
    }

    /// Single-node agency, the common case for one-process deployments.
    pub fn single() -> Self {
        Self::new(vec!["agency-0".to_string()])
    }

    pub fn store(&self) -> &Arc<AgencyStore> {
        &self.store
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.clone()
    }

    pub fn leader(&self) -> String {
        self.leader.read().expect("leader poisoned").clone()
    }

    /// Moves leadership, e.g. to exercise redirect-following.
    pub fn set_leader(&self, endpoint: &str) {
        *self.leader.write().expect("leader poisoned") = endpoint.to_string();
    }

    pub fn is_leader(&self, endpoint: &str) -> bool {
        self.leader() == endpoint
    }

    /// Serves one agency action on the leader. Shared by the transport
    /// below and by the HTTP routes.
    pub fn handle(&self, action: &str, body: &Value) -> AgencyResult<Value> {
        match action {
            "read" => {
                let lists = body
                    .as_array()
                    .ok_or_else(|| AgencyError::Malformed("read expects [[path]]".into()))?;
                let mut results = Vec::with_capacity(lists.len());
                for list in lists {
                    let paths: Vec<String> = list
                        .as_array()
                        .ok_or_else(|| AgencyError::Malformed("read expects [[path]]".into()))?
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                    results.push(self.store.read(&paths));
                }
                Ok(Value::Array(results))
            }
            "write" => {
                let transactions = body
                    .as_array()
                    .ok_or_else(|| AgencyError::Malformed("write expects [[ops]]".into()))?;
                let mut results = Vec::new();
                for (i, transaction) in transactions.iter().enumerate() {
                    let ops = transaction
                        .as_array()
                        .and_then(|t| t.first())
                        .and_then(Value::as_object)
                        .ok_or_else(|| AgencyError::Malformed("write expects [[ops]]".into()))?;
                    self.store.write(ops)?;
                    results.push(Value::from(i as u64 + 1));
                }
                Ok(serde_json::json!({ "results": results }))
            }
            "transact" => {
                let transactions = body
                    .as_array()
                    .ok_or_else(|| AgencyError::Malformed("transact expects [[ops, pre]]".into()))?;
                let mut results = Vec::new();
                for (i, transaction) in transactions.iter().enumerate() {
                    let parts = transaction.as_array().ok_or_else(|| {
                        AgencyError::Malformed("transact expects [[ops, pre]]".into())
                    })?;
                    let ops = parts
                        .first()
                        .and_then(Value::as_object)
                        .ok_or_else(|| AgencyError::Malformed("missing mutations".into()))?;
                    let empty = Map::new();
                    let preconditions = parts.get(1).and_then(Value::as_object).unwrap_or(&empty);
                    self.store.transact(ops, preconditions)?;
                    results.push(Value::from(i as u64 + 1));
                }
                Ok(serde_json::json!({ "results": results }))
            }
            other => Err(AgencyError::Malformed(format!(
                "unknown agency action '{}'",
                other
            ))),
        }
    }

    /// A client wired to this agency through the local transport, starting
    /// at an arbitrary (possibly non-leader) endpoint.
    pub fn client(self: &Arc<Self>) -> AgencyClient {
        let endpoints = self.endpoints();
        AgencyClient::new(
            Arc::new(LocalTransport {
                agency: Arc::clone(self),
            }),
            endpoints,
        )
    }
}

struct LocalTransport {
    agency: Arc<LocalAgency>,
}

impl AgencyTransport for LocalTransport {
    fn post(&self, endpoint: &str, action: &str, body: &Value) -> AgencyResult<TransportResponse> {
        if !self.agency.endpoints.iter().any(|e| e == endpoint) {
            return Err(AgencyError::Transport(format!(
                "unknown endpoint '{}'",
                endpoint
            )));
        }
        if !self.agency.is_leader(endpoint) {
            return Ok(TransportResponse {
                status: 307,
                body: Value::Null,
                redirect: Some(self.agency.leader()),
            });
        }
        match self.agency.handle(action, body) {
            Ok(body) => Ok(TransportResponse {
                status: 200,
                body,
                redirect: None,
            }),
            Err(AgencyError::PreconditionFailed) => Ok(TransportResponse {
                status: 412,
                body: Value::Null,
                redirect: None,
            }),
            Err(other) => Err(other),
        }
    }
}

/// Transport that counts calls per endpoint, for redirect tests.
#[cfg(test)]
pub(crate) struct CountingTransport {
    pub inner: Arc<LocalAgency>,
    pub calls: std::sync::Mutex<std::collections::HashMap<String, usize>>,
}

#[cfg(test)]
impl AgencyTransport for CountingTransport {
    fn post(&self, endpoint: &str, action: &str, body: &Value) -> AgencyResult<TransportResponse> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
        LocalTransport {
            agency: Arc::clone(&self.inner),
        }
        .post(endpoint, action, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_node() -> Arc<LocalAgency> {
        Arc::new(LocalAgency::new(vec![
            "agency-0".into(),
            "agency-1".into(),
            "agency-2".into(),
        ]))
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let agency = three_node();
        let client = agency.client();
        client
            .write(json!({"/arango/Health/s1/Status": {"op": "set", "new": "GOOD"}}))
            .unwrap();
        let out = client.read(&["/arango/Health"]).unwrap();
        assert_eq!(out["arango"]["Health"]["s1"]["Status"], "GOOD");
    }

    #[test]
    fn test_client_follows_leader_redirect() {
        let agency = three_node();
        agency.set_leader("agency-2");
        // client starts at a follower and must chase the 307
        let transport = Arc::new(CountingTransport {
            inner: Arc::clone(&agency),
            calls: std::sync::Mutex::new(std::collections::HashMap::new()),
        });
        let client = AgencyClient::new(transport.clone(), agency.endpoints());

        client.write(json!({"/x": {"op": "set", "new": 1}})).unwrap();
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.get("agency-0"), Some(&1));
        assert_eq!(calls.get("agency-2"), Some(&1));
        drop(calls);

        // the discovered leader is remembered: no second redirect hop
        client.write(json!({"/y": {"op": "set", "new": 2}})).unwrap();
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.get("agency-0"), Some(&1));
        assert_eq!(calls.get("agency-2"), Some(&2));
    }

    #[test]
    fn test_transact_precondition_via_client() {
        let agency = three_node();
        let client = agency.client();
        client.write(json!({"/v": {"op": "set", "new": 1}})).unwrap();

        client
            .transact(
                json!({"/v": {"op": "set", "new": 2}}),
                json!({"/v": {"old": 1}}),
            )
            .unwrap();
        let err = client.transact(
            json!({"/v": {"op": "set", "new": 3}}),
            json!({"/v": {"old": 1}}),
        );
        assert!(matches!(err, Err(AgencyError::PreconditionFailed)));
    }

    #[test]
    fn test_leadership_change_mid_stream() {
        let agency = three_node();
        let client = agency.client();
        client.write(json!({"/a": {"op": "set", "new": 1}})).unwrap();
        agency.set_leader("agency-1");
        client.write(json!({"/b": {"op": "set", "new": 2}})).unwrap();
        assert_eq!(agency.store().get("/b"), Some(json!(2)));
    }
}
