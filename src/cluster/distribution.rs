//! Shard-to-server assignment maps.
//!
//! Plan holds the desired assignment, Current the observed one; both map
//! shard names (`sNNNN`, numerically ordered) to a leader plus follower
//! list. During a leader handover Current may transiently carry the old
//! leader prefixed with `_`, marking it resigned (non-authoritative);
//! comparisons that care about identity, not authority, strip the marker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Strips the resigned-leader marker.
pub fn strip_resigned(server: &str) -> &str {
    server.strip_prefix('_').unwrap_or(server)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub leader: String,
    pub followers: Vec<String>,
}

impl ShardAssignment {
    pub fn new(leader: impl Into<String>, followers: Vec<String>) -> Self {
        Self {
            leader: leader.into(),
            followers,
        }
    }

    /// All servers carrying the shard, leader first, markers stripped.
    pub fn servers(&self) -> Vec<String> {
        let mut out = vec![strip_resigned(&self.leader).to_string()];
        out.extend(self.followers.iter().map(|f| strip_resigned(f).to_string()));
        out
    }

    pub fn holds(&self, server: &str) -> bool {
        self.servers().iter().any(|s| s == server)
    }

    /// Same leader identity and same follower set, ignoring resignation
    /// markers and follower order.
    pub fn mirrors(&self, other: &ShardAssignment) -> bool {
        if strip_resigned(&self.leader) != strip_resigned(&other.leader) {
            return false;
        }
        let mut a: Vec<&str> = self.followers.iter().map(|f| strip_resigned(f)).collect();
        let mut b: Vec<&str> = other.followers.iter().map(|f| strip_resigned(f)).collect();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }

    /// Wire form: the server list, leader first.
    pub fn to_value(&self) -> Value {
        let mut servers = vec![self.leader.clone()];
        servers.extend(self.followers.clone());
        json!(servers)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let servers = value.as_array()?;
        let leader = servers.first()?.as_str()?.to_string();
        let followers = servers[1..]
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        Some(Self { leader, followers })
    }
}

/// One collection's shard assignments, ordered by shard name. Shard names
/// are zero-padded so lexicographic order is numeric order.
pub type ShardMap = BTreeMap<String, ShardAssignment>;

/// Serializes a shard map as `{shard: [servers...]}`.
pub fn shard_map_to_value(map: &ShardMap) -> Value {
    let mut out = serde_json::Map::new();
    for (shard, assignment) in map {
        out.insert(shard.clone(), assignment.to_value());
    }
    Value::Object(out)
}

pub fn shard_map_from_value(value: &Value) -> ShardMap {
    let mut out = ShardMap::new();
    if let Some(map) = value.as_object() {
        for (shard, servers) in map {
            if let Some(assignment) = ShardAssignment::from_value(servers) {
                out.insert(shard.clone(), assignment);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_resigned() {
        assert_eq!(strip_resigned("_server1"), "server1");
        assert_eq!(strip_resigned("server1"), "server1");
    }

    #[test]
    fn test_mirrors_ignores_marker_and_follower_order() {
        let a = ShardAssignment::new("_s1", vec!["s2".into(), "s3".into()]);
        let b = ShardAssignment::new("s1", vec!["s3".into(), "s2".into()]);
        assert!(a.mirrors(&b));

        let c = ShardAssignment::new("s2", vec!["s1".into(), "s3".into()]);
        assert!(!a.mirrors(&c));
    }

    #[test]
    fn test_shard_map_round_trip() {
        let mut map = ShardMap::new();
        map.insert("s0001".into(), ShardAssignment::new("a", vec!["b".into()]));
        map.insert("s0002".into(), ShardAssignment::new("b", vec!["a".into()]));
        let value = shard_map_to_value(&map);
        assert_eq!(shard_map_from_value(&value), map);
    }

    #[test]
    fn test_shard_names_order_numerically() {
        let mut map = ShardMap::new();
        for i in [10, 2, 1] {
            map.insert(
                format!("s{:04}", i),
                ShardAssignment::new("a", Vec::new()),
            );
        }
        let shards: Vec<&String> = map.keys().collect();
        assert_eq!(shards, ["s0001", "s0002", "s0010"]);
    }
}
