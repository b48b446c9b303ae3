//! Document-to-shard routing.
//!
//! The shard of a document is a crc32 hash of its shard-key field values,
//! reduced modulo `numberOfShards`. Routing only depends on the shard-key
//! values, which is why those attributes must never change on an existing
//! document.

use serde_json::{Map, Value};

use crate::query::value::group_key;

/// Computes the shard a document belongs to.
///
/// `key` is the document key, `body` the document fields. With the default
/// shard key `["_key"]`, only `key` matters.
pub fn shard_index(shard_keys: &[String], key: &str, body: &Map<String, Value>, shards: usize) -> usize {
    if shards <= 1 {
        return 0;
    }
    let mut hasher = crc32fast::Hasher::new();
    for field in shard_keys {
        if field == "_key" {
            hasher.update(key.as_bytes());
        } else {
            let value = body.get(field).cloned().unwrap_or(Value::Null);
            hasher.update(group_key(&value).as_bytes());
        }
        hasher.update(b"\x00");
    }
    (hasher.finalize() as usize) % shards
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_routing_is_deterministic() {
        let keys = vec!["_key".to_string()];
        let b = body(json!({}));
        assert_eq!(shard_index(&keys, "abc", &b, 5), shard_index(&keys, "abc", &b, 5));
    }

    #[test]
    fn test_single_shard_short_circuits() {
        let keys = vec!["_key".to_string()];
        assert_eq!(shard_index(&keys, "anything", &body(json!({})), 1), 0);
    }

    #[test]
    fn test_custom_shard_key_ignores_document_key() {
        let keys = vec!["region".to_string()];
        let b = body(json!({"region": "eu"}));
        let a = shard_index(&keys, "k1", &b, 7);
        let c = shard_index(&keys, "k2", &b, 7);
        assert_eq!(a, c);
    }

    #[test]
    fn test_spread_over_shards() {
        let keys = vec!["_key".to_string()];
        let b = body(json!({}));
        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            seen.insert(shard_index(&keys, &format!("k{}", i), &b, 4));
        }
        assert_eq!(seen.len(), 4);
    }
}
