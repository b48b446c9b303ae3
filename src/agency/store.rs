//! The agency's JSON tree.

use std::sync::RwLock;

use serde_json::{Map, Value};

use super::{AgencyError, AgencyResult};

/// Consensus state tree. Readers always see a consistent snapshot; writes
/// take the tree lock for their whole batch, so a write batch is atomic.
#[derive(Debug, Default)]
pub struct AgencyStore {
    root: RwLock<Value>,
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn get_path<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn set_path(root: &mut Value, segments: &[String], value: Value) {
    if segments.is_empty() {
        *root = value;
        return;
    }
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let map = root.as_object_mut().expect("object just ensured");
    if segments.len() == 1 {
        map.insert(segments[0].clone(), value);
        return;
    }
    let child = map
        .entry(segments[0].clone())
        .or_insert_with(|| Value::Object(Map::new()));
    set_path(child, &segments[1..], value);
}

fn delete_path(root: &mut Value, segments: &[String]) {
    if segments.is_empty() {
        *root = Value::Object(Map::new());
        return;
    }
    let Some(map) = root.as_object_mut() else {
        return;
    };
    if segments.len() == 1 {
        map.remove(&segments[0]);
        return;
    }
    if let Some(child) = map.get_mut(&segments[0]) {
        delete_path(child, &segments[1..]);
    }
}

impl AgencyStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
        }
    }

    /// Reads the subtrees at `paths` into one object rooted like the tree.
    pub fn read(&self, paths: &[String]) -> Value {
        let root = self.root.read().expect("agency tree poisoned");
        let mut out = Value::Object(Map::new());
        for path in paths {
            let segs = segments(path);
            if let Some(value) = get_path(&root, &segs) {
                set_path(&mut out, &segs, value.clone());
            }
        }
        out
    }

    /// The value at one path, if present.
    pub fn get(&self, path: &str) -> Option<Value> {
        let root = self.root.read().expect("agency tree poisoned");
        get_path(&root, &segments(path)).cloned()
    }

    /// Applies a batch of operations atomically. Each entry maps a path to
    /// `{op: set|delete|increment, new?, step?}`; a bare value is shorthand
    /// for set.
    pub fn write(&self, ops: &Map<String, Value>) -> AgencyResult<()> {
        let mut root = self.root.write().expect("agency tree poisoned");
        Self::apply(&mut root, ops)
    }

    /// Applies `ops` only when every precondition holds: each precondition
    /// maps a path to the exact expected value, or `{"oldEmpty": true}` to
    /// require absence.
    pub fn transact(
        &self,
        ops: &Map<String, Value>,
        preconditions: &Map<String, Value>,
    ) -> AgencyResult<()> {
        let mut root = self.root.write().expect("agency tree poisoned");
        for (path, expected) in preconditions {
            let actual = get_path(&root, &segments(path));
            let holds = match expected.get("oldEmpty").and_then(Value::as_bool) {
                Some(true) => actual.is_none(),
                Some(false) => actual.is_some(),
                None => match expected.get("old") {
                    Some(old) => actual == Some(old),
                    None => actual == Some(expected),
                },
            };
            if !holds {
                return Err(AgencyError::PreconditionFailed);
            }
        }
        Self::apply(&mut root, ops)
    }

    fn apply(root: &mut Value, ops: &Map<String, Value>) -> AgencyResult<()> {
        for (path, spec) in ops {
            let segs = segments(path);
            let op = spec.get("op").and_then(Value::as_str);
            match op {
                Some("set") => {
                    let new = spec
                        .get("new")
                        .ok_or_else(|| AgencyError::Malformed(format!("set without new: {}", path)))?;
                    set_path(root, &segs, new.clone());
                }
                Some("delete") => delete_path(root, &segs),
                Some("increment") => {
                    let step = spec.get("step").and_then(Value::as_i64).unwrap_or(1);
                    let current = get_path(root, &segs)
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    set_path(root, &segs, Value::from(current + step));
                }
                Some(other) => {
                    return Err(AgencyError::Malformed(format!(
                        "unknown agency op '{}'",
                        other
                    )))
                }
                // bare value: plain set
                None => set_path(root, &segs, spec.clone()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_set_and_read_subtree() {
        let store = AgencyStore::new();
        store
            .write(&ops(json!({"/arango/Plan/DBServers/s1": {"op": "set", "new": "none"}})))
            .unwrap();
        let out = store.read(&["/arango/Plan".to_string()]);
        assert_eq!(out["arango"]["Plan"]["DBServers"]["s1"], "none");
    }

    #[test]
    fn test_delete_removes_subtree() {
        let store = AgencyStore::new();
        store.write(&ops(json!({"/a/b": {"op": "set", "new": 1}}))).unwrap();
        store.write(&ops(json!({"/a/b": {"op": "delete"}}))).unwrap();
        assert_eq!(store.get("/a/b"), None);
        assert!(store.get("/a").is_some());
    }

    #[test]
    fn test_increment_from_absent() {
        let store = AgencyStore::new();
        store.write(&ops(json!({"/counter": {"op": "increment"}}))).unwrap();
        store.write(&ops(json!({"/counter": {"op": "increment"}}))).unwrap();
        assert_eq!(store.get("/counter"), Some(json!(2)));
    }

    #[test]
    fn test_transact_precondition_old_value() {
        let store = AgencyStore::new();
        store.write(&ops(json!({"/x": {"op": "set", "new": 1}}))).unwrap();

        // matching precondition applies
        store
            .transact(
                &ops(json!({"/x": {"op": "set", "new": 2}})),
                &ops(json!({"/x": {"old": 1}})),
            )
            .unwrap();
        assert_eq!(store.get("/x"), Some(json!(2)));

        // stale precondition is refused and nothing changes
        let err = store.transact(
            &ops(json!({"/x": {"op": "set", "new": 9}})),
            &ops(json!({"/x": {"old": 1}})),
        );
        assert!(matches!(err, Err(AgencyError::PreconditionFailed)));
        assert_eq!(store.get("/x"), Some(json!(2)));
    }

    #[test]
    fn test_transact_old_empty() {
        let store = AgencyStore::new();
        store
            .transact(
                &ops(json!({"/fresh": {"op": "set", "new": true}})),
                &ops(json!({"/fresh": {"oldEmpty": true}})),
            )
            .unwrap();
        let err = store.transact(
            &ops(json!({"/fresh": {"op": "set", "new": false}})),
            &ops(json!({"/fresh": {"oldEmpty": true}})),
        );
        assert!(matches!(err, Err(AgencyError::PreconditionFailed)));
    }

    #[test]
    fn test_read_multiple_paths() {
        let store = AgencyStore::new();
        store.write(&ops(json!({"/a/x": {"op": "set", "new": 1}}))).unwrap();
        store.write(&ops(json!({"/b/y": {"op": "set", "new": 2}}))).unwrap();
        let out = store.read(&["/a".to_string(), "/b/y".to_string()]);
        assert_eq!(out["a"]["x"], 1);
        assert_eq!(out["b"]["y"], 2);
    }
}
