//! The `Document` wrapper over a JSON object body.

use serde_json::{Map, Value};

use super::{DocumentError, DocumentResult, Revision};

/// A stored document: a JSON object with populated system fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    body: Map<String, Value>,
}

impl Document {
    /// Builds a document from a client-supplied body, stamping system fields.
    ///
    /// The caller has already validated (or generated) `key`.
    pub fn assemble(
        collection: &str,
        key: String,
        rev: Revision,
        body: Value,
    ) -> DocumentResult<Self> {
        let mut map = match body {
            Value::Object(map) => map,
            _ => return Err(DocumentError::NotAnObject),
        };
        map.insert("_key".to_string(), Value::String(key.clone()));
        map.insert(
            "_id".to_string(),
            Value::String(format!("{}/{}", collection, key)),
        );
        map.insert("_rev".to_string(), Value::String(rev.as_string()));
        Ok(Self { body: map })
    }

    /// Wraps an already-assembled object (e.g. read back from the WAL).
    pub fn from_object(map: Map<String, Value>) -> Self {
        Self { body: map }
    }

    pub fn key(&self) -> &str {
        self.body
            .get("_key")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn id(&self) -> &str {
        self.body
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn rev(&self) -> &str {
        self.body
            .get("_rev")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Replaces the revision token after a mutation.
    pub fn set_rev(&mut self, rev: Revision) {
        self.body
            .insert("_rev".to_string(), Value::String(rev.as_string()));
    }

    /// Top-level field access.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Dotted-path field access (`a.b.c`).
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current: &Value = self.body.get(path.split('.').next()?)?;
        for part in path.split('.').skip(1) {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    pub fn object(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Merges `patch` into the document (top-level merge, `null` removes when
    /// `keep_null` is false). `_key` and `_id` never change.
    pub fn update_with(&mut self, patch: &Map<String, Value>, keep_null: bool) -> DocumentResult<()> {
        for (field, value) in patch {
            if field == "_id" || field == "_rev" {
                continue;
            }
            if field == "_key" {
                if value.as_str() != Some(self.key()) {
                    return Err(DocumentError::KeyImmutable);
                }
                continue;
            }
            if value.is_null() && !keep_null {
                self.body.remove(field);
            } else {
                self.body.insert(field.clone(), value.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::RevisionGenerator;
    use serde_json::json;

    fn rev() -> Revision {
        RevisionGenerator::new().next()
    }

    #[test]
    fn test_assemble_stamps_system_fields() {
        let doc = Document::assemble("users", "alice".into(), rev(), json!({"age": 7})).unwrap();
        assert_eq!(doc.key(), "alice");
        assert_eq!(doc.id(), "users/alice");
        assert!(!doc.rev().is_empty());
        assert_eq!(doc.get("age"), Some(&json!(7)));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Document::assemble("users", "k".into(), rev(), json!([1, 2])).is_err());
    }

    #[test]
    fn test_update_cannot_change_key() {
        let mut doc = Document::assemble("users", "k".into(), rev(), json!({})).unwrap();
        let patch = json!({"_key": "other"});
        let err = doc.update_with(patch.as_object().unwrap(), true);
        assert!(err.is_err());
    }

    #[test]
    fn test_update_merges_and_removes_null() {
        let mut doc =
            Document::assemble("users", "k".into(), rev(), json!({"a": 1, "b": 2})).unwrap();
        let patch = json!({"a": null, "c": 3});
        doc.update_with(patch.as_object().unwrap(), false).unwrap();
        assert_eq!(doc.get("a"), None);
        assert_eq!(doc.get("c"), Some(&json!(3)));
    }

    #[test]
    fn test_get_path() {
        let doc = Document::assemble(
            "users",
            "k".into(),
            rev(),
            json!({"address": {"city": {"name": "Oslo"}}}),
        )
        .unwrap();
        assert_eq!(doc.get_path("address.city.name"), Some(&json!("Oslo")));
        assert_eq!(doc.get_path("address.zip"), None);
    }
}
