//! Index descriptors.
//!
//! Two descriptors are duplicates when their `{type, fields, prefixFields}`
//! triples match exactly, order-sensitively; `ensure_index` returns the
//! existing id for a duplicate instead of creating a second index.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexType {
    /// Always present, over `_key`.
    Primary,
    /// Sorted index over one or more (possibly nested) attribute paths.
    Persistent,
    /// Multi-dimensional index with a mandatory equality-only prefix: every
    /// prefix field needs an equality constraint before the range-capable
    /// portion becomes usable.
    MdiPrefixed,
    /// `_from`/`_to` adjacency index on edge collections.
    Edge,
    /// Geo index (flat or GeoJSON coordinates).
    Geo,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Primary => "primary",
            IndexType::Persistent => "persistent",
            IndexType::MdiPrefixed => "mdi-prefixed",
            IndexType::Edge => "edge",
            IndexType::Geo => "geo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "geoJson")]
    pub geo_json: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde(rename = "prefixFields")]
    pub prefix_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde(rename = "storedValues")]
    pub stored_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "fieldValueTypes")]
    pub field_value_types: Option<String>,
    /// Fraction of distinct values, used for index-selection tie breaking.
    #[serde(default = "default_selectivity", rename = "selectivityEstimate")]
    pub selectivity: f64,
}

fn default_selectivity() -> f64 {
    0.5
}

impl IndexDescriptor {
    pub fn primary() -> Self {
        Self {
            id: "0".to_string(),
            name: "primary".to_string(),
            index_type: IndexType::Primary,
            fields: vec!["_key".to_string()],
            unique: true,
            sparse: false,
            geo_json: None,
            prefix_fields: Vec::new(),
            stored_values: Vec::new(),
            field_value_types: None,
            selectivity: 1.0,
        }
    }

    pub fn edge() -> Self {
        Self {
            id: "1".to_string(),
            name: "edge".to_string(),
            index_type: IndexType::Edge,
            fields: vec!["_from".to_string(), "_to".to_string()],
            unique: false,
            sparse: false,
            geo_json: None,
            prefix_fields: Vec::new(),
            stored_values: Vec::new(),
            field_value_types: None,
            selectivity: 0.9,
        }
    }

    /// Duplicate detection key: order-sensitive on type, fields and prefix
    /// fields; everything else (sparse, storedValues, name) does not make a
    /// different index.
    pub fn semantic_key(&self) -> (IndexType, &[String], &[String]) {
        (self.index_type, &self.fields, &self.prefix_fields)
    }

    /// All attribute paths whose values the index can return without
    /// fetching the document: indexed fields, prefix fields and stored
    /// values.
    pub fn covered_fields(&self) -> Vec<String> {
        let mut covered: Vec<String> = Vec::new();
        for field in self
            .prefix_fields
            .iter()
            .chain(self.fields.iter())
            .chain(self.stored_values.iter())
        {
            if !covered.contains(field) {
                covered.push(field.clone());
            }
        }
        covered
    }

    /// Whether the index can produce every path in `paths` by itself.
    pub fn covers(&self, paths: &[String]) -> bool {
        let covered = self.covered_fields();
        paths.iter().all(|p| covered.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persistent(fields: &[&str]) -> IndexDescriptor {
        IndexDescriptor {
            id: "2".into(),
            name: "idx".into(),
            index_type: IndexType::Persistent,
            fields: fields.iter().map(|s| s.to_string()).collect(),
            unique: false,
            sparse: false,
            geo_json: None,
            prefix_fields: Vec::new(),
            stored_values: Vec::new(),
            field_value_types: None,
            selectivity: 0.5,
        }
    }

    #[test]
    fn test_semantic_key_is_order_sensitive() {
        let a = persistent(&["a", "b"]);
        let b = persistent(&["b", "a"]);
        assert_ne!(a.semantic_key(), b.semantic_key());
    }

    #[test]
    fn test_covering_includes_stored_values_and_prefix() {
        let mut idx = persistent(&["value"]);
        idx.prefix_fields = vec!["tenant".into()];
        idx.stored_values = vec!["extra".into()];
        assert!(idx.covers(&["value".into(), "tenant".into(), "extra".into()]));
        assert!(!idx.covers(&["other".into()]));
    }
}
