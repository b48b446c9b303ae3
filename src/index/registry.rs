//! Per-collection index registry with idempotent `ensure_index`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde_json::{Map, Value};

use super::descriptor::{IndexDescriptor, IndexType};
use super::{IndexError, IndexResult};

fn string_array(value: Option<&Value>) -> Option<Vec<String>> {
    let array = value?.as_array()?;
    Some(
        array
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

#[derive(Debug, Clone)]
pub struct EnsureIndexOutcome {
    pub descriptor: IndexDescriptor,
    pub is_newly_created: bool,
}

pub struct IndexRegistry {
    indexes: RwLock<Vec<IndexDescriptor>>,
    next_id: AtomicU64,
}

impl IndexRegistry {
    /// A registry for a document collection (primary index only).
    pub fn for_documents() -> Self {
        Self {
            indexes: RwLock::new(vec![IndexDescriptor::primary()]),
            next_id: AtomicU64::new(2),
        }
    }

    /// A registry for an edge collection (primary + edge index).
    pub fn for_edges() -> Self {
        Self {
            indexes: RwLock::new(vec![IndexDescriptor::primary(), IndexDescriptor::edge()]),
            next_id: AtomicU64::new(2),
        }
    }

    /// Creates the described index, or returns the existing one when an
    /// index with the same `{type, fields, prefixFields}` already exists.
    pub fn ensure_index(&self, definition: &Map<String, Value>) -> IndexResult<EnsureIndexOutcome> {
        let candidate = Self::parse_definition(definition)?;

        let mut indexes = self.indexes.write().expect("index registry poisoned");
        if let Some(existing) = indexes
            .iter()
            .find(|idx| idx.semantic_key() == candidate.semantic_key())
        {
            return Ok(EnsureIndexOutcome {
                descriptor: existing.clone(),
                is_newly_created: false,
            });
        }

        let mut descriptor = candidate;
        descriptor.id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        if descriptor.name.is_empty() {
            descriptor.name = format!("idx_{}", descriptor.id);
        }
        indexes.push(descriptor.clone());
        Ok(EnsureIndexOutcome {
            descriptor,
            is_newly_created: true,
        })
    }

    fn parse_definition(definition: &Map<String, Value>) -> IndexResult<IndexDescriptor> {
        let index_type = match definition.get("type").and_then(Value::as_str) {
            Some("persistent") | Some("hash") | Some("skiplist") => IndexType::Persistent,
            Some("mdi-prefixed") => IndexType::MdiPrefixed,
            Some("geo") => IndexType::Geo,
            Some(other) => {
                return Err(IndexError::InvalidDefinition(format!(
                    "unsupported index type '{}'",
                    other
                )))
            }
            None => {
                return Err(IndexError::InvalidDefinition(
                    "missing index type".to_string(),
                ))
            }
        };

        let fields = string_array(definition.get("fields"))
            .ok_or_else(|| IndexError::InvalidDefinition("missing fields".to_string()))?;
        if fields.is_empty() {
            return Err(IndexError::InvalidDefinition("empty fields".to_string()));
        }
        let prefix_fields = string_array(definition.get("prefixFields")).unwrap_or_default();
        if index_type == IndexType::MdiPrefixed && prefix_fields.is_empty() {
            return Err(IndexError::InvalidDefinition(
                "mdi-prefixed index requires prefixFields".to_string(),
            ));
        }
        let stored_values = string_array(definition.get("storedValues")).unwrap_or_default();

        Ok(IndexDescriptor {
            id: String::new(),
            name: definition
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            index_type,
            fields,
            unique: definition
                .get("unique")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            sparse: definition
                .get("sparse")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            geo_json: definition.get("geoJson").and_then(Value::as_bool),
            prefix_fields,
            stored_values,
            field_value_types: definition
                .get("fieldValueTypes")
                .and_then(Value::as_str)
                .map(String::from),
            selectivity: definition
                .get("selectivityEstimate")
                .and_then(Value::as_f64)
                .unwrap_or(0.5),
        })
    }

    pub fn all(&self) -> Vec<IndexDescriptor> {
        self.indexes.read().expect("index registry poisoned").clone()
    }

    pub fn by_name(&self, name: &str) -> Option<IndexDescriptor> {
        self.indexes
            .read()
            .expect("index registry poisoned")
            .iter()
            .find(|idx| idx.name == name || idx.id == name)
            .cloned()
    }

    pub fn drop_index(&self, name: &str) -> IndexResult<()> {
        let mut indexes = self.indexes.write().expect("index registry poisoned");
        let before = indexes.len();
        indexes.retain(|idx| {
            idx.index_type == IndexType::Primary
                || idx.index_type == IndexType::Edge
                || (idx.name != name && idx.id != name)
        });
        if indexes.len() == before {
            return Err(IndexError::NotFound(name.to_string()));
        }
        Ok(())
    }
}
