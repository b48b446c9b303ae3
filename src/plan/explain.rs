//! Plan introspection.
//!
//! Correctness tests assert on plan shape, not just result rows, so every
//! node reports the attributes rewrite rules may have changed: the chosen
//! index, projections, collect method, sort elements, `readOwnWrites`,
//! gather parallelism, per-depth traversal indexes.

use serde_json::{json, Map, Value};

use super::arena::ExecutionPlan;
use super::node::NodeKind;

/// Serializes a plan as `{nodes: [...], rules: [...]}`.
pub fn explain_plan(plan: &ExecutionPlan) -> Value {
    let nodes: Vec<Value> = plan
        .ordered_nodes()
        .into_iter()
        .map(|node| {
            let mut out = Map::new();
            out.insert("id".into(), json!(node.id));
            out.insert("type".into(), json!(node.kind.type_name()));
            out.insert("dependencies".into(), json!(node.dependencies));
            if let Some(variable) = node.kind.output_variable() {
                out.insert("outVariable".into(), json!(variable));
            }
            describe_kind(&node.kind, &mut out);
            Value::Object(out)
        })
        .collect();

    json!({
        "nodes": nodes,
        "rules": plan.applied_rules,
    })
}

fn describe_kind(kind: &NodeKind, out: &mut Map<String, Value>) {
    match kind {
        NodeKind::Singleton => {}
        NodeKind::EnumerateCollection {
            collection,
            options,
            ..
        } => {
            out.insert("collection".into(), json!(collection));
            out.insert("projections".into(), json!(options.projections));
            out.insert("readOwnWrites".into(), json!(options.read_own_writes));
            if let Some(hint) = &options.index_hint {
                out.insert("indexHint".into(), json!(hint));
                out.insert("forceIndexHint".into(), json!(options.force_index_hint));
            }
        }
        NodeKind::IndexScan {
            collection,
            index,
            covering,
            options,
            ..
        } => {
            out.insert("collection".into(), json!(collection));
            out.insert("index".into(), json!({
                "id": index.id,
                "name": index.name,
                "type": index.index_type.as_str(),
                "fields": index.fields,
                "prefixFields": index.prefix_fields,
                "storedValues": index.stored_values,
            }));
            out.insert("indexCoversProjections".into(), json!(covering));
            out.insert("projections".into(), json!(options.projections));
            out.insert("readOwnWrites".into(), json!(options.read_own_writes));
        }
        NodeKind::EnumerateList { .. } => {}
        NodeKind::Filter { .. } => {}
        NodeKind::Calculation { .. } => {}
        NodeKind::Sort { elements } => {
            out.insert("numberOfElements".into(), json!(elements.len()));
            out.insert(
                "ascending".into(),
                json!(elements.iter().map(|e| e.ascending).collect::<Vec<_>>()),
            );
        }
        NodeKind::Limit { offset, count } => {
            out.insert("offset".into(), json!(offset));
            out.insert("limit".into(), json!(count));
        }
        NodeKind::Collect {
            groups,
            aggregates,
            into,
            with_count_into,
            method,
        } => {
            out.insert(
                "collectOptions".into(),
                json!({ "method": method.as_str() }),
            );
            out.insert(
                "groups".into(),
                json!(groups.iter().map(|(name, _)| name).collect::<Vec<_>>()),
            );
            out.insert(
                "aggregates".into(),
                json!(aggregates
                    .iter()
                    .map(|a| json!({"variable": a.variable, "function": a.function}))
                    .collect::<Vec<_>>()),
            );
            if let Some(name) = into {
                out.insert("into".into(), json!(name));
            }
            if let Some(name) = with_count_into {
                out.insert("count".into(), json!(true));
                out.insert("countVariable".into(), json!(name));
            }
        }
        NodeKind::Return { distinct, .. } => {
            out.insert("distinct".into(), json!(distinct));
        }
        NodeKind::Insert { collection, .. } => {
            out.insert("collection".into(), json!(collection));
        }
        NodeKind::Upsert {
            collection,
            replace,
            read_own_writes,
            ..
        } => {
            out.insert("collection".into(), json!(collection));
            out.insert("replace".into(), json!(replace));
            out.insert("readOwnWrites".into(), json!(read_own_writes));
        }
        NodeKind::Traversal { op, depth_indexes } => {
            out.insert("direction".into(), json!(op.direction.as_str()));
            out.insert("minDepth".into(), json!(op.min_depth));
            out.insert("maxDepth".into(), json!(op.max_depth));
            out.insert("edgeCollections".into(), json!(op.edge_collections));
            out.insert(
                "indexes".into(),
                json!({
                    "levels": depth_indexes
                        .iter()
                        .map(|d| (d.depth.to_string(), json!(d.index_name)))
                        .collect::<Map<String, Value>>()
                }),
            );
        }
        NodeKind::PathSearch { op } => {
            out.insert("direction".into(), json!(op.direction.as_str()));
            out.insert("edgeCollections".into(), json!(op.edge_collections));
        }
        NodeKind::Gather {
            sort_elements,
            parallel,
        } => {
            out.insert("parallelism".into(), json!(if *parallel { "parallel" } else { "serial" }));
            out.insert("sortmode".into(), json!(if sort_elements.is_empty() {
                "unset"
            } else {
                "minelement"
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{build_plan, PlanBuildContext};
    use crate::catalog::{CollectionOptions, Database};
    use crate::query::parse_query;

    fn explain(text: &str) -> Value {
        let db = Database::new("_system");
        db.create_collection("c", CollectionOptions::default()).unwrap();
        let query = parse_query(text).unwrap();
        let plan = build_plan(&query, &PlanBuildContext::new(&db)).unwrap();
        explain_plan(&plan)
    }

    #[test]
    fn test_nodes_report_type_and_dependencies() {
        let out = explain("FOR d IN c RETURN d");
        let nodes = out["nodes"].as_array().unwrap();
        let types: Vec<&str> = nodes.iter().map(|n| n["type"].as_str().unwrap()).collect();
        assert_eq!(
            types,
            vec!["SingletonNode", "EnumerateCollectionNode", "ReturnNode"]
        );
        assert_eq!(nodes[1]["dependencies"], json!([0]));
    }

    #[test]
    fn test_collect_reports_method() {
        let out = explain("FOR d IN c COLLECT WITH COUNT INTO n RETURN n");
        let nodes = out["nodes"].as_array().unwrap();
        let collect = nodes
            .iter()
            .find(|n| n["type"] == "CollectNode")
            .unwrap();
        assert_eq!(collect["collectOptions"]["method"], "count");
    }

    #[test]
    fn test_scan_reports_read_own_writes() {
        let out = explain("FOR d IN c OPTIONS {readOwnWrites: true} RETURN d");
        let nodes = out["nodes"].as_array().unwrap();
        let scan = nodes
            .iter()
            .find(|n| n["type"] == "EnumerateCollectionNode")
            .unwrap();
        assert_eq!(scan["readOwnWrites"], true);
    }
}
