//! Plan construction.
//!
//! Single pass over the parsed operation pipeline, leaf to root. The
//! builder validates collection references, parses per-operation OPTIONS
//! objects, inserts the Sort a sorted collect needs, wraps multi-shard
//! scans in a Gather, and rejects option combinations that cannot be
//! executed correctly (unsafe `readOwnWrites` on sharded upserts). Index
//! selection and the other rewrites happen afterwards in the optimizer.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::catalog::Database;
use crate::query::ast::*;
use crate::query::errors::{QueryError, QueryResult};
use crate::query::expr::eval;

use super::arena::ExecutionPlan;
use super::node::{CollectMethod, DepthIndex, NodeKind, ScanOptions};

/// Catalog access the builder needs.
pub struct PlanBuildContext<'a> {
    pub database: &'a Database,
}

impl<'a> PlanBuildContext<'a> {
    pub fn new(database: &'a Database) -> Self {
        Self { database }
    }

    fn shards_of(&self, collection: &str) -> QueryResult<usize> {
        Ok(self.collection(collection)?.number_of_shards())
    }

    fn collection(&self, name: &str) -> QueryResult<std::sync::Arc<crate::catalog::Collection>> {
        self.database
            .collection(name)
            .map_err(|_| QueryError::collection_not_found(name))
    }
}

pub fn build_plan(query: &ParsedQuery, ctx: &PlanBuildContext) -> QueryResult<ExecutionPlan> {
    let mut plan = ExecutionPlan::new();
    for op in &query.operations {
        append_operation(&mut plan, op, ctx)?;
    }
    if let Err(variable) = plan.check_variable_flow() {
        return Err(QueryError::parse(format!(
            "unknown variable '{}'",
            variable
        )));
    }
    Ok(plan)
}

fn append_operation(
    plan: &mut ExecutionPlan,
    op: &Operation,
    ctx: &PlanBuildContext,
) -> QueryResult<()> {
    match op {
        Operation::For(for_op) => match &for_op.source {
            ForSource::Collection(name) => {
                let shards = ctx.shards_of(name)?;
                let options = scan_options(&for_op.options, ctx)?;
                if options.force_index_hint && options.index_hint.is_none() {
                    return Err(QueryError::invalid_options(
                        "forceIndexHint requires indexHint",
                    ));
                }
                let scan = plan.push_root(NodeKind::EnumerateCollection {
                    collection: name.clone(),
                    variable: for_op.variable.clone(),
                    options,
                });
                if shards > 1 {
                    plan.insert_above(
                        scan,
                        NodeKind::Gather {
                            sort_elements: Vec::new(),
                            parallel: false,
                        },
                    );
                }
            }
            ForSource::Expression(expr) => {
                plan.push_root(NodeKind::EnumerateList {
                    variable: for_op.variable.clone(),
                    expression: expr.clone(),
                });
            }
        },
        Operation::Traversal(t) => {
            for edge_collection in &t.edge_collections {
                ctx.collection(edge_collection)?;
            }
            let depth_indexes = traversal_depth_indexes(t, ctx)?;
            plan.push_root(NodeKind::Traversal {
                op: t.clone(),
                depth_indexes,
            });
        }
        Operation::PathSearch(p) => {
            for edge_collection in &p.edge_collections {
                ctx.collection(edge_collection)?;
            }
            plan.push_root(NodeKind::PathSearch { op: p.clone() });
        }
        Operation::Let(l) => {
            plan.push_root(NodeKind::Calculation {
                variable: l.variable.clone(),
                expression: l.value.clone(),
            });
        }
        Operation::Filter(expr) => {
            plan.push_root(NodeKind::Filter {
                expression: expr.clone(),
            });
        }
        Operation::Sort(elements) => {
            plan.push_root(NodeKind::Sort {
                elements: elements.clone(),
            });
        }
        Operation::Limit { offset, count } => {
            plan.push_root(NodeKind::Limit {
                offset: *offset,
                count: *count,
            });
        }
        Operation::Collect(c) => append_collect(plan, c, ctx)?,
        Operation::Return(r) => {
            plan.push_root(NodeKind::Return {
                expression: r.expr.clone(),
                distinct: r.distinct,
            });
        }
        Operation::Insert(i) => {
            let collection = ctx.collection(&i.collection)?;
            check_insert_key(&i.document, collection.options().sharded_by_key())?;
            plan.push_root(NodeKind::Insert {
                collection: i.collection.clone(),
                document: i.document.clone(),
            });
        }
        Operation::Upsert(u) => append_upsert(plan, u, ctx)?,
    }
    Ok(())
}

fn append_collect(
    plan: &mut ExecutionPlan,
    c: &CollectOp,
    ctx: &PlanBuildContext,
) -> QueryResult<()> {
    let options = constant_object(&c.options, ctx)?;
    let requested_method = options
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);

    let method = if c.groups.is_empty() && c.with_count_into.is_some() {
        // total count needs no key ordering, so never a sort
        CollectMethod::Count
    } else if requested_method.as_deref() == Some("hash") {
        CollectMethod::Hash
    } else {
        CollectMethod::Sorted
    };

    if method == CollectMethod::Sorted && !c.groups.is_empty() {
        let elements = c
            .groups
            .iter()
            .map(|(_, expr)| SortElement {
                expr: expr.clone(),
                ascending: true,
            })
            .collect();
        plan.push_root(NodeKind::Sort { elements });
    }

    plan.push_root(NodeKind::Collect {
        groups: c.groups.clone(),
        aggregates: c.aggregates.clone(),
        into: c.into.clone(),
        with_count_into: c.with_count_into.clone(),
        method,
    });
    Ok(())
}

fn append_upsert(
    plan: &mut ExecutionPlan,
    u: &UpsertOp,
    ctx: &PlanBuildContext,
) -> QueryResult<()> {
    let collection = ctx.collection(&u.collection)?;
    let collection_options = collection.options().clone();
    let options = constant_object(&u.options, ctx)?;
    let read_own_writes = options
        .get("readOwnWrites")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !collection_options.sharded_by_key() {
        check_insert_key(&u.insert, false)?;
    }

    // cross-shard read-your-write ordering cannot be guaranteed; accept the
    // combination only when execution is confined to one shard
    if read_own_writes
        && collection.number_of_shards() > 1
        && !search_confined_to_one_shard(&u.search, collection_options.sharded_by())
    {
        return Err(QueryError::invalid_options(
            "readOwnWrites on a sharded collection requires the search \
             condition to pin a single shard",
        ));
    }

    plan.push_root(NodeKind::Upsert {
        collection: u.collection.clone(),
        search: u.search.clone(),
        insert: u.insert.clone(),
        update: u.update.clone(),
        replace: u.replace,
        read_own_writes,
    });
    Ok(())
}

/// An explicit `_key` in an insert document is only legal when the target
/// collection is sharded by `_key`. Detectable at plan time for object
/// literals.
fn check_insert_key(document: &Expr, sharded_by_key: bool) -> QueryResult<()> {
    if sharded_by_key {
        return Ok(());
    }
    if let Expr::Object(entries) = document {
        for (key, _) in entries {
            if matches!(key, ObjectKey::Literal(name) if name == "_key") {
                return Err(QueryError::new(
                    crate::errors::ErrorCode::ClusterMustNotSpecifyKey,
                    "must not specify _key for this collection",
                ));
            }
        }
    }
    Ok(())
}

/// The search expression pins one shard when it is an object literal giving
/// a constant value for every shard-key field.
fn search_confined_to_one_shard(search: &Expr, shard_keys: &[String]) -> bool {
    let Expr::Object(entries) = search else {
        return false;
    };
    shard_keys.iter().all(|field| {
        entries.iter().any(|(key, value)| {
            matches!(key, ObjectKey::Literal(name) if name == field) && value.is_constant()
        })
    })
}

/// Per-depth index choice for a traversal: the edge index by default, a
/// hinted index (validated to exist on every edge collection) where the
/// OPTIONS object names one for a depth level.
fn traversal_depth_indexes(
    t: &TraversalOp,
    ctx: &PlanBuildContext,
) -> QueryResult<Vec<DepthIndex>> {
    let options = constant_object(&t.options, ctx)?;
    let hints = options.get("indexHint").and_then(Value::as_object);

    let mut out = Vec::new();
    for depth in t.min_depth..=t.max_depth {
        let hinted = hints
            .and_then(|h| h.get(&depth.to_string()))
            .and_then(Value::as_str);
        let index_name = match hinted {
            Some(name) => {
                for edge_collection in &t.edge_collections {
                    let collection = ctx.collection(edge_collection)?;
                    if collection.indexes().by_name(name).is_none() {
                        return Err(QueryError::new(
                            crate::errors::ErrorCode::QueryForcedIndexHintUnusable,
                            format!(
                                "hinted index '{}' does not exist on collection '{}'",
                                name, edge_collection
                            ),
                        ));
                    }
                }
                name.to_string()
            }
            None => "edge".to_string(),
        };
        out.push(DepthIndex { depth, index_name });
    }
    Ok(out)
}

/// Parses a scan OPTIONS object.
fn scan_options(options: &Option<Expr>, ctx: &PlanBuildContext) -> QueryResult<ScanOptions> {
    let map = constant_object(options, ctx)?;
    Ok(ScanOptions {
        projections: Vec::new(),
        read_own_writes: map
            .get("readOwnWrites")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        index_hint: map
            .get("indexHint")
            .and_then(Value::as_str)
            .map(str::to_string),
        force_index_hint: map
            .get("forceIndexHint")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Evaluates an OPTIONS expression down to a constant object. Bind
/// substitution has already run, so anything non-constant is a query error.
fn constant_object(
    options: &Option<Expr>,
    _ctx: &PlanBuildContext,
) -> QueryResult<Map<String, Value>> {
    let Some(expr) = options else {
        return Ok(Map::new());
    };
    let vars: HashMap<String, Value> = HashMap::new();
    match eval(expr, &vars) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(QueryError::invalid_options("OPTIONS must be an object")),
        Err(_) => Err(QueryError::invalid_options(
            "OPTIONS must be a constant object",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionOptions, Database};
    use crate::query::parse_query;

    fn database() -> Database {
        let db = Database::new("_system");
        db.create_collection("users", CollectionOptions::default()).unwrap();
        db.create_collection("sharded", CollectionOptions::with_shards(3)).unwrap();
        db.create_collection(
            "by_region",
            CollectionOptions {
                number_of_shards: 3,
                shard_keys: vec!["region".into()],
                ..Default::default()
            },
        )
        .unwrap();
        db.create_collection("edges", CollectionOptions::edge()).unwrap();
        db
    }

    fn build(db: &Database, text: &str) -> QueryResult<ExecutionPlan> {
        let query = parse_query(text)?;
        build_plan(&query, &PlanBuildContext::new(db))
    }

    #[test]
    fn test_single_shard_scan_has_no_gather() {
        let db = database();
        let plan = build(&db, "FOR d IN users RETURN d").unwrap();
        assert!(!plan.contains(|k| matches!(k, NodeKind::Gather { .. })));
    }

    #[test]
    fn test_multi_shard_scan_gets_gather() {
        let db = database();
        let plan = build(&db, "FOR d IN sharded RETURN d").unwrap();
        assert!(plan.contains(|k| matches!(k, NodeKind::Gather { .. })));
    }

    #[test]
    fn test_unknown_collection_rejected() {
        let db = database();
        let err = build(&db, "FOR d IN missing RETURN d").unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::DataSourceNotFound);
    }

    #[test]
    fn test_grouped_collect_gets_sort() {
        let db = database();
        let plan = build(
            &db,
            "FOR d IN users COLLECT g = d.group WITH COUNT INTO n RETURN [g, n]",
        )
        .unwrap();
        assert!(plan.contains(|k| matches!(k, NodeKind::Sort { .. })));
        let collect = plan.find(|k| matches!(k, NodeKind::Collect { .. })).unwrap();
        match &plan.node(collect).kind {
            NodeKind::Collect { method, .. } => assert_eq!(*method, CollectMethod::Sorted),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_total_count_collect_has_no_sort() {
        let db = database();
        let plan = build(&db, "FOR d IN users COLLECT WITH COUNT INTO n RETURN n").unwrap();
        assert!(!plan.contains(|k| matches!(k, NodeKind::Sort { .. })));
        let collect = plan.find(|k| matches!(k, NodeKind::Collect { .. })).unwrap();
        match &plan.node(collect).kind {
            NodeKind::Collect { method, .. } => assert_eq!(*method, CollectMethod::Count),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_hash_method_requested_skips_sort() {
        let db = database();
        let plan = build(
            &db,
            "FOR d IN users COLLECT g = d.group WITH COUNT INTO n OPTIONS {method: 'hash'} RETURN [g, n]",
        )
        .unwrap();
        assert!(!plan.contains(|k| matches!(k, NodeKind::Sort { .. })));
    }

    #[test]
    fn test_upsert_read_own_writes_rejected_on_sharded_collection() {
        let db = database();
        let err = build(
            &db,
            "UPSERT {value: 1} INSERT {value: 1, count: 1} UPDATE {count: OLD.count + 1} \
             IN sharded OPTIONS {readOwnWrites: true}",
        )
        .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::QueryInvalidOptionsAttribute);
    }

    #[test]
    fn test_upsert_read_own_writes_allowed_when_search_pins_shard() {
        let db = database();
        // the search fixes every shard-key field, so one shard serves it
        let plan = build(
            &db,
            "UPSERT {region: 'eu'} INSERT {region: 'eu', count: 1} \
             UPDATE {count: OLD.count + 1} IN by_region OPTIONS {readOwnWrites: true}",
        );
        assert!(plan.is_ok());
    }

    #[test]
    fn test_upsert_insert_key_rejected_on_custom_sharding() {
        let db = database();
        let err = build(
            &db,
            "UPSERT {region: 'eu'} INSERT {_key: 'k', region: 'eu'} \
             UPDATE {} IN by_region",
        )
        .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::ClusterMustNotSpecifyKey);
    }

    #[test]
    fn test_traversal_depth_indexes_default_to_edge() {
        let db = database();
        let plan = build(&db, "FOR v IN 1..3 OUTBOUND 'users/a' edges RETURN v").unwrap();
        let node = plan.find(|k| matches!(k, NodeKind::Traversal { .. })).unwrap();
        match &plan.node(node).kind {
            NodeKind::Traversal { depth_indexes, .. } => {
                assert_eq!(depth_indexes.len(), 3);
                assert!(depth_indexes.iter().all(|d| d.index_name == "edge"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_force_index_hint_without_hint_rejected() {
        let db = database();
        let err = build(
            &db,
            "FOR d IN users OPTIONS {forceIndexHint: true} RETURN d",
        )
        .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::QueryInvalidOptionsAttribute);
    }
}
