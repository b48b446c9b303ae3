//! Graph traversal and the shortest-path family: depth ranges, endpoint
//! typing rules, warnings for empty-string vertices.

use std::sync::Arc;

use corvusdb::catalog::{CollectionOptions, Database};
use corvusdb::exec::{QueryEngine, QueryOptions};
use corvusdb::query::parse_query;
use serde_json::{json, Map, Value};

/// a -> b -> c -> d, plus a shortcut a -> c.
fn engine() -> QueryEngine {
    let db = Database::new("_system");
    let v = db.create_collection("v", CollectionOptions::default()).unwrap();
    let e = db.create_collection("e", CollectionOptions::edge()).unwrap();
    for key in ["a", "b", "c", "d"] {
        v.insert(json!({"_key": key, "name": key})).unwrap();
    }
    for (from, to) in [("a", "b"), ("b", "c"), ("c", "d"), ("a", "c")] {
        e.insert(json!({
            "_key": format!("{}{}", from, to),
            "_from": format!("v/{}", from),
            "_to": format!("v/{}", to),
        }))
        .unwrap();
    }
    QueryEngine::new(Arc::new(db))
}

fn run(engine: &QueryEngine, query: &str) -> corvusdb::exec::QueryResultSet {
    engine
        .execute(query, &Map::new(), &QueryOptions::default())
        .unwrap()
}

fn names(result: &[Value]) -> Vec<String> {
    let mut out: Vec<String> = result
        .iter()
        .map(|v| v["name"].as_str().unwrap_or("?").to_string())
        .collect();
    out.sort();
    out
}

#[test]
fn test_outbound_depth_one() {
    let engine = engine();
    let out = run(&engine, "FOR w IN 1..1 OUTBOUND 'v/a' e RETURN w");
    assert_eq!(names(&out.result), vec!["b", "c"]);
}

#[test]
fn test_outbound_depth_range() {
    let engine = engine();
    let out = run(&engine, "FOR w IN 1..3 OUTBOUND 'v/a' e RETURN w.name");
    // b, then c twice (via b and directly), then d twice
    let mut result: Vec<&str> = out.result.iter().filter_map(Value::as_str).collect();
    result.sort();
    assert_eq!(result, vec!["b", "c", "c", "d", "d"]);
}

#[test]
fn test_min_depth_zero_emits_start() {
    let engine = engine();
    let out = run(&engine, "FOR w IN 0..1 OUTBOUND 'v/a' e RETURN w.name");
    assert!(out.result.iter().any(|n| n == "a"));
}

#[test]
fn test_inbound_and_any_direction() {
    let engine = engine();
    let out = run(&engine, "FOR w IN 1..1 INBOUND 'v/c' e RETURN w");
    assert_eq!(names(&out.result), vec!["a", "b"]);

    let out = run(&engine, "FOR w IN 1..1 ANY 'v/c' e RETURN w");
    assert_eq!(names(&out.result), vec!["a", "b", "d"]);
}

#[test]
fn test_edge_and_path_bindings() {
    let engine = engine();
    let out = run(
        &engine,
        "FOR w, edge, path IN 1..2 OUTBOUND 'v/a' e \
         FILTER w._key == 'c' RETURN {edge: edge._key, hops: LENGTH(path.edges)}",
    );
    // c is reachable directly (1 hop) and through b (2 hops)
    assert_eq!(out.result.len(), 2);
    let mut hops: Vec<i64> = out
        .result
        .iter()
        .map(|r| r["hops"].as_i64().unwrap())
        .collect();
    hops.sort();
    assert_eq!(hops, vec![1, 2]);
}

#[test]
fn test_empty_string_start_warns_and_returns_nothing() {
    let engine = engine();
    let out = run(&engine, "FOR w IN 1..2 OUTBOUND '' e RETURN w");
    // runs to completion: zero rows plus a warning, not an abort
    assert!(out.result.is_empty());
    assert_eq!(out.warnings.len(), 1);
    assert_eq!(out.warnings[0].code, 1524);
}

#[test]
fn test_non_string_start_is_a_parse_error() {
    for query in [
        "FOR w IN 1..2 OUTBOUND null e RETURN w",
        "FOR w IN 1..2 OUTBOUND 17 e RETURN w",
        "FOR w IN OUTBOUND SHORTEST_PATH null TO 'v/d' e RETURN w",
        "FOR w IN OUTBOUND SHORTEST_PATH 'v/a' TO 3 e RETURN w",
    ] {
        let err = parse_query(query).unwrap_err();
        assert_eq!(err.num(), 1501, "{} must fail at parse time", query);
    }
}

#[test]
fn test_destructuring_rejected_on_graph_forms() {
    for query in [
        "FOR [a, b] IN 1..2 OUTBOUND 'v/a' e RETURN a",
        "FOR {v} IN 1..2 OUTBOUND 'v/a' e RETURN v",
        "FOR [p] IN OUTBOUND SHORTEST_PATH 'v/a' TO 'v/d' e RETURN p",
    ] {
        let err = parse_query(query).unwrap_err();
        assert_eq!(err.num(), 1501, "{} must fail at parse time", query);
    }
}

#[test]
fn test_shortest_path_emits_vertices_along_path() {
    let engine = engine();
    let out = run(
        &engine,
        "FOR w IN OUTBOUND SHORTEST_PATH 'v/a' TO 'v/d' e RETURN w.name",
    );
    // a -> c -> d beats a -> b -> c -> d
    assert_eq!(out.result, vec![json!("a"), json!("c"), json!("d")]);
}

#[test]
fn test_k_shortest_paths_orders_by_length() {
    let engine = engine();
    let out = run(
        &engine,
        "FOR p IN OUTBOUND K_SHORTEST_PATHS 'v/a' TO 'v/d' e LIMIT 2 RETURN p.weight",
    );
    assert_eq!(out.result, vec![json!(2), json!(3)]);
}

#[test]
fn test_all_shortest_paths_only_minimal() {
    let engine = engine();
    let out = run(
        &engine,
        "FOR p IN OUTBOUND ALL_SHORTEST_PATHS 'v/a' TO 'v/c' e RETURN p",
    );
    // one direct edge; the two-hop route is longer and must not appear
    assert_eq!(out.result.len(), 1);
    assert_eq!(out.result[0]["weight"], 1);
}

#[test]
fn test_unreachable_target_yields_no_rows() {
    let engine = engine();
    let out = run(
        &engine,
        "FOR w IN OUTBOUND SHORTEST_PATH 'v/d' TO 'v/a' e RETURN w",
    );
    assert!(out.result.is_empty());
    assert!(out.warnings.is_empty());
}
