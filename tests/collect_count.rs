//! COLLECT WITH COUNT over a 1000-row collection: result values plus the
//! SortNode plan contract for the grouped and the key-less forms.

use std::sync::Arc;

use corvusdb::catalog::{CollectionOptions, Database};
use corvusdb::exec::{QueryEngine, QueryOptions};
use serde_json::{json, Map, Value};

/// 1000 documents in 10 equally sized groups.
fn engine() -> QueryEngine {
    let db = Database::new("_system");
    let c = db.create_collection("c", CollectionOptions::default()).unwrap();
    for i in 0..1000 {
        c.insert(json!({
            "_key": format!("k{:04}", i),
            "group": format!("test{}", i % 10),
            "value": i,
        }))
        .unwrap();
    }
    QueryEngine::new(Arc::new(db))
}

fn run(engine: &QueryEngine, query: &str) -> Vec<Value> {
    engine
        .execute(query, &Map::new(), &QueryOptions::default())
        .unwrap()
        .result
}

fn plan_has_sort(engine: &QueryEngine, query: &str) -> bool {
    let out = engine
        .explain(query, &Map::new(), &QueryOptions::default())
        .unwrap();
    out["plan"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|n| n["type"] == "SortNode")
}

#[test]
fn test_grouped_count_yields_ten_rows_of_hundred() {
    let engine = engine();
    let query =
        "FOR i IN c COLLECT class = i.group WITH COUNT INTO count RETURN [class, count]";
    let result = run(&engine, query);
    assert_eq!(result.len(), 10);
    for (i, row) in result.iter().enumerate() {
        // sorted ascending by class, each group the same size
        assert_eq!(row[0], format!("test{}", i));
        assert_eq!(row[1], 100);
    }
    // grouped counting needs its input ordered by the group key
    assert!(plan_has_sort(&engine, query));
}

#[test]
fn test_total_count_single_row_no_sort() {
    let engine = engine();
    let query = "FOR i IN c COLLECT WITH COUNT INTO count RETURN count";
    let result = run(&engine, query);
    assert_eq!(result, vec![json!(1000)]);
    // no grouping key, no ordering requirement, no SortNode
    assert!(!plan_has_sort(&engine, query));
}

#[test]
fn test_hash_method_skips_sort_same_rows() {
    let engine = engine();
    let query = "FOR i IN c COLLECT class = i.group WITH COUNT INTO count \
                 OPTIONS {method: 'hash'} RETURN [class, count]";
    assert!(!plan_has_sort(&engine, query));
    let result = run(&engine, query);
    assert_eq!(result.len(), 10);
    for (i, row) in result.iter().enumerate() {
        assert_eq!(row[0], format!("test{}", i));
        assert_eq!(row[1], 100);
    }
}

#[test]
fn test_collect_method_in_plan() {
    let engine = engine();
    let out = engine
        .explain(
            "FOR i IN c COLLECT WITH COUNT INTO count RETURN count",
            &Map::new(),
            &QueryOptions::default(),
        )
        .unwrap();
    let collect = out["plan"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["type"] == "CollectNode")
        .unwrap();
    assert_eq!(collect["collectOptions"]["method"], "count");
}

#[test]
fn test_aggregates_per_group() {
    let engine = engine();
    let result = run(
        &engine,
        "FOR i IN c COLLECT class = i.group \
         AGGREGATE lo = MIN(i.value), hi = MAX(i.value), total = SUM(i.value) \
         RETURN {class: class, lo: lo, hi: hi, total: total}",
    );
    assert_eq!(result.len(), 10);
    // group "test0" holds 0, 10, ..., 990
    assert_eq!(result[0]["class"], "test0");
    assert_eq!(result[0]["lo"], 0);
    assert_eq!(result[0]["hi"], 990);
    assert_eq!(result[0]["total"], json!(49500));
}

#[test]
fn test_into_collects_group_members() {
    let engine = engine();
    let result = run(
        &engine,
        "FOR i IN c FILTER i.value < 20 COLLECT class = i.group INTO members \
         RETURN {class: class, n: LENGTH(members)}",
    );
    assert_eq!(result.len(), 10);
    for row in &result {
        assert_eq!(row["n"], 2);
    }
}

#[test]
fn test_grouped_count_over_sharded_collection() {
    let db = Database::new("_system");
    let c = db.create_collection("s", CollectionOptions::with_shards(4)).unwrap();
    for i in 0..200 {
        c.insert(json!({"_key": format!("k{}", i), "group": i % 4})).unwrap();
    }
    let engine = QueryEngine::new(Arc::new(db));
    let result = run(
        &engine,
        "FOR i IN s COLLECT class = i.group WITH COUNT INTO count RETURN [class, count]",
    );
    assert_eq!(result.len(), 4);
    for row in &result {
        assert_eq!(row[1], 50);
    }
}
