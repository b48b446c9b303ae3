//! UPSERT: readOwnWrites visibility semantics and the sharding-constraint
//! errors.

use std::sync::Arc;

use corvusdb::catalog::{CollectionOptions, Database};
use corvusdb::exec::{QueryEngine, QueryOptions};
use serde_json::{json, Map, Value};

fn engine() -> QueryEngine {
    let db = Database::new("_system");
    db.create_collection("single", CollectionOptions::default()).unwrap();
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
    QueryEngine::new(Arc::new(db))
}

fn run(engine: &QueryEngine, query: &str) -> Result<Vec<Value>, corvusdb::query::QueryError> {
    engine
        .execute(query, &Map::new(), &QueryOptions::default())
        .map(|r| r.result)
}

#[test]
fn test_read_own_writes_accumulates_one_counter() {
    let engine = engine();
    run(
        &engine,
        "FOR i IN 1..10 \
         UPSERT {name: 'counter'} \
         INSERT {name: 'counter', count: 1} \
         UPDATE {count: OLD.count + 1} \
         IN single OPTIONS {readOwnWrites: true}",
    )
    .unwrap();

    let docs = run(&engine, "FOR d IN single RETURN d.count").unwrap();
    // every iteration saw the previous one's write
    assert_eq!(docs, vec![json!(10)]);
}

#[test]
fn test_snapshot_reads_produce_independent_inserts() {
    let engine = engine();
    run(
        &engine,
        "FOR i IN 1..10 \
         UPSERT {name: 'counter'} \
         INSERT {name: 'counter', count: 1} \
         UPDATE {count: OLD.count + 1} \
         IN single OPTIONS {readOwnWrites: false}",
    )
    .unwrap();

    let docs = run(&engine, "FOR d IN single RETURN d.count").unwrap();
    // every iteration read the pre-statement snapshot and inserted
    assert_eq!(docs.len(), 10);
    assert!(docs.iter().all(|c| *c == json!(1)));
}

#[test]
fn test_upsert_updates_existing_document() {
    let engine = engine();
    run(&engine, "INSERT {_key: 'x', name: 'a', seen: 1} IN single").unwrap();
    let result = run(
        &engine,
        "UPSERT {name: 'a'} INSERT {name: 'a', seen: 1} \
         UPDATE {seen: OLD.seen + 1} IN single RETURN [OLD.seen, NEW.seen]",
    )
    .unwrap();
    assert_eq!(result, vec![json!([1, 2])]);
}

#[test]
fn test_upsert_replace_swaps_whole_document() {
    let engine = engine();
    run(&engine, "INSERT {_key: 'x', name: 'a', extra: true} IN single").unwrap();
    run(
        &engine,
        "UPSERT {name: 'a'} INSERT {name: 'a'} REPLACE {name: 'a', fresh: 1} IN single",
    )
    .unwrap();
    let doc = run(&engine, "FOR d IN single RETURN d").unwrap();
    assert_eq!(doc[0]["fresh"], 1);
    assert!(doc[0].get("extra").is_none());
}

#[test]
fn test_read_own_writes_rejected_on_unpinned_sharded_upsert() {
    let engine = engine();
    let err = run(
        &engine,
        "UPSERT {value: 1} INSERT {value: 1, count: 1} \
         UPDATE {count: OLD.count + 1} IN sharded OPTIONS {readOwnWrites: true}",
    )
    .unwrap_err();
    // cross-shard read-your-write ordering cannot be guaranteed
    assert_eq!(err.num(), 1548);
}

#[test]
fn test_read_own_writes_allowed_when_search_pins_one_shard() {
    let engine = engine();
    run(
        &engine,
        "FOR i IN 1..5 \
         UPSERT {region: 'eu'} \
         INSERT {region: 'eu', count: 1} \
         UPDATE {count: OLD.count + 1} \
         IN by_region OPTIONS {readOwnWrites: true}",
    )
    .unwrap();
    let docs = run(&engine, "FOR d IN by_region RETURN d.count").unwrap();
    assert_eq!(docs, vec![json!(5)]);
}

#[test]
fn test_explicit_key_in_insert_branch_rejected() {
    let engine = engine();
    let err = run(
        &engine,
        "UPSERT {region: 'eu'} INSERT {_key: 'k', region: 'eu'} \
         UPDATE {} IN by_region",
    )
    .unwrap_err();
    assert_eq!(err.num(), 1466);
}

#[test]
fn test_changing_shard_key_value_rejected() {
    let engine = engine();
    run(&engine, "INSERT {region: 'eu', count: 1} IN by_region").unwrap();
    let err = run(
        &engine,
        "UPSERT {region: 'eu'} INSERT {region: 'eu'} \
         UPDATE {region: 'us'} IN by_region",
    )
    .unwrap_err();
    assert_eq!(err.num(), 1464);
}

#[test]
fn test_keeping_shard_key_value_is_fine() {
    let engine = engine();
    run(&engine, "INSERT {region: 'eu', count: 1} IN by_region").unwrap();
    run(
        &engine,
        "UPSERT {region: 'eu'} INSERT {region: 'eu'} \
         UPDATE {region: 'eu', count: 2} IN by_region",
    )
    .unwrap();
    let docs = run(&engine, "FOR d IN by_region RETURN d.count").unwrap();
    assert_eq!(docs, vec![json!(2)]);
}

#[test]
fn test_parallel_gather_surfaces_same_error_as_serial() {
    let engine = engine();
    for i in 0..30 {
        run(
            &engine,
            &format!("INSERT {{v: {}, region: 'r{}'}} IN by_region", i, i % 3),
        )
        .unwrap();
    }
    // the UPSERT raises a sharding error; forcing the gather rule on or
    // off must not change which error surfaces
    let query = "FOR d IN by_region \
                 UPSERT {region: d.region} INSERT {region: d.region} \
                 UPDATE {region: 'moved'} IN by_region RETURN NEW";
    let serial = engine
        .execute(
            query,
            &Map::new(),
            &QueryOptions {
                optimizer_rules: vec!["-parallelize-gather".into()],
            },
        )
        .unwrap_err();
    let parallel = engine
        .execute(
            query,
            &Map::new(),
            &QueryOptions {
                optimizer_rules: vec!["+parallelize-gather".into()],
            },
        )
        .unwrap_err();
    assert_eq!(serial.num(), parallel.num());
    assert_eq!(serial.num(), 1464);
}
