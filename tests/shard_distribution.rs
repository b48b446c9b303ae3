//! distributeShardsLike: the shard-for-shard mirroring invariant, checked
//! per rank-ordered shard pair on leader identity and follower-set
//! equality, before and after failover.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use corvusdb::agency::LocalAgency;
use corvusdb::catalog::{CollectionOptions, Database};
use corvusdb::cluster::{strip_resigned, ClusterCoordinator};

fn coordinator(servers: usize) -> Arc<ClusterCoordinator> {
    let agency = Arc::new(LocalAgency::single());
    let coordinator = ClusterCoordinator::new(agency.client());
    for i in 1..=servers {
        coordinator
            .register_server(&format!("PRMR-{}", i), &format!("DBServer{:04}", i))
            .unwrap();
    }
    coordinator
}

fn wait_for<F: Fn() -> bool>(what: &str, f: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !f() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// The canonical cross-check: per rank-ordered shard pair, same leader and
/// equal follower sets.
fn assert_mirrored(coordinator: &ClusterCoordinator, a: &str, b: &str) {
    let (plan_a, current_a) = coordinator.collection_distribution("_system", a).unwrap();
    let (plan_b, current_b) = coordinator.collection_distribution("_system", b).unwrap();
    assert_eq!(plan_a.len(), plan_b.len());
    for ((shard_a, assign_a), (shard_b, assign_b)) in plan_a.iter().zip(plan_b.iter()) {
        assert_eq!(shard_a, shard_b);
        assert!(
            assign_a.mirrors(assign_b),
            "plan diverged at {}: {:?} vs {:?}",
            shard_a,
            assign_a,
            assign_b
        );
    }
    for ((shard_a, assign_a), (_, assign_b)) in current_a.iter().zip(current_b.iter()) {
        assert!(
            assign_a.mirrors(assign_b),
            "current diverged at {}",
            shard_a
        );
    }
}

#[test]
fn test_mirror_holds_immediately_after_creation() {
    let coordinator = coordinator(3);
    coordinator
        .create_collection("_system", "proto", 8, 2, None)
        .unwrap();
    coordinator
        .create_collection("_system", "mirror", 8, 2, Some("proto"))
        .unwrap();
    assert_mirrored(&coordinator, "proto", "mirror");
}

#[test]
fn test_mirror_holds_after_cleanout_failover() {
    let coordinator = coordinator(3);
    coordinator
        .create_collection("_system", "proto", 6, 2, None)
        .unwrap();
    coordinator
        .create_collection("_system", "mirror", 6, 2, Some("proto"))
        .unwrap();

    // force a failover-induced reassignment of the prototype's leaders
    coordinator.clean_out_server("PRMR-1").unwrap();
    wait_for("cleanout", || {
        coordinator
            .cleaned_servers()
            .unwrap()
            .contains(&"PRMR-1".to_string())
    });

    assert_mirrored(&coordinator, "proto", "mirror");
    let (plan, current) = coordinator
        .collection_distribution("_system", "mirror")
        .unwrap();
    for assignment in plan.values().chain(current.values()) {
        assert!(!assignment.holds("PRMR-1"));
    }
}

#[test]
fn test_shard_distribution_wire_shape() {
    let coordinator = coordinator(2);
    coordinator
        .create_collection("_system", "c", 2, 2, None)
        .unwrap();
    let out = coordinator.shard_distribution("_system").unwrap();
    let entry = &out["results"]["c"];
    for side in ["Plan", "Current"] {
        let shards = entry[side].as_object().unwrap();
        assert_eq!(shards.len(), 2);
        for assignment in shards.values() {
            assert!(assignment["leader"].is_string());
            assert!(assignment["followers"].is_array());
        }
    }
}

#[test]
fn test_plan_and_current_may_diverge_on_resignation() {
    // Current is allowed to trail Plan with a resigned-leader marker; the
    // stripped identity comparison still matches
    use corvusdb::cluster::ShardAssignment;
    let resigned = ShardAssignment::new("_PRMR-1", vec!["PRMR-2".into()]);
    let planned = ShardAssignment::new("PRMR-1", vec!["PRMR-2".into()]);
    assert!(resigned.mirrors(&planned));
    assert_eq!(strip_resigned(&resigned.leader), "PRMR-1");
}

#[test]
fn test_catalog_inherits_prototype_shard_count() {
    let db = Database::new("_system");
    db.create_collection("proto", CollectionOptions::with_shards(5)).unwrap();
    let mirror = db
        .create_collection(
            "mirror",
            CollectionOptions {
                number_of_shards: 1,
                distribute_shards_like: Some("proto".into()),
                ..Default::default()
            },
        )
        .unwrap();
    // the shard-for-shard mirror requires identical shard counts
    assert_eq!(mirror.number_of_shards(), 5);
    assert_eq!(mirror.shard_names(), db.collection("proto").unwrap().shard_names());
}
