//! Rebalance computation.
//!
//! Examines leader/shard count skew across the eligible servers and
//! proposes shard moves. Collections mirroring another via
//! `distributeShardsLike` are never moved directly; they follow their
//! prototype. Proposals only ever target eligible servers (healthy, not
//! cleaned out, not excluded) and each option flag independently gates its
//! move type.

use std::collections::HashMap;

use serde::Deserialize;

use super::distribution::{strip_resigned, ShardMap};
use super::jobs::MoveShardJob;

#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceOptions {
    #[serde(default)]
    pub version: u64,
    #[serde(default, rename = "moveLeaders")]
    pub move_leaders: bool,
    #[serde(default, rename = "moveFollowers")]
    pub move_followers: bool,
    #[serde(default = "default_true", rename = "leaderChanges")]
    pub leader_changes: bool,
    #[serde(default, rename = "databasesExcluded")]
    pub databases_excluded: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for RebalanceOptions {
    fn default() -> Self {
        Self {
            version: 1,
            move_leaders: false,
            move_followers: false,
            leader_changes: true,
            databases_excluded: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RebalancePlan {
    pub moves: Vec<MoveShardJob>,
    pub pending_move_shards: u64,
    pub todo_move_shards: u64,
}

/// One collection's distribution as input to the computation.
#[derive(Debug, Clone)]
pub struct CollectionDistribution {
    pub database: String,
    pub collection: String,
    pub shards: ShardMap,
    /// Set when the collection mirrors a prototype; its shards move with
    /// the prototype, never on their own.
    pub mirrors_prototype: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Load {
    leaders: usize,
    total: usize,
}

/// Proposes moves reducing leader and total shard skew. `eligible` is the
/// set of servers a move may target.
pub fn compute_moves(
    collections: &[CollectionDistribution],
    eligible: &[String],
    options: &RebalanceOptions,
) -> Vec<MoveShardJob> {
    if eligible.len() < 2 {
        return Vec::new();
    }

    let mut loads: HashMap<String, Load> = eligible
        .iter()
        .map(|server| (server.clone(), Load::default()))
        .collect();
    let mut total_leaders = 0usize;
    let mut total_shards = 0usize;
    for collection in collections {
        for assignment in collection.shards.values() {
            let leader = strip_resigned(&assignment.leader).to_string();
            if let Some(load) = loads.get_mut(&leader) {
                load.leaders += 1;
                load.total += 1;
            }
            total_leaders += 1;
            total_shards += 1;
            for follower in &assignment.followers {
                let follower = strip_resigned(follower).to_string();
                if let Some(load) = loads.get_mut(&follower) {
                    load.total += 1;
                }
                total_shards += 1;
            }
        }
    }

    let leader_target = total_leaders.div_ceil(eligible.len());
    let total_target = total_shards.div_ceil(eligible.len());

    let mut sorted: Vec<&CollectionDistribution> = collections
        .iter()
        .filter(|c| !c.mirrors_prototype)
        .filter(|c| !options.databases_excluded.contains(&c.database))
        .collect();
    sorted.sort_by(|a, b| (&a.database, &a.collection).cmp(&(&b.database, &b.collection)));

    let mut moves = Vec::new();
    for collection in sorted {
        for (shard, assignment) in &collection.shards {
            let leader = strip_resigned(&assignment.leader).to_string();
            let leader_overloaded = loads
                .get(&leader)
                .is_some_and(|l| l.leaders > leader_target);

            if leader_overloaded && options.leader_changes {
                // swapping leadership with an existing follower moves no
                // data at all; prefer it when a follower has headroom
                let candidate = assignment
                    .followers
                    .iter()
                    .map(|f| strip_resigned(f).to_string())
                    .filter(|f| {
                        loads
                            .get(f)
                            .is_some_and(|l| l.leaders < leader_target)
                    })
                    .min_by_key(|f| loads[f].leaders);
                if let Some(to) = candidate {
                    record_leader_change(&mut loads, &leader, &to);
                    moves.push(MoveShardJob {
                        database: collection.database.clone(),
                        collection: collection.collection.clone(),
                        shard: shard.clone(),
                        from: leader.clone(),
                        to,
                        is_leader: true,
                    });
                    continue;
                }
            }

            if leader_overloaded && options.move_leaders {
                let candidate = loads
                    .iter()
                    .filter(|(server, load)| {
                        load.total < total_target && !assignment.holds(server)
                    })
                    .min_by_key(|(server, load)| (load.total, (*server).clone()))
                    .map(|(server, _)| server.clone());
                if let Some(to) = candidate {
                    record_full_move(&mut loads, &leader, &to, true);
                    moves.push(MoveShardJob {
                        database: collection.database.clone(),
                        collection: collection.collection.clone(),
                        shard: shard.clone(),
                        from: leader.clone(),
                        to,
                        is_leader: true,
                    });
                    continue;
                }
            }

            if options.move_followers {
                for follower in &assignment.followers {
                    let follower = strip_resigned(follower).to_string();
                    let overloaded = loads
                        .get(&follower)
                        .is_some_and(|l| l.total > total_target);
                    if !overloaded {
                        continue;
                    }
                    let candidate = loads
                        .iter()
                        .filter(|(server, load)| {
                            load.total < total_target && !assignment.holds(server)
                        })
                        .min_by_key(|(server, load)| (load.total, (*server).clone()))
                        .map(|(server, _)| server.clone());
                    if let Some(to) = candidate {
                        record_full_move(&mut loads, &follower, &to, false);
                        moves.push(MoveShardJob {
                            database: collection.database.clone(),
                            collection: collection.collection.clone(),
                            shard: shard.clone(),
                            from: follower,
                            to,
                            is_leader: false,
                        });
                        break;
                    }
                }
            }
        }
    }
    moves
}

fn record_leader_change(loads: &mut HashMap<String, Load>, from: &str, to: &str) {
    if let Some(load) = loads.get_mut(from) {
        load.leaders -= 1;
    }
    if let Some(load) = loads.get_mut(to) {
        load.leaders += 1;
    }
}

fn record_full_move(loads: &mut HashMap<String, Load>, from: &str, to: &str, is_leader: bool) {
    if let Some(load) = loads.get_mut(from) {
        load.total -= 1;
        if is_leader {
            load.leaders -= 1;
        }
    }
    if let Some(load) = loads.get_mut(to) {
        load.total += 1;
        if is_leader {
            load.leaders += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::distribution::ShardAssignment;

    fn collection(name: &str, assignments: &[(&str, &str, &[&str])]) -> CollectionDistribution {
        let mut shards = ShardMap::new();
        for (shard, leader, followers) in assignments {
            shards.insert(
                shard.to_string(),
                ShardAssignment::new(
                    *leader,
                    followers.iter().map(|f| f.to_string()).collect(),
                ),
            );
        }
        CollectionDistribution {
            database: "_system".into(),
            collection: name.into(),
            shards,
            mirrors_prototype: false,
        }
    }

    fn servers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_balanced_cluster_proposes_nothing() {
        let collections = vec![collection(
            "c",
            &[("s0001", "a", &[]), ("s0002", "b", &[])],
        )];
        let moves = compute_moves(
            &collections,
            &servers(&["a", "b"]),
            &RebalanceOptions::default(),
        );
        assert!(moves.is_empty());
    }

    #[test]
    fn test_leader_change_prefers_existing_follower() {
        // all leaders on one server, followers elsewhere
        let collections = vec![collection(
            "c",
            &[
                ("s0001", "a", &["b"]),
                ("s0002", "a", &["b"]),
                ("s0003", "a", &["b"]),
                ("s0004", "a", &["b"]),
            ],
        )];
        let moves = compute_moves(
            &collections,
            &servers(&["a", "b"]),
            &RebalanceOptions::default(),
        );
        assert!(!moves.is_empty());
        for mv in &moves {
            assert!(mv.is_leader);
            assert_eq!(mv.from, "a");
            assert_eq!(mv.to, "b");
        }
    }

    #[test]
    fn test_move_leaders_targets_empty_server() {
        let collections = vec![collection(
            "c",
            &[("s0001", "a", &[]), ("s0002", "a", &[]), ("s0003", "a", &[])],
        )];
        let options = RebalanceOptions {
            move_leaders: true,
            leader_changes: false,
            ..Default::default()
        };
        let moves = compute_moves(&collections, &servers(&["a", "b"]), &options);
        assert!(!moves.is_empty());
        assert!(moves.iter().all(|m| m.to == "b"));
    }

    #[test]
    fn test_cleaned_server_is_never_a_target() {
        // "b" excluded from the eligible set entirely
        let collections = vec![collection(
            "c",
            &[("s0001", "a", &[]), ("s0002", "a", &[]), ("s0003", "a", &[])],
        )];
        let options = RebalanceOptions {
            move_leaders: true,
            ..Default::default()
        };
        let moves = compute_moves(&collections, &servers(&["a", "c"]), &options);
        assert!(moves.iter().all(|m| m.to != "b"));
    }

    #[test]
    fn test_excluded_database_is_skipped() {
        let collections = vec![collection(
            "c",
            &[("s0001", "a", &["b"]), ("s0002", "a", &["b"])],
        )];
        let options = RebalanceOptions {
            databases_excluded: vec!["_system".into()],
            ..Default::default()
        };
        let moves = compute_moves(&collections, &servers(&["a", "b"]), &options);
        assert!(moves.is_empty());
    }

    #[test]
    fn test_mirrored_collection_not_moved_directly() {
        let mut mirrored = collection("follower_coll", &[("s0001", "a", &[]), ("s0002", "a", &[])]);
        mirrored.mirrors_prototype = true;
        let options = RebalanceOptions {
            move_leaders: true,
            ..Default::default()
        };
        let moves = compute_moves(&[mirrored], &servers(&["a", "b"]), &options);
        assert!(moves.is_empty());
    }
}
