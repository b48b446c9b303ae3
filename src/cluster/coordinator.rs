//! The cluster coordinator.
//!
//! All shard-map state lives in the agency; the coordinator mutates it
//! exclusively through compare-and-set transactions, so concurrent
//! coordinators cannot clobber each other's updates. Shard moves and
//! server cleanout execute asynchronously on a worker thread as agency
//! jobs; callers poll the job queue (or the rebalance counters) for
//! convergence.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::agency::{AgencyClient, AgencyError};
use crate::observability::Logger;

use super::distribution::{
    shard_map_from_value, shard_map_to_value, strip_resigned, ShardAssignment, ShardMap,
};
use super::health::{HealthStatus, ServerHealth};
use super::jobs::{JobState, MoveShardJob};
use super::rebalance::{compute_moves, CollectionDistribution, RebalanceOptions, RebalancePlan};
use super::{ClusterError, ClusterResult};

const ROOT: &str = "arango";
const CAS_RETRIES: usize = 8;

pub struct ClusterCoordinator {
    agency: AgencyClient,
}

fn plan_path(database: &str, collection: &str) -> String {
    format!("/{}/Plan/Collections/{}/{}", ROOT, database, collection)
}

fn current_path(database: &str, collection: &str) -> String {
    format!("/{}/Current/Collections/{}/{}", ROOT, database, collection)
}

fn health_path(server: &str) -> String {
    format!("/{}/Supervision/Health/{}", ROOT, server)
}

fn job_path(state: JobState, id: &str) -> String {
    format!("/{}/{}/{}", ROOT, state.path(), id)
}

impl ClusterCoordinator {
    pub fn new(agency: AgencyClient) -> Arc<Self> {
        Arc::new(Self { agency })
    }

    // ---- servers & health ----

    pub fn register_server(&self, server: &str, short_name: &str) -> ClusterResult<()> {
        let health = ServerHealth {
            server: server.to_string(),
            short_name: short_name.to_string(),
            status: HealthStatus::Good,
        };
        self.agency.write(json!({
            health_path(server): {"op": "set", "new": health.to_value()}
        }))?;
        Ok(())
    }

    pub fn set_server_health(&self, server: &str, status: HealthStatus) -> ClusterResult<()> {
        let current = self
            .agency
            .read(&[health_path(server).as_str()])?
            .pointer(&format!("/{}/Supervision/Health/{}", ROOT, server))
            .cloned()
            .ok_or_else(|| ClusterError::UnknownServer(server.to_string()))?;
        let mut health = ServerHealth::from_value(server, &current)
            .ok_or_else(|| ClusterError::UnknownServer(server.to_string()))?;
        health.status = status;
        self.agency.write(json!({
            health_path(server): {"op": "set", "new": health.to_value()}
        }))?;
        Ok(())
    }

    pub fn health(&self) -> ClusterResult<Vec<ServerHealth>> {
        let tree = self
            .agency
            .read(&[format!("/{}/Supervision/Health", ROOT).as_str()])?;
        let mut out = Vec::new();
        if let Some(map) = tree
            .pointer(&format!("/{}/Supervision/Health", ROOT))
            .and_then(Value::as_object)
        {
            for (server, value) in map {
                if let Some(health) = ServerHealth::from_value(server, value) {
                    out.push(health);
                }
            }
        }
        out.sort_by(|a, b| a.server.cmp(&b.server));
        Ok(out)
    }

    /// Wire form of `GET /_admin/cluster/health`.
    pub fn health_value(&self) -> ClusterResult<Value> {
        let mut health = Map::new();
        for server in self.health()? {
            health.insert(server.server.clone(), server.to_value());
        }
        Ok(json!({ "Health": health }))
    }

    pub fn cleaned_servers(&self) -> ClusterResult<Vec<String>> {
        let path = format!("/{}/Target/CleanedServers", ROOT);
        let tree = self.agency.read(&[path.as_str()])?;
        Ok(tree
            .pointer(&format!("/{}/Target/CleanedServers", ROOT))
            .and_then(Value::as_array)
            .map(|servers| {
                servers
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Servers a move may target: healthy and not cleaned out.
    pub fn eligible_servers(&self) -> ClusterResult<Vec<String>> {
        let cleaned = self.cleaned_servers()?;
        Ok(self
            .health()?
            .into_iter()
            .filter(|h| h.status == HealthStatus::Good)
            .map(|h| h.server)
            .filter(|server| !cleaned.contains(server))
            .collect())
    }

    // ---- collection distributions ----

    /// Assigns shards for a new collection and records Plan and Current.
    /// With `distribute_shards_like`, the prototype's assignment is copied
    /// shard-for-shard in rank order, followers included.
    pub fn create_collection(
        &self,
        database: &str,
        collection: &str,
        number_of_shards: usize,
        replication_factor: usize,
        distribute_shards_like: Option<&str>,
    ) -> ClusterResult<()> {
        let (shards, like) = match distribute_shards_like {
            Some(prototype) => {
                let (plan, _) = self.collection_distribution(database, prototype)?;
                (plan, Some(prototype.to_string()))
            }
            None => {
                let servers = self.eligible_servers()?;
                if servers.is_empty() {
                    return Err(ClusterError::BadParameter(
                        "no eligible servers to place shards on".to_string(),
                    ));
                }
                let mut shards = ShardMap::new();
                for i in 0..number_of_shards {
                    let leader = servers[i % servers.len()].clone();
                    let mut followers = Vec::new();
                    for r in 1..replication_factor.min(servers.len()) {
                        followers.push(servers[(i + r) % servers.len()].clone());
                    }
                    shards.insert(format!("s{:04}", i + 1), ShardAssignment::new(leader, followers));
                }
                (shards, None)
            }
        };

        let mut entry = json!({ "shards": shard_map_to_value(&shards) });
        if let Some(prototype) = &like {
            entry["distributeShardsLike"] = json!(prototype);
        }
        self.agency.write(json!({
            plan_path(database, collection): {"op": "set", "new": entry},
            current_path(database, collection): {
                "op": "set",
                "new": { "shards": shard_map_to_value(&shards) },
            },
        }))?;
        Ok(())
    }

    pub fn drop_collection(&self, database: &str, collection: &str) -> ClusterResult<()> {
        self.agency.write(json!({
            plan_path(database, collection): {"op": "delete"},
            current_path(database, collection): {"op": "delete"},
        }))?;
        Ok(())
    }

    /// Plan and Current shard maps for one collection.
    pub fn collection_distribution(
        &self,
        database: &str,
        collection: &str,
    ) -> ClusterResult<(ShardMap, ShardMap)> {
        let plan_path = plan_path(database, collection);
        let current_path = current_path(database, collection);
        let tree = self
            .agency
            .read(&[plan_path.as_str(), current_path.as_str()])?;
        let plan = tree
            .pointer(&format!(
                "/{}/Plan/Collections/{}/{}/shards",
                ROOT, database, collection
            ))
            .map(shard_map_from_value)
            .ok_or_else(|| ClusterError::UnknownCollection(collection.to_string()))?;
        let current = tree
            .pointer(&format!(
                "/{}/Current/Collections/{}/{}/shards",
                ROOT, database, collection
            ))
            .map(shard_map_from_value)
            .unwrap_or_default();
        Ok((plan, current))
    }

    /// Wire form of `GET /_admin/cluster/shardDistribution`.
    pub fn shard_distribution(&self, database: &str) -> ClusterResult<Value> {
        let mut results = Map::new();
        for (collection, entry) in self.plan_collections(database)? {
            let plan = entry
                .get("shards")
                .map(shard_map_from_value)
                .unwrap_or_default();
            let (_, current) = self.collection_distribution(database, &collection)?;
            results.insert(
                collection,
                json!({
                    "Plan": distribution_view(&plan),
                    "Current": distribution_view(&current),
                }),
            );
        }
        Ok(json!({ "results": results }))
    }

    fn plan_collections(&self, database: &str) -> ClusterResult<Vec<(String, Value)>> {
        let path = format!("/{}/Plan/Collections/{}", ROOT, database);
        let tree = self.agency.read(&[path.as_str()])?;
        let mut out = Vec::new();
        if let Some(map) = tree
            .pointer(&format!("/{}/Plan/Collections/{}", ROOT, database))
            .and_then(Value::as_object)
        {
            for (name, entry) in map {
                out.push((name.clone(), entry.clone()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn databases(&self) -> ClusterResult<Vec<String>> {
        let path = format!("/{}/Plan/Collections", ROOT);
        let tree = self.agency.read(&[path.as_str()])?;
        let mut out: Vec<String> = tree
            .pointer(&format!("/{}/Plan/Collections", ROOT))
            .and_then(Value::as_object)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        Ok(out)
    }

    /// Collections mirroring `collection` via distributeShardsLike.
    fn dependents_of(&self, database: &str, collection: &str) -> ClusterResult<Vec<String>> {
        Ok(self
            .plan_collections(database)?
            .into_iter()
            .filter(|(_, entry)| {
                entry.get("distributeShardsLike").and_then(Value::as_str) == Some(collection)
            })
            .map(|(name, _)| name)
            .collect())
    }

    // ---- rebalance ----

    pub fn compute_rebalance(&self, options: &RebalanceOptions) -> ClusterResult<RebalancePlan> {
        let mut collections = Vec::new();
        for database in self.databases()? {
            for (collection, entry) in self.plan_collections(&database)? {
                collections.push(CollectionDistribution {
                    database: database.clone(),
                    collection,
                    shards: entry
                        .get("shards")
                        .map(shard_map_from_value)
                        .unwrap_or_default(),
                    mirrors_prototype: entry.get("distributeShardsLike").is_some(),
                });
            }
        }
        let eligible = self.eligible_servers()?;
        let moves = compute_moves(&collections, &eligible, options);
        let (todo, pending) = self.job_counts()?;
        Ok(RebalancePlan {
            moves,
            pending_move_shards: pending,
            todo_move_shards: todo,
        })
    }

    pub fn job_counts(&self) -> ClusterResult<(u64, u64)> {
        let todo_path = format!("/{}/Target/ToDo", ROOT);
        let pending_path = format!("/{}/Target/Pending", ROOT);
        let tree = self
            .agency
            .read(&[todo_path.as_str(), pending_path.as_str()])?;
        let count = |state: &str| -> u64 {
            tree.pointer(&format!("/{}/Target/{}", ROOT, state))
                .and_then(Value::as_object)
                .map(|map| map.len() as u64)
                .unwrap_or(0)
        };
        Ok((count("ToDo"), count("Pending")))
    }

    /// Queues the moves as agency jobs and executes them on a worker
    /// thread. Returns the job ids in queue order.
    pub fn execute_moves(
        self: &Arc<Self>,
        moves: Vec<MoveShardJob>,
    ) -> ClusterResult<Vec<String>> {
        let mut ids = Vec::with_capacity(moves.len());
        for mv in &moves {
            let id = Uuid::new_v4().to_string();
            self.agency.write(json!({
                job_path(JobState::ToDo, &id): {"op": "set", "new": mv.to_value()},
            }))?;
            ids.push(id);
        }
        let coordinator = Arc::clone(self);
        let queued: Vec<(String, MoveShardJob)> =
            ids.iter().cloned().zip(moves.into_iter()).collect();
        thread::spawn(move || {
            for (id, mv) in queued {
                coordinator.run_move_job(&id, &mv);
            }
        });
        Ok(ids)
    }

    fn run_move_job(&self, id: &str, mv: &MoveShardJob) {
        if let Err(e) = self.transition_job(id, JobState::ToDo, JobState::Pending, mv.to_value()) {
            Logger::error("cluster.job.transition_failed", &[("id", id), ("error", &e.to_string())]);
            return;
        }
        // moves are deliberately not instantaneous; pollers observe the
        // pending state
        thread::sleep(Duration::from_millis(2));
        match self.apply_move(mv) {
            Ok(()) => {
                let _ = self.transition_job(id, JobState::Pending, JobState::Finished, mv.to_value());
                Logger::info(
                    "cluster.move.finished",
                    &[
                        ("collection", &mv.collection),
                        ("shard", &mv.shard),
                        ("from", &mv.from),
                        ("to", &mv.to),
                    ],
                );
            }
            Err(e) => {
                let _ = self.transition_job(id, JobState::Pending, JobState::Failed, mv.to_value());
                Logger::error("cluster.move.failed", &[("id", id), ("error", &e.to_string())]);
            }
        }
    }

    fn transition_job(
        &self,
        id: &str,
        from: JobState,
        to: JobState,
        job: Value,
    ) -> ClusterResult<()> {
        self.agency.write(json!({
            job_path(from, id): {"op": "delete"},
            job_path(to, id): {"op": "set", "new": job},
        }))?;
        Ok(())
    }

    pub fn query_agency_job(&self, id: &str) -> ClusterResult<Value> {
        for state in JobState::all() {
            let path = job_path(state, id);
            let tree = self.agency.read(&[path.as_str()])?;
            if let Some(job) = tree.pointer(&format!("/{}/{}/{}", ROOT, state.path(), id)) {
                return Ok(json!({
                    "error": false,
                    "id": id,
                    "status": state.as_str(),
                    "job": job,
                }));
            }
        }
        Err(ClusterError::BadParameter(format!("unknown job '{}'", id)))
    }

    /// Applies one move to Plan (compare-and-set), mirrors it into every
    /// dependent collection, then converges Current through the
    /// resigned-leader intermediate state.
    fn apply_move(&self, mv: &MoveShardJob) -> ClusterResult<()> {
        self.rewrite_shard(&mv.database, &mv.collection, &mv.shard, &|old| {
            moved_assignment(old, mv)
        })
    }

    /// Rewrites one shard's assignment in the prototype and every
    /// dependent collection.
    fn rewrite_shard(
        &self,
        database: &str,
        collection: &str,
        shard: &str,
        transform: &dyn Fn(&ShardAssignment) -> ShardAssignment,
    ) -> ClusterResult<()> {
        self.rewrite_shard_one(database, collection, shard, transform)?;
        for dependent in self.dependents_of(database, collection)? {
            self.rewrite_shard_one(database, &dependent, shard, transform)?;
        }
        Ok(())
    }

    fn rewrite_shard_one(
        &self,
        database: &str,
        collection: &str,
        shard: &str,
        transform: &dyn Fn(&ShardAssignment) -> ShardAssignment,
    ) -> ClusterResult<()> {
        for _ in 0..CAS_RETRIES {
            let path = plan_path(database, collection);
            let tree = self.agency.read(&[path.as_str()])?;
            let old_entry = tree
                .pointer(&format!(
                    "/{}/Plan/Collections/{}/{}",
                    ROOT, database, collection
                ))
                .cloned()
                .ok_or_else(|| ClusterError::UnknownCollection(collection.to_string()))?;
            let mut shards = old_entry
                .get("shards")
                .map(shard_map_from_value)
                .unwrap_or_default();
            let Some(assignment) = shards.get_mut(shard) else {
                return Err(ClusterError::BadParameter(format!(
                    "unknown shard '{}'",
                    shard
                )));
            };
            let old_assignment = assignment.clone();
            *assignment = transform(&old_assignment);
            let new_assignment = assignment.clone();

            let mut new_entry = old_entry.clone();
            new_entry["shards"] = shard_map_to_value(&shards);

            match self.agency.transact(
                json!({ path.clone(): {"op": "set", "new": new_entry} }),
                json!({ path.clone(): {"old": old_entry} }),
            ) {
                Ok(_) => {
                    self.converge_current(
                        database,
                        collection,
                        shard,
                        &old_assignment,
                        &new_assignment,
                    )?;
                    return Ok(());
                }
                Err(AgencyError::PreconditionFailed) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(ClusterError::Agency(AgencyError::PreconditionFailed))
    }

    fn converge_current(
        &self,
        database: &str,
        collection: &str,
        shard: &str,
        old: &ShardAssignment,
        new: &ShardAssignment,
    ) -> ClusterResult<()> {
        let shard_path = format!("{}/shards/{}", current_path(database, collection), shard);
        if strip_resigned(&old.leader) != strip_resigned(&new.leader) {
            // the outgoing leader first resigns in Current, then the new
            // assignment becomes authoritative
            let mut resigned = old.clone();
            resigned.leader = format!("_{}", strip_resigned(&old.leader));
            self.agency.write(json!({
                shard_path.clone(): {"op": "set", "new": resigned.to_value()},
            }))?;
        }
        self.agency.write(json!({
            shard_path: {"op": "set", "new": new.to_value()},
        }))?;
        Ok(())
    }

    // ---- cleanout ----

    /// Moves every shard responsibility off `server`, then records it in
    /// the cleaned-servers list. Runs asynchronously; returns the job id.
    pub fn clean_out_server(self: &Arc<Self>, server: &str) -> ClusterResult<String> {
        if !self.health()?.iter().any(|h| h.server == server) {
            return Err(ClusterError::UnknownServer(server.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        let job = json!({ "type": "cleanOutServer", "server": server });
        self.agency.write(json!({
            job_path(JobState::ToDo, &id): {"op": "set", "new": job},
        }))?;

        let coordinator = Arc::clone(self);
        let server = server.to_string();
        let job_id = id.clone();
        thread::spawn(move || {
            let job = json!({ "type": "cleanOutServer", "server": server });
            if coordinator
                .transition_job(&job_id, JobState::ToDo, JobState::Pending, job.clone())
                .is_err()
            {
                return;
            }
            match coordinator.run_cleanout(&server) {
                Ok(()) => {
                    let _ = coordinator.transition_job(
                        &job_id,
                        JobState::Pending,
                        JobState::Finished,
                        job,
                    );
                    Logger::info("cluster.cleanout.finished", &[("server", &server)]);
                }
                Err(e) => {
                    let _ = coordinator.transition_job(
                        &job_id,
                        JobState::Pending,
                        JobState::Failed,
                        job,
                    );
                    Logger::error(
                        "cluster.cleanout.failed",
                        &[("server", &server), ("error", &e.to_string())],
                    );
                }
            }
        });
        Ok(id)
    }

    fn run_cleanout(&self, server: &str) -> ClusterResult<()> {
        let targets: Vec<String> = self
            .eligible_servers()?
            .into_iter()
            .filter(|s| s != server)
            .collect();
        if targets.is_empty() {
            return Err(ClusterError::ServerUnusable(
                "no server left to take over".to_string(),
            ));
        }

        for database in self.databases()? {
            for (collection, entry) in self.plan_collections(&database)? {
                if entry.get("distributeShardsLike").is_some() {
                    continue; // moved through its prototype
                }
                let shards = entry
                    .get("shards")
                    .map(shard_map_from_value)
                    .unwrap_or_default();
                for (shard, assignment) in &shards {
                    if !assignment.holds(server) {
                        continue;
                    }
                    self.rewrite_shard(&database, &collection, shard, &|old| {
                        evacuated(old, server, &targets)
                    })?;
                }
            }
        }

        // append to the cleaned list (compare-and-set against concurrent
        // cleanouts)
        let path = format!("/{}/Target/CleanedServers", ROOT);
        for _ in 0..CAS_RETRIES {
            let old = self
                .agency
                .read(&[path.as_str()])?
                .pointer(&format!("/{}/Target/CleanedServers", ROOT))
                .cloned();
            let mut cleaned: Vec<String> = old
                .as_ref()
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if cleaned.iter().any(|s| s == server) {
                return Ok(());
            }
            cleaned.push(server.to_string());
            let preconditions = match &old {
                Some(old) => json!({ path.clone(): {"old": old} }),
                None => json!({ path.clone(): {"oldEmpty": true} }),
            };
            match self.agency.transact(
                json!({ path.clone(): {"op": "set", "new": cleaned} }),
                preconditions,
            ) {
                Ok(_) => return Ok(()),
                Err(AgencyError::PreconditionFailed) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(ClusterError::Agency(AgencyError::PreconditionFailed))
    }
}

/// Removes every responsibility of `server` from an assignment: a led
/// shard promotes a surviving follower (or relocates wholesale), a
/// followed shard replaces the follower with a fresh target, or shrinks
/// when no server is free to take it.
fn evacuated(old: &ShardAssignment, server: &str, targets: &[String]) -> ShardAssignment {
    let mut new = old.clone();
    if strip_resigned(&new.leader) == server {
        let promoted = new
            .followers
            .iter()
            .map(|f| strip_resigned(f).to_string())
            .find(|f| f != server);
        match promoted {
            Some(promoted) => {
                new.leader = promoted.clone();
                new.followers.retain(|f| {
                    let f = strip_resigned(f);
                    f != promoted && f != server
                });
                // keep the replica count when a server is free to join
                if let Some(replacement) = targets.iter().find(|t| !new.holds(t)) {
                    new.followers.push(replacement.clone());
                }
            }
            None => {
                if let Some(to) = targets.iter().find(|t| !new.holds(t)) {
                    new.leader = to.clone();
                }
            }
        }
    } else if new.followers.iter().any(|f| strip_resigned(f) == server) {
        match targets.iter().find(|t| !old.holds(t)) {
            Some(to) => {
                for follower in &mut new.followers {
                    if strip_resigned(follower) == server {
                        *follower = to.clone();
                    }
                }
            }
            None => new.followers.retain(|f| strip_resigned(f) != server),
        }
    }
    new
}

/// How one move rewrites an assignment.
fn moved_assignment(old: &ShardAssignment, mv: &MoveShardJob) -> ShardAssignment {
    let mut new = old.clone();
    if mv.is_leader {
        new.leader = mv.to.clone();
        // a former follower that takes the lead leaves the follower list;
        // the old leader steps down to follower only on an in-place swap
        let was_follower = old
            .followers
            .iter()
            .any(|f| strip_resigned(f) == mv.to);
        new.followers.retain(|f| strip_resigned(f) != mv.to);
        if was_follower {
            new.followers.push(strip_resigned(&old.leader).to_string());
        }
    } else {
        for follower in &mut new.followers {
            if strip_resigned(follower) == mv.from {
                *follower = mv.to.clone();
            }
        }
    }
    new
}

/// `{shard: {leader, followers}}` view used by shardDistribution.
fn distribution_view(map: &ShardMap) -> Value {
    let mut out = Map::new();
    for (shard, assignment) in map {
        out.insert(
            shard.clone(),
            json!({
                "leader": assignment.leader,
                "followers": assignment.followers,
            }),
        );
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agency::LocalAgency;
    use std::time::Instant;

    fn coordinator() -> Arc<ClusterCoordinator> {
        let agency = Arc::new(LocalAgency::single());
        let coordinator = ClusterCoordinator::new(agency.client());
        for i in 1..=3 {
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

    #[test]
    fn test_create_collection_distributes_over_servers() {
        let coordinator = coordinator();
        coordinator
            .create_collection("_system", "c", 6, 2, None)
            .unwrap();
        let (plan, current) = coordinator.collection_distribution("_system", "c").unwrap();
        assert_eq!(plan.len(), 6);
        assert_eq!(plan, current);
        for assignment in plan.values() {
            assert_eq!(assignment.followers.len(), 1);
            assert_ne!(assignment.leader, assignment.followers[0]);
        }
    }

    #[test]
    fn test_distribute_shards_like_copies_assignment() {
        let coordinator = coordinator();
        coordinator
            .create_collection("_system", "proto", 4, 2, None)
            .unwrap();
        coordinator
            .create_collection("_system", "mirror", 4, 2, Some("proto"))
            .unwrap();
        let (proto, _) = coordinator.collection_distribution("_system", "proto").unwrap();
        let (mirror, _) = coordinator.collection_distribution("_system", "mirror").unwrap();
        for (a, b) in proto.values().zip(mirror.values()) {
            assert!(a.mirrors(b));
        }
    }

    #[test]
    fn test_executed_moves_converge() {
        let coordinator = coordinator();
        coordinator
            .create_collection("_system", "c", 4, 1, None)
            .unwrap();
        let mv = {
            let (plan, _) = coordinator.collection_distribution("_system", "c").unwrap();
            let (shard, assignment) = plan.iter().next().unwrap();
            let to = ["PRMR-1", "PRMR-2", "PRMR-3"]
                .iter()
                .find(|s| !assignment.holds(s))
                .unwrap()
                .to_string();
            MoveShardJob {
                database: "_system".into(),
                collection: "c".into(),
                shard: shard.clone(),
                from: strip_resigned(&assignment.leader).to_string(),
                to,
                is_leader: true,
            }
        };
        let ids = coordinator.execute_moves(vec![mv.clone()]).unwrap();
        assert_eq!(ids.len(), 1);

        wait_for("move convergence", || {
            let (todo, pending) = coordinator.job_counts().unwrap();
            todo == 0 && pending == 0
        });

        let (plan, current) = coordinator.collection_distribution("_system", "c").unwrap();
        assert_eq!(strip_resigned(&plan[&mv.shard].leader), mv.to);
        assert_eq!(strip_resigned(&current[&mv.shard].leader), mv.to);
        let job = coordinator.query_agency_job(&ids[0]).unwrap();
        assert_eq!(job["status"], "Finished");
    }

    #[test]
    fn test_cleanout_empties_server_and_blocks_rebalance_target() {
        let coordinator = coordinator();
        coordinator
            .create_collection("_system", "c", 6, 2, None)
            .unwrap();
        let id = coordinator.clean_out_server("PRMR-2").unwrap();

        wait_for("cleanout", || {
            coordinator
                .cleaned_servers()
                .unwrap()
                .contains(&"PRMR-2".to_string())
        });
        let job = coordinator.query_agency_job(&id).unwrap();
        assert_eq!(job["status"], "Finished");

        // nothing references the cleaned server any more
        let (plan, current) = coordinator.collection_distribution("_system", "c").unwrap();
        for assignment in plan.values().chain(current.values()) {
            assert!(!assignment.holds("PRMR-2"));
        }

        // and rebalance never proposes it as a destination
        let options = RebalanceOptions {
            move_leaders: true,
            move_followers: true,
            ..Default::default()
        };
        let plan = coordinator.compute_rebalance(&options).unwrap();
        assert!(plan.moves.iter().all(|m| m.to != "PRMR-2"));
    }

    #[test]
    fn test_mirror_survives_cleanout_failover() {
        let coordinator = coordinator();
        coordinator
            .create_collection("_system", "proto", 4, 2, None)
            .unwrap();
        coordinator
            .create_collection("_system", "mirror", 4, 2, Some("proto"))
            .unwrap();

        coordinator.clean_out_server("PRMR-1").unwrap();
        wait_for("cleanout", || {
            coordinator
                .cleaned_servers()
                .unwrap()
                .contains(&"PRMR-1".to_string())
        });

        let (proto, _) = coordinator.collection_distribution("_system", "proto").unwrap();
        let (mirror, _) = coordinator.collection_distribution("_system", "mirror").unwrap();
        for ((_, a), (_, b)) in proto.iter().zip(mirror.iter()) {
            assert!(a.mirrors(b), "mirror diverged after failover");
            assert!(!a.holds("PRMR-1"));
        }
    }

    #[test]
    fn test_unknown_server_cleanout_rejected() {
        let coordinator = coordinator();
        assert!(matches!(
            coordinator.clean_out_server("nope"),
            Err(ClusterError::UnknownServer(_))
        ));
    }
}
