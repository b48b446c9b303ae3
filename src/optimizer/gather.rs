//! `parallelize-gather`: lets a gather pull its shard branches
//! concurrently.
//!
//! Scheduling only, never semantics: the rule stays off when the plan
//! contains an upsert on a collection with custom shard keys, because such
//! an upsert can raise sharding-constraint errors whose surfacing order
//! must match a serial execution. Single-shard scans never receive a
//! gather in the first place, so there is nothing to parallelize there.

use crate::plan::{ExecutionPlan, NodeKind};
use crate::query::errors::QueryResult;

use super::OptimizerContext;

pub fn apply(plan: &mut ExecutionPlan, ctx: &OptimizerContext) -> QueryResult<bool> {
    if has_order_sensitive_upsert(plan, ctx) {
        return Ok(false);
    }
    let mut changed = false;
    for id in plan.ordered_ids() {
        if let NodeKind::Gather { parallel, .. } = &mut plan.node_mut(id).kind {
            if !*parallel {
                *parallel = true;
                changed = true;
            }
        }
    }
    Ok(changed)
}

fn has_order_sensitive_upsert(plan: &ExecutionPlan, ctx: &OptimizerContext) -> bool {
    plan.ordered_nodes().iter().any(|node| match &node.kind {
        NodeKind::Upsert { collection, .. } => ctx
            .database
            .collection(collection)
            .map(|c| !c.options().sharded_by_key())
            .unwrap_or(true),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::testutil::{database, optimized, optimized_with};
    use crate::optimizer::RuleToggles;

    fn gather_parallel(plan: &ExecutionPlan) -> Option<bool> {
        let id = plan.find(|k| matches!(k, NodeKind::Gather { .. }))?;
        match &plan.node(id).kind {
            NodeKind::Gather { parallel, .. } => Some(*parallel),
            _ => None,
        }
    }

    #[test]
    fn test_gather_becomes_parallel() {
        let db = database();
        let plan = optimized(&db, "FOR d IN sharded RETURN d").unwrap();
        assert_eq!(gather_parallel(&plan), Some(true));
        assert!(plan.applied_rules.iter().any(|r| r == "parallelize-gather"));
    }

    #[test]
    fn test_disabled_rule_keeps_serial_gather() {
        let db = database();
        let toggles = RuleToggles::from_tokens(["-parallelize-gather"]);
        let plan = optimized_with(&db, "FOR d IN sharded RETURN d", &toggles).unwrap();
        assert_eq!(gather_parallel(&plan), Some(false));
    }

    #[test]
    fn test_custom_shard_key_upsert_blocks_parallelism() {
        let db = database();
        let plan = optimized(
            &db,
            "FOR d IN sharded \
             UPSERT {region: d.region} INSERT {region: d.region} \
             UPDATE {seen: true} IN by_region",
        )
        .unwrap();
        assert_eq!(gather_parallel(&plan), Some(false));
    }
}
