//! The plan optimizer.
//!
//! Named rewrite rules run against the plan arena to a fixed point: each
//! pass applies every enabled rule once, in registration order, until a
//! full pass changes nothing. Rules report whether they changed the plan
//! and may fail the query (a forced index hint that cannot be honored is an
//! error, not a fallback).

mod collect_sort;
mod distinct;
mod gather;
mod indexes;
mod projection;
mod support;
mod toggles;

pub use toggles::RuleToggles;

use crate::catalog::Database;
use crate::query::errors::QueryResult;

use crate::plan::ExecutionPlan;

/// Registration order is application order within one pass.
pub const RULE_NAMES: [&str; 5] = [
    "use-indexes",
    "remove-collect-sort",
    "distinct-as-collect",
    "reduce-extraction-to-projection",
    "parallelize-gather",
];

const MAX_PASSES: usize = 8;

pub struct OptimizerContext<'a> {
    pub database: &'a Database,
}

impl<'a> OptimizerContext<'a> {
    pub fn new(database: &'a Database) -> Self {
        Self { database }
    }
}

/// Applies the enabled rules to a fixed point.
pub fn optimize(
    plan: &mut ExecutionPlan,
    toggles: &RuleToggles,
    ctx: &OptimizerContext,
) -> QueryResult<()> {
    for _ in 0..MAX_PASSES {
        let mut changed = false;
        for name in RULE_NAMES {
            if !toggles.is_enabled(name) {
                continue;
            }
            let rule_changed = match name {
                "use-indexes" => indexes::apply(plan, ctx)?,
                "remove-collect-sort" => collect_sort::apply(plan)?,
                "distinct-as-collect" => distinct::apply(plan)?,
                "reduce-extraction-to-projection" => projection::apply(plan)?,
                "parallelize-gather" => gather::apply(plan, ctx)?,
                _ => unreachable!("unregistered rule"),
            };
            if rule_changed {
                plan.note_rule(name);
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::catalog::{CollectionOptions, Database};
    use crate::plan::{build_plan, PlanBuildContext};
    use crate::query::parse_query;

    /// A database with the collections the rule tests share.
    pub fn database() -> Database {
        let db = Database::new("_system");
        db.create_collection("c", CollectionOptions::default()).unwrap();
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

    pub fn optimized(db: &Database, text: &str) -> QueryResult<ExecutionPlan> {
        optimized_with(db, text, &RuleToggles::all())
    }

    pub fn optimized_with(
        db: &Database,
        text: &str,
        toggles: &RuleToggles,
    ) -> QueryResult<ExecutionPlan> {
        let query = parse_query(text)?;
        let mut plan = build_plan(&query, &PlanBuildContext::new(db))?;
        optimize(&mut plan, toggles, &OptimizerContext::new(db))?;
        Ok(plan)
    }
}
