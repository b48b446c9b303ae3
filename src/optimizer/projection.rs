//! `reduce-extraction-to-projection`: scans that only feed field accesses
//! return just those fields instead of materializing whole documents.
//!
//! For an index scan the rule also decides whether the index alone covers
//! every projected path (fields, prefix fields and stored values), in which
//! case execution never fetches the document at all. It stays inactive for
//! a forced index hint that is not covering: the hint pins an access path
//! the projection machinery must not reason past.

use crate::plan::{ExecutionPlan, NodeKind};
use crate::query::errors::QueryResult;

use super::support::downstream_attribute_usage;

pub fn apply(plan: &mut ExecutionPlan) -> QueryResult<bool> {
    let mut changed = false;
    for id in plan.ordered_ids() {
        let (variable, current, forced_hint) = match &plan.node(id).kind {
            NodeKind::EnumerateCollection {
                variable, options, ..
            } => (variable.clone(), options.projections.clone(), false),
            NodeKind::IndexScan {
                variable, options, ..
            } => (
                variable.clone(),
                options.projections.clone(),
                options.force_index_hint,
            ),
            _ => continue,
        };

        let Some(paths) = downstream_attribute_usage(plan, id, &variable) else {
            continue;
        };
        if paths.is_empty() {
            continue;
        }

        match &mut plan.node_mut(id).kind {
            NodeKind::EnumerateCollection { options, .. } => {
                if current != paths {
                    options.projections = paths;
                    changed = true;
                }
            }
            NodeKind::IndexScan {
                index,
                covering,
                options,
                ..
            } => {
                let covers = index.covers(&paths);
                if forced_hint && !covers {
                    continue;
                }
                if current != paths || *covering != covers {
                    options.projections = paths;
                    *covering = covers;
                    changed = true;
                }
            }
            _ => unreachable!(),
        }
    }
    Ok(changed)
}
