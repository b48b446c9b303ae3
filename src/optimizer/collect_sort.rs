//! `remove-collect-sort`: drops the sort feeding a sorted collect when the
//! input already arrives in group-key order from a sorted index scan.
//!
//! Applies only on single-shard input (a gather interleaves shard streams,
//! losing global order) and only when the sort expressions are ascending
//! attribute paths continuing the index's field list right after the
//! equality-bound prefix.

use crate::index::IndexType;
use crate::plan::{CollectMethod, ExecutionPlan, NodeKind};
use crate::query::errors::QueryResult;

pub fn apply(plan: &mut ExecutionPlan) -> QueryResult<bool> {
    let mut changed = false;
    for id in plan.ordered_ids() {
        if !plan.is_live(id) || !matches!(plan.node(id).kind, NodeKind::Sort { .. }) {
            continue;
        }
        // the sort must directly feed a sorted collect
        let feeds_sorted_collect = plan.consumers_of(id).first().is_some_and(|consumer| {
            matches!(
                plan.node(*consumer).kind,
                NodeKind::Collect {
                    method: CollectMethod::Sorted,
                    ..
                }
            )
        });
        if !feeds_sorted_collect {
            continue;
        }
        if input_is_presorted(plan, id) {
            plan.remove(id);
            changed = true;
        }
    }
    Ok(changed)
}

fn input_is_presorted(plan: &ExecutionPlan, sort_id: usize) -> bool {
    let NodeKind::Sort { elements } = &plan.node(sort_id).kind else {
        return false;
    };
    if elements.is_empty() || elements.iter().any(|e| !e.ascending) {
        return false;
    }

    // walk upstream through order-preserving nodes to the access path
    let mut current = plan.node(sort_id).dependencies[0];
    loop {
        match &plan.node(current).kind {
            NodeKind::Filter { .. } | NodeKind::Calculation { .. } => {
                current = plan.node(current).dependencies[0];
            }
            NodeKind::IndexScan {
                variable,
                index,
                equalities,
                ..
            } => {
                if index.index_type != IndexType::Persistent {
                    return false;
                }
                let sort_paths: Option<Vec<String>> = elements
                    .iter()
                    .map(|e| e.expr.attribute_path_of(variable))
                    .collect();
                let Some(sort_paths) = sort_paths else {
                    return false;
                };
                // fields bound by equality are constant across the scan, so
                // the order continues at the first unbound field
                let remaining = &index.fields[equalities.len().min(index.fields.len())..];
                return remaining.len() >= sort_paths.len()
                    && remaining[..sort_paths.len()] == sort_paths[..];
            }
            _ => return false,
        }
    }
}
