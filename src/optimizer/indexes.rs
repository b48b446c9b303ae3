//! `use-indexes`: replaces full collection scans with index scans.
//!
//! Filter conjuncts of the form `var.path <op> constant` above a scan are
//! pooled into equality and range constraints, matched against the
//! collection's indexes, and the consumed conjuncts are dropped from the
//! filters. `indexHint` prefers a named index; `forceIndexHint` turns an
//! unusable hint into a hard query error instead of a silent fallback.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use crate::errors::ErrorCode;
use crate::index::{IndexDescriptor, IndexType};
use crate::plan::{ExecutionPlan, NodeKind, ScanOptions};
use crate::query::ast::{BinaryOp, Expr};
use crate::query::errors::{QueryError, QueryResult};
use crate::query::value::cmp_values;

use super::support::{and_chain, as_comparison, conjuncts};
use super::OptimizerContext;

type RangeSpec = (String, Option<Value>, bool, Option<Value>, bool);

pub fn apply(plan: &mut ExecutionPlan, ctx: &OptimizerContext) -> QueryResult<bool> {
    let mut changed = false;
    for id in plan.ordered_ids() {
        if !plan.is_live(id) {
            continue;
        }
        let (collection, variable, options) = match &plan.node(id).kind {
            NodeKind::EnumerateCollection {
                collection,
                variable,
                options,
            } => (collection.clone(), variable.clone(), options.clone()),
            _ => continue,
        };

        let filter_ids = filters_above(plan, id);
        let pool = ConditionPool::collect(plan, &filter_ids, &variable);

        let registry = ctx
            .database
            .collection(&collection)
            .map_err(|_| QueryError::collection_not_found(&collection))?;
        let candidates = registry.indexes().all();

        let chosen = choose_index(&candidates, &pool, &options)?;
        let Some((index, index_match)) = chosen else {
            continue;
        };

        let consumed = index_match.consumed_paths();
        plan.replace_kind(
            id,
            NodeKind::IndexScan {
                collection,
                variable: variable.clone(),
                index,
                equalities: index_match.equalities,
                ranges: index_match.ranges,
                covering: false,
                options,
            },
        );
        rewrite_filters(plan, &filter_ids, &variable, &pool, &consumed);
        changed = true;
    }
    Ok(changed)
}

/// Filter nodes between the scan and the first node that changes row
/// membership (limit, collect, modification, another enumeration).
fn filters_above(plan: &ExecutionPlan, scan: usize) -> Vec<usize> {
    let mut out = Vec::new();
    for consumer in plan.consumers_of(scan) {
        match &plan.node(consumer).kind {
            NodeKind::Filter { .. } => out.push(consumer),
            NodeKind::Calculation { .. }
            | NodeKind::Sort { .. }
            | NodeKind::Gather { .. } => continue,
            _ => break,
        }
    }
    out
}

/// Pooled constraints on one scan variable: at most one equality value per
/// path, merged-tightest range bounds per path.
struct ConditionPool {
    equalities: HashMap<String, Value>,
    /// Paths with conflicting equality values; never consumed.
    conflicting: Vec<String>,
    ranges: HashMap<String, (Option<Value>, bool, Option<Value>, bool)>,
}

impl ConditionPool {
    fn collect(plan: &ExecutionPlan, filter_ids: &[usize], variable: &str) -> Self {
        let mut pool = Self {
            equalities: HashMap::new(),
            conflicting: Vec::new(),
            ranges: HashMap::new(),
        };
        for filter_id in filter_ids {
            let NodeKind::Filter { expression } = &plan.node(*filter_id).kind else {
                continue;
            };
            for conjunct in conjuncts(expression) {
                let Some(cmp) = as_comparison(conjunct, variable) else {
                    continue;
                };
                match cmp.op {
                    BinaryOp::Eq => {
                        if let Some(existing) = pool.equalities.get(&cmp.path) {
                            if cmp_values(existing, &cmp.value) != Ordering::Equal {
                                pool.conflicting.push(cmp.path.clone());
                                pool.equalities.remove(&cmp.path);
                            }
                        } else if !pool.conflicting.contains(&cmp.path) {
                            pool.equalities.insert(cmp.path, cmp.value);
                        }
                    }
                    BinaryOp::Gt | BinaryOp::Ge => {
                        let inclusive = cmp.op == BinaryOp::Ge;
                        let entry = pool
                            .ranges
                            .entry(cmp.path)
                            .or_insert((None, false, None, false));
                        let tighter = match &entry.0 {
                            None => true,
                            Some(existing) => cmp_values(&cmp.value, existing) == Ordering::Greater,
                        };
                        if tighter {
                            entry.0 = Some(cmp.value);
                            entry.1 = inclusive;
                        }
                    }
                    BinaryOp::Lt | BinaryOp::Le => {
                        let inclusive = cmp.op == BinaryOp::Le;
                        let entry = pool
                            .ranges
                            .entry(cmp.path)
                            .or_insert((None, false, None, false));
                        let tighter = match &entry.2 {
                            None => true,
                            Some(existing) => cmp_values(&cmp.value, existing) == Ordering::Less,
                        };
                        if tighter {
                            entry.2 = Some(cmp.value);
                            entry.3 = inclusive;
                        }
                    }
                    _ => {}
                }
            }
        }
        pool
    }

    fn equality(&self, path: &str) -> Option<&Value> {
        self.equalities.get(path)
    }

    fn range(&self, path: &str) -> Option<RangeSpec> {
        self.ranges.get(path).map(|(lower, li, upper, ui)| {
            (path.to_string(), lower.clone(), *li, upper.clone(), *ui)
        })
    }

    fn is_empty(&self) -> bool {
        self.equalities.is_empty() && self.ranges.is_empty()
    }
}

/// How one index serves the pooled conditions.
struct IndexMatch {
    equalities: Vec<(String, Value)>,
    ranges: Vec<RangeSpec>,
}

impl IndexMatch {
    fn matched(&self) -> usize {
        self.equalities.len() + self.ranges.len()
    }

    fn consumed_paths(&self) -> Vec<String> {
        let mut out: Vec<String> = self.equalities.iter().map(|(p, _)| p.clone()).collect();
        out.extend(self.ranges.iter().map(|(p, ..)| p.clone()));
        out
    }
}

/// Greedy match of an index against the pool, per index-type rules.
fn match_index(index: &IndexDescriptor, pool: &ConditionPool) -> Option<IndexMatch> {
    let mut m = IndexMatch {
        equalities: Vec::new(),
        ranges: Vec::new(),
    };
    match index.index_type {
        IndexType::Primary => {
            let value = pool.equality("_key")?;
            m.equalities.push(("_key".to_string(), value.clone()));
        }
        IndexType::Edge => {
            let field = index
                .fields
                .iter()
                .find(|f| pool.equality(f).is_some())?;
            m.equalities
                .push((field.clone(), pool.equality(field).unwrap().clone()));
        }
        IndexType::Persistent => {
            // equality prefix, then at most one trailing range field
            for field in &index.fields {
                if let Some(value) = pool.equality(field) {
                    m.equalities.push((field.clone(), value.clone()));
                } else {
                    if let Some(range) = pool.range(field) {
                        m.ranges.push(range);
                    }
                    break;
                }
            }
            if m.matched() == 0 {
                return None;
            }
        }
        IndexType::MdiPrefixed => {
            // the range portion only opens up once every prefix field has
            // an equality constraint
            for field in &index.prefix_fields {
                let value = pool.equality(field)?;
                m.equalities.push((field.clone(), value.clone()));
            }
            for field in &index.fields {
                if let Some(value) = pool.equality(field) {
                    m.equalities.push((field.clone(), value.clone()));
                } else if let Some(range) = pool.range(field) {
                    m.ranges.push(range);
                }
            }
        }
        IndexType::Geo => return None,
    }
    Some(m)
}

fn choose_index(
    candidates: &[IndexDescriptor],
    pool: &ConditionPool,
    options: &ScanOptions,
) -> QueryResult<Option<(IndexDescriptor, IndexMatch)>> {
    if let Some(hint) = &options.index_hint {
        let named = candidates
            .iter()
            .find(|idx| &idx.name == hint || &idx.id == hint);
        match named {
            Some(index) => {
                if let Some(m) = match_index(index, pool) {
                    return Ok(Some((index.clone(), m)));
                }
                // with no conditions at all, a hinted index still serves a
                // full index scan
                if pool.is_empty() {
                    return Ok(Some((
                        index.clone(),
                        IndexMatch {
                            equalities: Vec::new(),
                            ranges: Vec::new(),
                        },
                    )));
                }
                if options.force_index_hint {
                    return Err(QueryError::new(
                        ErrorCode::QueryForcedIndexHintUnusable,
                        format!("could not use index hint to serve query; '{}'", hint),
                    ));
                }
            }
            None => {
                if options.force_index_hint {
                    return Err(QueryError::new(
                        ErrorCode::QueryForcedIndexHintUnusable,
                        format!("could not use index hint to serve query; '{}'", hint),
                    ));
                }
            }
        }
    }

    let mut best: Option<(&IndexDescriptor, IndexMatch)> = None;
    for index in candidates {
        let Some(m) = match_index(index, pool) else {
            continue;
        };
        if m.matched() == 0 {
            continue;
        }
        best = Some(match best {
            None => (index, m),
            Some((current, current_match)) => {
                let better = m.matched().cmp(&current_match.matched()).then(
                    index
                        .selectivity
                        .partial_cmp(&current.selectivity)
                        .unwrap_or(Ordering::Equal),
                );
                if better == Ordering::Greater {
                    (index, m)
                } else {
                    (current, current_match)
                }
            }
        });
    }
    Ok(best.map(|(index, m)| (index.clone(), m)))
}

/// Drops consumed conjuncts from the filters; removes filters that end up
/// empty.
fn rewrite_filters(
    plan: &mut ExecutionPlan,
    filter_ids: &[usize],
    variable: &str,
    pool: &ConditionPool,
    consumed: &[String],
) {
    for filter_id in filter_ids {
        if !plan.is_live(*filter_id) {
            continue;
        }
        let NodeKind::Filter { expression } = &plan.node(*filter_id).kind else {
            continue;
        };
        let remaining: Vec<Expr> = conjuncts(expression)
            .into_iter()
            .filter(|conjunct| {
                match as_comparison(conjunct, variable) {
                    Some(cmp) => {
                        if !consumed.contains(&cmp.path) {
                            return true;
                        }
                        // an equality is only consumed when the pooled
                        // value is the one the index uses
                        if cmp.op == BinaryOp::Eq {
                            match pool.equality(&cmp.path) {
                                Some(value) => {
                                    cmp_values(value, &cmp.value) != Ordering::Equal
                                }
                                None => true,
                            }
                        } else {
                            false
                        }
                    }
                    None => true,
                }
            })
            .cloned()
            .collect();

        match and_chain(remaining) {
            Some(expression) => plan.replace_kind(*filter_id, NodeKind::Filter { expression }),
            None => plan.remove(*filter_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::testutil::{database, optimized, optimized_with};
    use crate::optimizer::RuleToggles;
    use serde_json::json;

    #[test]
    fn test_equality_filter_selects_persistent_index() {
        let db = database();
        let c = db.collection("c").unwrap();
        let def = json!({"type": "persistent", "fields": ["value"]});
        c.indexes().ensure_index(def.as_object().unwrap()).unwrap();

        let plan = optimized(&db, "FOR d IN c FILTER d.value == 7 RETURN d").unwrap();
        let scan = plan.find(|k| matches!(k, NodeKind::IndexScan { .. })).unwrap();
        match &plan.node(scan).kind {
            NodeKind::IndexScan { equalities, .. } => {
                assert_eq!(equalities, &[("value".to_string(), json!(7))]);
            }
            _ => unreachable!(),
        }
        // the equality was fully absorbed by the index
        assert!(!plan.contains(|k| matches!(k, NodeKind::Filter { .. })));
        assert!(plan.applied_rules.iter().any(|r| r == "use-indexes"));
    }

    #[test]
    fn test_range_bounds_merge_tightest() {
        let db = database();
        let c = db.collection("c").unwrap();
        let def = json!({"type": "persistent", "fields": ["value"]});
        c.indexes().ensure_index(def.as_object().unwrap()).unwrap();

        let plan = optimized(
            &db,
            "FOR d IN c FILTER d.value > 1 && d.value > 3 && d.value <= 9 RETURN d",
        )
        .unwrap();
        let scan = plan.find(|k| matches!(k, NodeKind::IndexScan { .. })).unwrap();
        match &plan.node(scan).kind {
            NodeKind::IndexScan { ranges, .. } => {
                let (path, lower, li, upper, ui) = &ranges[0];
                assert_eq!(path, "value");
                assert_eq!(lower.as_ref(), Some(&json!(3)));
                assert!(!li);
                assert_eq!(upper.as_ref(), Some(&json!(9)));
                assert!(ui);
            }
            _ => unreachable!(),
        }
        assert!(!plan.contains(|k| matches!(k, NodeKind::Filter { .. })));
    }

    #[test]
    fn test_unmatched_conjunct_stays_in_filter() {
        let db = database();
        let c = db.collection("c").unwrap();
        let def = json!({"type": "persistent", "fields": ["value"]});
        c.indexes().ensure_index(def.as_object().unwrap()).unwrap();

        let plan = optimized(
            &db,
            "FOR d IN c FILTER d.value == 7 && d.other LIKE 'x%' RETURN d",
        )
        .unwrap();
        assert!(plan.contains(|k| matches!(k, NodeKind::IndexScan { .. })));
        assert!(plan.contains(|k| matches!(k, NodeKind::Filter { .. })));
    }

    #[test]
    fn test_mdi_prefixed_needs_all_prefix_equalities() {
        let db = database();
        let c = db.collection("c").unwrap();
        let def = json!({
            "type": "mdi-prefixed",
            "fields": ["x", "y"],
            "prefixFields": ["tenant"],
            "fieldValueTypes": "double"
        });
        c.indexes().ensure_index(def.as_object().unwrap()).unwrap();

        // range only, prefix not bound: index unusable
        let plan = optimized(&db, "FOR d IN c FILTER d.x > 1 RETURN d").unwrap();
        assert!(!plan.contains(|k| matches!(k, NodeKind::IndexScan { .. })));

        // prefix equality present: range portion usable
        let plan = optimized(
            &db,
            "FOR d IN c FILTER d.tenant == 't1' && d.x > 1 && d.y < 5 RETURN d",
        )
        .unwrap();
        let scan = plan.find(|k| matches!(k, NodeKind::IndexScan { .. })).unwrap();
        match &plan.node(scan).kind {
            NodeKind::IndexScan {
                equalities, ranges, ..
            } => {
                assert_eq!(equalities, &[("tenant".to_string(), json!("t1"))]);
                assert_eq!(ranges.len(), 2);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_selectivity_breaks_ties() {
        let db = database();
        let c = db.collection("c").unwrap();
        let low = json!({"type": "persistent", "fields": ["value"], "selectivityEstimate": 0.1, "name": "low"});
        let high = json!({"type": "persistent", "fields": ["value"], "prefixFields": [], "selectivityEstimate": 0.9, "name": "high"});
        c.indexes().ensure_index(low.as_object().unwrap()).unwrap();
        // same semantic key would dedupe; vary fields to keep both
        let high = {
            let mut map = high.as_object().unwrap().clone();
            map.insert("fields".into(), json!(["value", "other"]));
            map
        };
        c.indexes().ensure_index(&high).unwrap();

        let plan = optimized(&db, "FOR d IN c FILTER d.value == 1 RETURN d").unwrap();
        let scan = plan.find(|k| matches!(k, NodeKind::IndexScan { .. })).unwrap();
        match &plan.node(scan).kind {
            // both match one field; the higher selectivity estimate wins
            NodeKind::IndexScan { index, .. } => assert_eq!(index.name, "high"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_force_index_hint_unusable_fails() {
        let db = database();
        let err = optimized(
            &db,
            "FOR d IN c OPTIONS {indexHint: 'missing', forceIndexHint: true} \
             FILTER d.value == 1 RETURN d",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryForcedIndexHintUnusable);
    }

    #[test]
    fn test_soft_index_hint_falls_back() {
        let db = database();
        let plan = optimized(
            &db,
            "FOR d IN c OPTIONS {indexHint: 'missing'} FILTER d.value == 1 RETURN d",
        )
        .unwrap();
        // no usable index: the full scan stays
        assert!(plan.contains(|k| matches!(k, NodeKind::EnumerateCollection { .. })));
    }

    #[test]
    fn test_rule_disabled_keeps_full_scan() {
        let db = database();
        let c = db.collection("c").unwrap();
        let def = json!({"type": "persistent", "fields": ["value"]});
        c.indexes().ensure_index(def.as_object().unwrap()).unwrap();

        let toggles = RuleToggles::from_tokens(["-use-indexes"]);
        let plan = optimized_with(&db, "FOR d IN c FILTER d.value == 7 RETURN d", &toggles)
            .unwrap();
        assert!(!plan.contains(|k| matches!(k, NodeKind::IndexScan { .. })));
    }
}
