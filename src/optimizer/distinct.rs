//! `distinct-as-collect`: lowers `RETURN DISTINCT expr` into a collect
//! whose sole group key is the expression, emitted as the output value.
//! With the rule disabled the Return node deduplicates by itself.

use crate::plan::{CollectMethod, ExecutionPlan, NodeKind};
use crate::query::ast::Expr;
use crate::query::errors::QueryResult;

/// Internal binding for the lowered distinct value.
const DISTINCT_VARIABLE: &str = "$distinct";

pub fn apply(plan: &mut ExecutionPlan) -> QueryResult<bool> {
    let Some(id) = plan.find(|k| matches!(k, NodeKind::Return { distinct: true, .. })) else {
        return Ok(false);
    };
    let expression = match &plan.node(id).kind {
        NodeKind::Return { expression, .. } => expression.clone(),
        _ => unreachable!(),
    };

    let below = plan.node(id).dependencies[0];
    plan.insert_above(
        below,
        NodeKind::Collect {
            groups: vec![(DISTINCT_VARIABLE.to_string(), expression)],
            aggregates: Vec::new(),
            into: None,
            with_count_into: None,
            method: CollectMethod::Distinct,
        },
    );
    plan.replace_kind(
        id,
        NodeKind::Return {
            expression: Expr::Variable(DISTINCT_VARIABLE.to_string()),
            distinct: false,
        },
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::testutil::{database, optimized, optimized_with};
    use crate::optimizer::RuleToggles;

    #[test]
    fn test_return_distinct_lowers_to_collect() {
        let db = database();
        let plan = optimized(&db, "FOR d IN c RETURN DISTINCT d.value").unwrap();
        let collect = plan.find(|k| matches!(k, NodeKind::Collect { .. })).unwrap();
        match &plan.node(collect).kind {
            NodeKind::Collect { method, groups, .. } => {
                assert_eq!(*method, CollectMethod::Distinct);
                assert_eq!(groups.len(), 1);
            }
            _ => unreachable!(),
        }
        match &plan.node(plan.root()).kind {
            NodeKind::Return { distinct, .. } => assert!(!distinct),
            _ => unreachable!(),
        }
        assert!(plan.applied_rules.iter().any(|r| r == "distinct-as-collect"));
    }

    #[test]
    fn test_no_distinct_no_change() {
        let db = database();
        let plan = optimized(&db, "FOR d IN c RETURN d.value").unwrap();
        assert!(!plan.contains(|k| matches!(k, NodeKind::Collect { .. })));
    }

    #[test]
    fn test_disabled_rule_keeps_distinct_on_return() {
        let db = database();
        let toggles = RuleToggles::from_tokens(["-distinct-as-collect"]);
        let plan = optimized_with(&db, "FOR d IN c RETURN DISTINCT d.value", &toggles).unwrap();
        assert!(!plan.contains(|k| matches!(k, NodeKind::Collect { .. })));
        match &plan.node(plan.root()).kind {
            NodeKind::Return { distinct, .. } => assert!(distinct),
            _ => unreachable!(),
        }
    }
}
