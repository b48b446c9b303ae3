//! Shared plan-inspection helpers for the rewrite rules.

use serde_json::Value;

use crate::plan::{ExecutionPlan, NodeKind};
use crate::query::ast::{BinaryOp, Expr};

/// Every expression a node evaluates, for attribute-usage analysis.
pub fn node_expressions(kind: &NodeKind) -> Vec<&Expr> {
    use NodeKind::*;
    match kind {
        Singleton
        | EnumerateCollection { .. }
        | IndexScan { .. }
        | Limit { .. } => Vec::new(),
        EnumerateList { expression, .. } => vec![expression],
        Filter { expression } => vec![expression],
        Calculation { expression, .. } => vec![expression],
        Sort { elements } => elements.iter().map(|e| &e.expr).collect(),
        Collect {
            groups, aggregates, ..
        } => {
            let mut out: Vec<&Expr> = groups.iter().map(|(_, e)| e).collect();
            out.extend(aggregates.iter().filter_map(|a| a.argument.as_ref()));
            out
        }
        Return { expression, .. } => vec![expression],
        Insert { document, .. } => vec![document],
        Upsert {
            search,
            insert,
            update,
            ..
        } => vec![search, insert, update],
        Traversal { op, .. } => vec![&op.start],
        PathSearch { op } => vec![&op.start, &op.target],
        Gather { sort_elements, .. } => sort_elements.iter().map(|e| &e.expr).collect(),
    }
}

/// The attribute paths of `variable` dereferenced by everything downstream
/// of `node_id`. `None` when some consumer needs the whole document, or
/// when a Collect with `INTO` materializes full rows.
pub fn downstream_attribute_usage(
    plan: &ExecutionPlan,
    node_id: usize,
    variable: &str,
) -> Option<Vec<String>> {
    let mut paths = Vec::new();
    for consumer in plan.consumers_of(node_id) {
        let kind = &plan.node(consumer).kind;
        // INTO groups capture whole input rows
        if matches!(kind, NodeKind::Collect { into: Some(_), .. }) {
            return None;
        }
        for expr in node_expressions(kind) {
            if !expr.attribute_usage_of(variable, &mut paths) {
                return None;
            }
        }
    }
    paths.sort();
    Some(paths)
}

/// One side of a comparison against the scan variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub path: String,
    pub op: BinaryOp,
    pub value: Value,
}

/// Splits an AND chain into conjuncts.
pub fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary(BinaryOp::And, left, right) => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        other => vec![other],
    }
}

/// Normalizes `expr` into `variable.path <op> constant` when it has that
/// shape (either operand order).
pub fn as_comparison(expr: &Expr, variable: &str) -> Option<Comparison> {
    let Expr::Binary(op, left, right) = expr else {
        return None;
    };
    let (path, value, op) = match (left.attribute_path_of(variable), right.as_ref()) {
        (Some(path), Expr::Constant(value)) => (path, value.clone(), *op),
        _ => match (right.attribute_path_of(variable), left.as_ref()) {
            (Some(path), Expr::Constant(value)) => (path, value.clone(), flip(*op)?),
            _ => return None,
        },
    };
    match op {
        BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            Some(Comparison { path, op, value })
        }
        _ => None,
    }
}

fn flip(op: BinaryOp) -> Option<BinaryOp> {
    Some(match op {
        BinaryOp::Eq => BinaryOp::Eq,
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        _ => return None,
    })
}

/// Rebuilds an AND chain from conjuncts; None when empty.
pub fn and_chain(conjuncts: Vec<Expr>) -> Option<Expr> {
    let mut iter = conjuncts.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, next| {
        Expr::Binary(BinaryOp::And, Box::new(acc), Box::new(next))
    }))
}
