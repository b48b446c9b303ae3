//! Row-aware expression evaluation.
//!
//! Scalar evaluation is `query::expr::eval`; this layer adds subquery
//! support: a subquery expression is executed eagerly against the current
//! row's bindings and replaced by its result array before the enclosing
//! expression is evaluated.

use serde_json::Value;

use crate::query::ast::{Expr, ObjectKey, Operation, ParsedQuery};
use crate::query::errors::QueryResult;
use crate::query::expr::eval;

use super::context::ExecutionContext;
use super::engine::run_subquery;
use super::Row;

/// Evaluates `expr` with the row's bindings, executing subqueries inline.
pub fn eval_in_row(expr: &Expr, row: &Row, ctx: &ExecutionContext) -> QueryResult<Value> {
    if contains_subquery(expr) {
        let resolved = resolve_subqueries(expr.clone(), row, ctx)?;
        eval(&resolved, row)
    } else {
        eval(expr, row)
    }
}

fn contains_subquery(expr: &Expr) -> bool {
    match expr {
        Expr::Subquery(_) => true,
        Expr::Constant(_) | Expr::Variable(_) | Expr::BindVar(_) => false,
        Expr::FieldAccess(base, _) => contains_subquery(base),
        Expr::IndexAccess(a, b) | Expr::Range(a, b) | Expr::Binary(_, a, b) => {
            contains_subquery(a) || contains_subquery(b)
        }
        Expr::Unary(_, inner) => contains_subquery(inner),
        Expr::Ternary(c, t, f) => {
            contains_subquery(c) || contains_subquery(t) || contains_subquery(f)
        }
        Expr::FunctionCall(_, args) => args.iter().any(contains_subquery),
        Expr::Array(items) => items.iter().any(contains_subquery),
        Expr::Object(entries) => entries.iter().any(|(key, value)| {
            let in_key = matches!(key, ObjectKey::Dynamic(e) if contains_subquery(e));
            in_key || contains_subquery(value)
        }),
    }
}

fn resolve_subqueries(expr: Expr, row: &Row, ctx: &ExecutionContext) -> QueryResult<Expr> {
    Ok(match expr {
        Expr::Subquery(mut query) => {
            bind_outer_variables(&mut query, row);
            let result = run_subquery(&query, ctx)?;
            Expr::Constant(Value::Array(result))
        }
        Expr::FieldAccess(base, field) => {
            Expr::FieldAccess(Box::new(resolve_subqueries(*base, row, ctx)?), field)
        }
        Expr::IndexAccess(a, b) => Expr::IndexAccess(
            Box::new(resolve_subqueries(*a, row, ctx)?),
            Box::new(resolve_subqueries(*b, row, ctx)?),
        ),
        Expr::Range(a, b) => Expr::Range(
            Box::new(resolve_subqueries(*a, row, ctx)?),
            Box::new(resolve_subqueries(*b, row, ctx)?),
        ),
        Expr::Unary(op, inner) => Expr::Unary(op, Box::new(resolve_subqueries(*inner, row, ctx)?)),
        Expr::Binary(op, a, b) => Expr::Binary(
            op,
            Box::new(resolve_subqueries(*a, row, ctx)?),
            Box::new(resolve_subqueries(*b, row, ctx)?),
        ),
        Expr::Ternary(c, t, f) => Expr::Ternary(
            Box::new(resolve_subqueries(*c, row, ctx)?),
            Box::new(resolve_subqueries(*t, row, ctx)?),
            Box::new(resolve_subqueries(*f, row, ctx)?),
        ),
        Expr::FunctionCall(name, args) => Expr::FunctionCall(
            name,
            args.into_iter()
                .map(|arg| resolve_subqueries(arg, row, ctx))
                .collect::<QueryResult<_>>()?,
        ),
        Expr::Array(items) => Expr::Array(
            items
                .into_iter()
                .map(|item| resolve_subqueries(item, row, ctx))
                .collect::<QueryResult<_>>()?,
        ),
        Expr::Object(entries) => Expr::Object(
            entries
                .into_iter()
                .map(|(key, value)| {
                    let key = match key {
                        ObjectKey::Dynamic(e) => {
                            ObjectKey::Dynamic(Box::new(resolve_subqueries(*e, row, ctx)?))
                        }
                        literal => literal,
                    };
                    Ok((key, resolve_subqueries(value, row, ctx)?))
                })
                .collect::<QueryResult<Vec<_>>>()?,
        ),
        leaf => leaf,
    })
}

/// Freezes the outer row's bindings into the subquery AST as constants.
/// Variables the subquery introduces itself shadow the outer scope and are
/// left alone.
fn bind_outer_variables(query: &mut ParsedQuery, row: &Row) {
    let mut introduced = Vec::new();
    for op in &query.operations {
        collect_introduced(op, &mut introduced);
    }
    for op in &mut query.operations {
        visit_expressions_mut(op, &mut |expr| freeze_variables(expr, row, &introduced));
    }
}

fn collect_introduced(op: &Operation, out: &mut Vec<String>) {
    match op {
        Operation::For(f) => out.push(f.variable.clone()),
        Operation::Traversal(t) => {
            out.push(t.vertex_variable.clone());
            out.extend(t.edge_variable.clone());
            out.extend(t.path_variable.clone());
        }
        Operation::PathSearch(p) => {
            out.push(p.vertex_variable.clone());
            out.extend(p.edge_variable.clone());
        }
        Operation::Let(l) => out.push(l.variable.clone()),
        Operation::Collect(c) => {
            out.extend(c.groups.iter().map(|(name, _)| name.clone()));
            out.extend(c.aggregates.iter().map(|a| a.variable.clone()));
            out.extend(c.into.clone());
            out.extend(c.with_count_into.clone());
        }
        _ => {}
    }
}

fn freeze_variables(expr: &mut Expr, row: &Row, introduced: &[String]) {
    match expr {
        Expr::Variable(name) => {
            if !introduced.contains(name) {
                if let Some(value) = row.get(name.as_str()) {
                    *expr = Expr::Constant(value.clone());
                }
            }
        }
        Expr::Constant(_) | Expr::BindVar(_) => {}
        Expr::FieldAccess(base, _) => freeze_variables(base, row, introduced),
        Expr::IndexAccess(a, b) | Expr::Range(a, b) | Expr::Binary(_, a, b) => {
            freeze_variables(a, row, introduced);
            freeze_variables(b, row, introduced);
        }
        Expr::Unary(_, inner) => freeze_variables(inner, row, introduced),
        Expr::Ternary(c, t, f) => {
            freeze_variables(c, row, introduced);
            freeze_variables(t, row, introduced);
            freeze_variables(f, row, introduced);
        }
        Expr::FunctionCall(_, args) => {
            for arg in args {
                freeze_variables(arg, row, introduced);
            }
        }
        Expr::Array(items) => {
            for item in items {
                freeze_variables(item, row, introduced);
            }
        }
        Expr::Object(entries) => {
            for (key, value) in entries {
                if let ObjectKey::Dynamic(e) = key {
                    freeze_variables(e, row, introduced);
                }
                freeze_variables(value, row, introduced);
            }
        }
        Expr::Subquery(inner) => {
            // nested subqueries see the same outer bindings
            let mut inner_introduced = introduced.to_vec();
            for op in &inner.operations {
                collect_introduced(op, &mut inner_introduced);
            }
            for op in &mut inner.operations {
                visit_expressions_mut(op, &mut |e| freeze_variables(e, row, &inner_introduced));
            }
        }
    }
}

fn visit_expressions_mut(op: &mut Operation, f: &mut dyn FnMut(&mut Expr)) {
    match op {
        Operation::For(for_op) => {
            if let crate::query::ast::ForSource::Expression(e) = &mut for_op.source {
                f(e);
            }
            if let Some(options) = &mut for_op.options {
                f(options);
            }
        }
        Operation::Traversal(t) => f(&mut t.start),
        Operation::PathSearch(p) => {
            f(&mut p.start);
            f(&mut p.target);
        }
        Operation::Let(l) => f(&mut l.value),
        Operation::Filter(e) => f(e),
        Operation::Sort(elements) => {
            for element in elements {
                f(&mut element.expr);
            }
        }
        Operation::Limit { .. } => {}
        Operation::Collect(c) => {
            for (_, e) in &mut c.groups {
                f(e);
            }
            for aggregate in &mut c.aggregates {
                if let Some(arg) = &mut aggregate.argument {
                    f(arg);
                }
            }
        }
        Operation::Return(r) => f(&mut r.expr),
        Operation::Insert(i) => f(&mut i.document),
        Operation::Upsert(u) => {
            f(&mut u.search);
            f(&mut u.insert);
            f(&mut u.update);
        }
    }
}
