//! Bind-parameter substitution.
//!
//! `@name` parameters inject values, `@@name` parameters inject collection
//! names. Substitution happens on the AST before planning. A parameter the
//! query declares but the caller does not supply is an error, as is a
//! supplied parameter the query never declares.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::ast::*;
use super::errors::{QueryError, QueryResult};

/// Replaces all bind parameters in `query` with values from `bind_vars`.
///
/// Collection parameters are passed with their `@` prefix as the key, i.e.
/// `{"@coll": "users", "key": "abc"}` binds `@@coll` and `@key`.
pub fn substitute_bind_parameters(
    query: &mut ParsedQuery,
    bind_vars: &Map<String, Value>,
) -> QueryResult<()> {
    let mut used: HashSet<String> = HashSet::new();
    substitute_block(query, bind_vars, &mut used)?;

    for key in bind_vars.keys() {
        if !used.contains(key) {
            return Err(QueryError::bind_undeclared(key));
        }
    }
    Ok(())
}

fn substitute_block(
    query: &mut ParsedQuery,
    bind_vars: &Map<String, Value>,
    used: &mut HashSet<String>,
) -> QueryResult<()> {
    for op in &mut query.operations {
        match op {
            Operation::For(for_op) => {
                match &mut for_op.source {
                    ForSource::Collection(name) => {
                        resolve_collection_name(name, bind_vars, used)?;
                    }
                    ForSource::Expression(expr) => substitute_expr(expr, bind_vars, used)?,
                }
                if let Some(options) = &mut for_op.options {
                    substitute_expr(options, bind_vars, used)?;
                }
            }
            Operation::Traversal(t) => {
                substitute_expr(&mut t.start, bind_vars, used)?;
                if let Some(options) = &mut t.options {
                    substitute_expr(options, bind_vars, used)?;
                }
            }
            Operation::PathSearch(p) => {
                substitute_expr(&mut p.start, bind_vars, used)?;
                substitute_expr(&mut p.target, bind_vars, used)?;
                if let Some(options) = &mut p.options {
                    substitute_expr(options, bind_vars, used)?;
                }
            }
            Operation::Let(l) => substitute_expr(&mut l.value, bind_vars, used)?,
            Operation::Filter(e) => substitute_expr(e, bind_vars, used)?,
            Operation::Sort(elements) => {
                for element in elements {
                    substitute_expr(&mut element.expr, bind_vars, used)?;
                }
            }
            Operation::Limit { .. } => {}
            Operation::Collect(c) => {
                for (_, e) in &mut c.groups {
                    substitute_expr(e, bind_vars, used)?;
                }
                for aggregate in &mut c.aggregates {
                    if let Some(arg) = &mut aggregate.argument {
                        substitute_expr(arg, bind_vars, used)?;
                    }
                }
                if let Some(options) = &mut c.options {
                    substitute_expr(options, bind_vars, used)?;
                }
            }
            Operation::Return(r) => substitute_expr(&mut r.expr, bind_vars, used)?,
            Operation::Insert(i) => {
                resolve_collection_name(&mut i.collection, bind_vars, used)?;
                substitute_expr(&mut i.document, bind_vars, used)?;
                if let Some(options) = &mut i.options {
                    substitute_expr(options, bind_vars, used)?;
                }
            }
            Operation::Upsert(u) => {
                resolve_collection_name(&mut u.collection, bind_vars, used)?;
                substitute_expr(&mut u.search, bind_vars, used)?;
                substitute_expr(&mut u.insert, bind_vars, used)?;
                substitute_expr(&mut u.update, bind_vars, used)?;
                if let Some(options) = &mut u.options {
                    substitute_expr(options, bind_vars, used)?;
                }
            }
        }
    }
    Ok(())
}

fn resolve_collection_name(
    name: &mut String,
    bind_vars: &Map<String, Value>,
    used: &mut HashSet<String>,
) -> QueryResult<()> {
    if let Some(stripped) = name.strip_prefix('@') {
        let key = format!("@{}", stripped);
        let value = bind_vars
            .get(&key)
            .ok_or_else(|| QueryError::bind_missing(&key))?;
        let collection = value
            .as_str()
            .ok_or_else(|| QueryError::parse("collection bind parameter must be a string"))?;
        used.insert(key);
        *name = collection.to_string();
    }
    Ok(())
}

fn substitute_expr(
    expr: &mut Expr,
    bind_vars: &Map<String, Value>,
    used: &mut HashSet<String>,
) -> QueryResult<()> {
    match expr {
        Expr::BindVar(name) => {
            let value = bind_vars
                .get(name.as_str())
                .ok_or_else(|| QueryError::bind_missing(name))?;
            used.insert(name.clone());
            *expr = Expr::Constant(value.clone());
        }
        Expr::Variable(name) if name.starts_with('@') => {
            resolve_collection_name(name, bind_vars, used)?;
            let resolved = name.clone();
            *expr = Expr::Constant(Value::String(resolved));
        }
        Expr::Constant(_) | Expr::Variable(_) => {}
        Expr::FieldAccess(base, _) => substitute_expr(base, bind_vars, used)?,
        Expr::IndexAccess(base, index) => {
            substitute_expr(base, bind_vars, used)?;
            substitute_expr(index, bind_vars, used)?;
        }
        Expr::Range(a, b) => {
            substitute_expr(a, bind_vars, used)?;
            substitute_expr(b, bind_vars, used)?;
        }
        Expr::Unary(_, inner) => substitute_expr(inner, bind_vars, used)?,
        Expr::Binary(_, a, b) => {
            substitute_expr(a, bind_vars, used)?;
            substitute_expr(b, bind_vars, used)?;
        }
        Expr::Ternary(c, t, f) => {
            substitute_expr(c, bind_vars, used)?;
            substitute_expr(t, bind_vars, used)?;
            substitute_expr(f, bind_vars, used)?;
        }
        Expr::FunctionCall(_, args) => {
            for arg in args {
                substitute_expr(arg, bind_vars, used)?;
            }
        }
        Expr::Array(items) => {
            for item in items {
                substitute_expr(item, bind_vars, used)?;
            }
        }
        Expr::Object(entries) => {
            for (key, value) in entries {
                if let ObjectKey::Dynamic(e) = key {
                    substitute_expr(e, bind_vars, used)?;
                }
                substitute_expr(value, bind_vars, used)?;
            }
        }
        Expr::Subquery(block) => substitute_block(block, bind_vars, used)?,
    }
    Ok(())
}
