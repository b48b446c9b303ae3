//! Scalar expression evaluation.
//!
//! Evaluation is lenient the way the query language is: attribute access on
//! a non-object yields null, arithmetic on non-numbers coerces via
//! TO_NUMBER rules (null -> 0, bool -> 0/1, numeric strings parse, anything
//! else -> null), and logical operators return their operand values rather
//! than forced booleans.

use serde_json::{Map, Value};

use super::ast::{BinaryOp, Expr, ObjectKey, UnaryOp};
use super::errors::{QueryError, QueryResult};
use super::value::{cmp_values, is_truthy, number_value, values_equal};

/// Variable bindings visible to an expression.
pub trait VariableLookup {
    fn lookup(&self, name: &str) -> Option<Value>;
}

impl VariableLookup for std::collections::HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Numeric coercion.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(items) if items.is_empty() => Some(0.0),
        Value::Array(items) if items.len() == 1 => to_number(&items[0]),
        _ => None,
    }
}

pub fn eval(expr: &Expr, vars: &dyn VariableLookup) -> QueryResult<Value> {
    match expr {
        Expr::Constant(value) => Ok(value.clone()),
        Expr::BindVar(name) => Err(QueryError::bind_missing(name)),
        Expr::Variable(name) => vars.lookup(name).ok_or_else(|| {
            QueryError::parse(format!("unknown variable '{}'", name))
        }),
        Expr::FieldAccess(base, field) => {
            let base = eval(base, vars)?;
            Ok(base
                .as_object()
                .and_then(|map| map.get(field))
                .cloned()
                .unwrap_or(Value::Null))
        }
        Expr::IndexAccess(base, index) => {
            let base = eval(base, vars)?;
            let index = eval(index, vars)?;
            Ok(index_into(&base, &index))
        }
        Expr::Range(low, high) => {
            let low = to_number(&eval(low, vars)?).unwrap_or(0.0) as i64;
            let high = to_number(&eval(high, vars)?).unwrap_or(0.0) as i64;
            let items: Vec<Value> = (low..=high).map(Value::from).collect();
            Ok(Value::Array(items))
        }
        Expr::Unary(op, inner) => {
            let value = eval(inner, vars)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!is_truthy(&value)),
                UnaryOp::Neg => match to_number(&value) {
                    Some(n) => number_value(-n),
                    None => Value::Null,
                },
            })
        }
        Expr::Binary(op, left, right) => eval_binary(*op, left, right, vars),
        Expr::Ternary(cond, then_value, else_value) => {
            if is_truthy(&eval(cond, vars)?) {
                eval(then_value, vars)
            } else {
                eval(else_value, vars)
            }
        }
        Expr::FunctionCall(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, vars)?);
            }
            eval_function(name, &values)
        }
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, vars)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Object(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let key = match key {
                    ObjectKey::Literal(name) => name.clone(),
                    ObjectKey::Dynamic(expr) => match eval(expr, vars)? {
                        Value::String(s) => s,
                        other => super::value::format_number(
                            other.as_f64().unwrap_or(0.0),
                        ),
                    },
                };
                map.insert(key, eval(value, vars)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Subquery(_) => Err(QueryError::parse(
            "subquery in unsupported position; bind it with LET first",
        )),
    }
}

fn index_into(base: &Value, index: &Value) -> Value {
    match (base, index) {
        (Value::Array(items), Value::Number(_)) => {
            let raw = index.as_f64().unwrap_or(0.0) as i64;
            let idx = if raw < 0 { items.len() as i64 + raw } else { raw };
            if idx >= 0 && (idx as usize) < items.len() {
                items[idx as usize].clone()
            } else {
                Value::Null
            }
        }
        (Value::Object(map), Value::String(key)) => {
            map.get(key).cloned().unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    vars: &dyn VariableLookup,
) -> QueryResult<Value> {
    // logical operators short-circuit and return operand values
    match op {
        BinaryOp::And => {
            let l = eval(left, vars)?;
            return if is_truthy(&l) { eval(right, vars) } else { Ok(l) };
        }
        BinaryOp::Or => {
            let l = eval(left, vars)?;
            return if is_truthy(&l) { Ok(l) } else { eval(right, vars) };
        }
        _ => {}
    }

    let l = eval(left, vars)?;
    let r = eval(right, vars)?;
    let result = match op {
        BinaryOp::Eq => Value::Bool(values_equal(&l, &r)),
        BinaryOp::Ne => Value::Bool(!values_equal(&l, &r)),
        BinaryOp::Lt => Value::Bool(cmp_values(&l, &r).is_lt()),
        BinaryOp::Le => Value::Bool(cmp_values(&l, &r).is_le()),
        BinaryOp::Gt => Value::Bool(cmp_values(&l, &r).is_gt()),
        BinaryOp::Ge => Value::Bool(cmp_values(&l, &r).is_ge()),
        BinaryOp::In => Value::Bool(contains(&r, &l)),
        BinaryOp::NotIn => Value::Bool(!contains(&r, &l)),
        BinaryOp::Like => Value::Bool(like_matches(&l, &r)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            match (to_number(&l), to_number(&r)) {
                (Some(a), Some(b)) => {
                    let value = match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div => {
                            if b == 0.0 {
                                return Ok(Value::Null);
                            }
                            a / b
                        }
                        BinaryOp::Mod => {
                            if b == 0.0 {
                                return Ok(Value::Null);
                            }
                            a % b
                        }
                        _ => unreachable!(),
                    };
                    number_value(value)
                }
                _ => Value::Null,
            }
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };
    Ok(result)
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}

/// `%` matches any sequence, `_` a single character.
fn like_matches(value: &Value, pattern: &Value) -> bool {
    let (Some(text), Some(pattern)) = (value.as_str(), pattern.as_str()) else {
        return false;
    };
    fn matches(text: &[char], pattern: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some('%'), _) => {
                matches(text, &pattern[1..])
                    || (!text.is_empty() && matches(&text[1..], pattern))
            }
            (Some('_'), Some(_)) => matches(&text[1..], &pattern[1..]),
            (Some(p), Some(t)) if p == t => matches(&text[1..], &pattern[1..]),
            _ => false,
        }
    }
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    matches(&text, &pattern)
}

fn eval_function(name: &str, args: &[Value]) -> QueryResult<Value> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
    let result = match name {
        "LENGTH" | "COUNT" => match arg(0) {
            Value::Array(items) => Value::from(items.len()),
            Value::Object(map) => Value::from(map.len()),
            Value::String(s) => Value::from(s.chars().count()),
            Value::Null => Value::from(0),
            Value::Bool(b) => Value::from(if b { 1 } else { 0 }),
            Value::Number(_) => Value::from(1),
        },
        "MIN" => fold_order(&arg(0), true),
        "MAX" => fold_order(&arg(0), false),
        "SUM" => {
            let total = array_numbers(&arg(0)).into_iter().sum::<f64>();
            number_value(total)
        }
        "AVERAGE" | "AVG" => {
            let numbers = array_numbers(&arg(0));
            if numbers.is_empty() {
                Value::Null
            } else {
                number_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        "UNIQUE" => match arg(0) {
            Value::Array(items) => {
                let mut out: Vec<Value> = Vec::new();
                for item in items {
                    if !out.iter().any(|existing| values_equal(existing, &item)) {
                        out.push(item);
                    }
                }
                Value::Array(out)
            }
            _ => Value::Null,
        },
        "FIRST" => match arg(0) {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "LAST" => match arg(0) {
            Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "ABS" => match to_number(&arg(0)) {
            Some(n) => number_value(n.abs()),
            None => Value::Null,
        },
        "FLOOR" => match to_number(&arg(0)) {
            Some(n) => number_value(n.floor()),
            None => Value::Null,
        },
        "CEIL" => match to_number(&arg(0)) {
            Some(n) => number_value(n.ceil()),
            None => Value::Null,
        },
        "CONCAT" => {
            let mut out = String::new();
            for value in args {
                match value {
                    Value::Null => {}
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&stringify(other)),
                }
            }
            Value::String(out)
        }
        "UPPER" => match arg(0) {
            Value::String(s) => Value::String(s.to_uppercase()),
            _ => Value::Null,
        },
        "LOWER" => match arg(0) {
            Value::String(s) => Value::String(s.to_lowercase()),
            _ => Value::Null,
        },
        "TO_NUMBER" => match to_number(&arg(0)) {
            Some(n) => number_value(n),
            None => Value::Null,
        },
        "TO_STRING" => Value::String(stringify(&arg(0))),
        "IS_NULL" => Value::Bool(arg(0).is_null()),
        "IS_STRING" => Value::Bool(arg(0).is_string()),
        "IS_NUMBER" => Value::Bool(arg(0).is_number()),
        "NOT_NULL" => args
            .iter()
            .find(|value| !value.is_null())
            .cloned()
            .unwrap_or(Value::Null),
        other => {
            return Err(QueryError::parse(format!(
                "usage of unknown function '{}()'",
                other
            )))
        }
    };
    Ok(result)
}

fn fold_order(value: &Value, min: bool) -> Value {
    match value {
        Value::Array(items) => {
            let mut best: Option<&Value> = None;
            for item in items {
                if item.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let ord = cmp_values(item, current);
                        if (min && ord.is_lt()) || (!min && ord.is_gt()) {
                            item
                        } else {
                            current
                        }
                    }
                });
            }
            best.cloned().unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

fn array_numbers(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items.iter().filter_map(to_number).collect(),
        _ => Vec::new(),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(_) => super::value::format_number(value.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
