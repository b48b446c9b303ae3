//! Grouping, aggregation, DISTINCT and counting.
//!
//! The four collect methods share one operator. `sorted` expects
//! key-ordered input and emits groups in that order; `hash` groups without
//! an input-order requirement and emits in key order so results stay
//! deterministic; `distinct` deduplicates a single expression preserving
//! first appearance; `count` folds everything into one counter row. A
//! collect closes the variable scope: output rows carry only the collect's
//! own bindings.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::{Map, Value};

use crate::plan::CollectMethod;
use crate::query::ast::{AggregateAssignment, Expr};
use crate::query::errors::{QueryError, QueryResult};
use crate::query::expr::to_number;
use crate::query::value::{cmp_values, group_key, number_value};

use super::context::ExecutionContext;
use super::eval::eval_in_row;
use super::scan::{drain, serve};
use super::{Batch, Operator, Row};

pub struct CollectExec {
    input: Box<dyn Operator>,
    groups: Vec<(String, Expr)>,
    aggregates: Vec<AggregateAssignment>,
    into: Option<String>,
    with_count_into: Option<String>,
    method: CollectMethod,
    buffer: Option<VecDeque<Row>>,
}

impl CollectExec {
    pub fn new(
        input: Box<dyn Operator>,
        groups: Vec<(String, Expr)>,
        aggregates: Vec<AggregateAssignment>,
        into: Option<String>,
        with_count_into: Option<String>,
        method: CollectMethod,
    ) -> Self {
        Self {
            input,
            groups,
            aggregates,
            into,
            with_count_into,
            method,
            buffer: None,
        }
    }

    fn compute(&self, rows: Vec<Row>, ctx: &ExecutionContext) -> QueryResult<VecDeque<Row>> {
        match self.method {
            CollectMethod::Count => {
                let variable = self
                    .with_count_into
                    .clone()
                    .expect("count collect without counter variable");
                let mut row = Row::new();
                row.insert(variable, Value::from(rows.len()));
                Ok(VecDeque::from([row]))
            }
            CollectMethod::Distinct => self.compute_distinct(rows, ctx),
            CollectMethod::Sorted | CollectMethod::Hash => self.compute_grouped(rows, ctx),
        }
    }

    fn compute_distinct(
        &self,
        rows: Vec<Row>,
        ctx: &ExecutionContext,
    ) -> QueryResult<VecDeque<Row>> {
        let (variable, expression) = &self.groups[0];
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = VecDeque::new();
        for row in &rows {
            let value = eval_in_row(expression, row, ctx)?;
            if seen.insert(group_key(&value)) {
                let mut out_row = Row::new();
                out_row.insert(variable.clone(), value);
                out.push_back(out_row);
            }
        }
        Ok(out)
    }

    fn compute_grouped(
        &self,
        rows: Vec<Row>,
        ctx: &ExecutionContext,
    ) -> QueryResult<VecDeque<Row>> {
        let mut order: Vec<String> = Vec::new();
        let mut states: HashMap<String, GroupState> = HashMap::new();
        for row in &rows {
            let mut keys = Vec::with_capacity(self.groups.len());
            for (_, expression) in &self.groups {
                keys.push(eval_in_row(expression, row, ctx)?);
            }
            let bucket: String = keys.iter().map(|k| group_key(k)).collect();
            let state = states.entry(bucket.clone()).or_insert_with(|| {
                order.push(bucket.clone());
                GroupState::new(keys.clone(), self.aggregates.len())
            });
            state.count += 1;
            for (i, aggregate) in self.aggregates.iter().enumerate() {
                let value = match &aggregate.argument {
                    Some(arg) => Some(eval_in_row(arg, row, ctx)?),
                    None => None,
                };
                state.accumulated[i].push(value);
            }
            if self.into.is_some() {
                state.members.push(row_object(row));
            }
        }

        if self.method == CollectMethod::Hash {
            // hash grouping has no inherent order; emit in group-key order
            order.sort_by(|a, b| {
                let ka = &states[a].keys;
                let kb = &states[b].keys;
                for (va, vb) in ka.iter().zip(kb.iter()) {
                    let ord = cmp_values(va, vb);
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let mut out = VecDeque::new();
        for bucket in order {
            let state = &states[&bucket];
            let mut row = Row::new();
            for ((name, _), key) in self.groups.iter().zip(state.keys.iter()) {
                row.insert(name.clone(), key.clone());
            }
            for (i, aggregate) in self.aggregates.iter().enumerate() {
                row.insert(
                    aggregate.variable.clone(),
                    fold_aggregate(&aggregate.function, &state.accumulated[i])?,
                );
            }
            if let Some(name) = &self.into {
                row.insert(name.clone(), Value::Array(state.members.clone()));
            }
            if let Some(name) = &self.with_count_into {
                row.insert(name.clone(), Value::from(state.count));
            }
            out.push_back(row);
        }
        Ok(out)
    }
}

struct GroupState {
    keys: Vec<Value>,
    /// Per aggregate, the evaluated argument of every member row; None for
    /// argument-less COUNT.
    accumulated: Vec<Vec<Option<Value>>>,
    members: Vec<Value>,
    count: u64,
}

impl GroupState {
    fn new(keys: Vec<Value>, aggregates: usize) -> Self {
        Self {
            keys,
            accumulated: vec![Vec::new(); aggregates],
            members: Vec::new(),
            count: 0,
        }
    }
}

/// The row as a plain object, for `INTO` group materialization. Internal
/// bindings stay out.
fn row_object(row: &Row) -> Value {
    let mut map = Map::new();
    let mut names: Vec<&String> = row.keys().filter(|k| !k.starts_with('$')).collect();
    names.sort();
    for name in names {
        map.insert(name.clone(), row[name].clone());
    }
    Value::Object(map)
}

fn fold_aggregate(function: &str, values: &[Option<Value>]) -> QueryResult<Value> {
    let result = match function {
        "COUNT" | "LENGTH" => Value::from(values.len()),
        "SUM" => {
            let total: f64 = values
                .iter()
                .filter_map(|v| v.as_ref().and_then(to_number))
                .sum();
            number_value(total)
        }
        "MIN" | "MAX" => {
            let min = function == "MIN";
            let mut best: Option<&Value> = None;
            for value in values.iter().flatten() {
                if value.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let ord = cmp_values(value, current);
                        if (min && ord.is_lt()) || (!min && ord.is_gt()) {
                            value
                        } else {
                            current
                        }
                    }
                });
            }
            best.cloned().unwrap_or(Value::Null)
        }
        "AVERAGE" | "AVG" => {
            let numbers: Vec<f64> = values
                .iter()
                .filter_map(|v| v.as_ref().and_then(to_number))
                .collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                number_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        other => {
            return Err(QueryError::parse(format!(
                "unknown AGGREGATE function '{}()'",
                other
            )))
        }
    };
    Ok(result)
}

impl Operator for CollectExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        for aggregate in &self.aggregates {
            // reject unknown aggregate functions before any row flows
            fold_aggregate(&aggregate.function, &[])?;
        }
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        if self.buffer.is_none() {
            let rows = drain(self.input.as_mut(), ctx)?;
            self.buffer = Some(self.compute(rows, ctx)?);
        }
        Ok(serve(self.buffer.as_mut().expect("buffer just filled"), n))
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
        self.buffer = None;
    }
}
