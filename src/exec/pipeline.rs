//! Row-shaping operators: filter, calculation, sort, limit, return.

use std::collections::HashSet;
use std::collections::VecDeque;

use crate::query::ast::{Expr, SortElement};
use crate::query::errors::QueryResult;
use crate::query::value::{cmp_values, group_key, is_truthy};

use super::context::ExecutionContext;
use super::eval::eval_in_row;
use super::scan::{drain, serve};
use super::{Batch, Operator, Row, RESULT_BINDING};

pub struct FilterExec {
    input: Box<dyn Operator>,
    expression: Expr,
}

impl FilterExec {
    pub fn new(input: Box<dyn Operator>, expression: Expr) -> Self {
        Self { input, expression }
    }
}

impl Operator for FilterExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        // skip over batches the predicate empties entirely
        loop {
            let batch = self.input.get_batch(n, ctx)?;
            let mut rows = Vec::new();
            for row in batch.rows {
                if is_truthy(&eval_in_row(&self.expression, &row, ctx)?) {
                    rows.push(row);
                }
            }
            if !rows.is_empty() || !batch.has_more {
                return Ok(Batch {
                    rows,
                    has_more: batch.has_more,
                });
            }
        }
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

pub struct CalculationExec {
    input: Box<dyn Operator>,
    variable: String,
    expression: Expr,
}

impl CalculationExec {
    pub fn new(input: Box<dyn Operator>, variable: String, expression: Expr) -> Self {
        Self {
            input,
            variable,
            expression,
        }
    }
}

impl Operator for CalculationExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        let batch = self.input.get_batch(n, ctx)?;
        let mut rows = Vec::with_capacity(batch.rows.len());
        for mut row in batch.rows {
            let value = eval_in_row(&self.expression, &row, ctx)?;
            row.insert(self.variable.clone(), value);
            rows.push(row);
        }
        Ok(Batch {
            rows,
            has_more: batch.has_more,
        })
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

pub struct SortExec {
    input: Box<dyn Operator>,
    elements: Vec<SortElement>,
    buffer: Option<VecDeque<Row>>,
}

impl SortExec {
    pub fn new(input: Box<dyn Operator>, elements: Vec<SortElement>) -> Self {
        Self {
            input,
            elements,
            buffer: None,
        }
    }
}

impl Operator for SortExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        if self.buffer.is_none() {
            let rows = drain(self.input.as_mut(), ctx)?;
            // evaluate the sort keys once per row, then sort stably
            let mut keyed = Vec::with_capacity(rows.len());
            for row in rows {
                let mut keys = Vec::with_capacity(self.elements.len());
                for element in &self.elements {
                    keys.push(eval_in_row(&element.expr, &row, ctx)?);
                }
                keyed.push((keys, row));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (element, (ka, kb)) in self.elements.iter().zip(a.iter().zip(b.iter())) {
                    let mut ord = cmp_values(ka, kb);
                    if !element.ascending {
                        ord = ord.reverse();
                    }
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            self.buffer = Some(keyed.into_iter().map(|(_, row)| row).collect());
        }
        Ok(serve(self.buffer.as_mut().expect("buffer just filled"), n))
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
        self.buffer = None;
    }
}

pub struct LimitExec {
    input: Box<dyn Operator>,
    offset: u64,
    count: u64,
    skipped: u64,
    emitted: u64,
}

impl LimitExec {
    pub fn new(input: Box<dyn Operator>, offset: u64, count: u64) -> Self {
        Self {
            input,
            offset,
            count,
            skipped: 0,
            emitted: 0,
        }
    }
}

impl Operator for LimitExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.skipped = 0;
        self.emitted = 0;
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        loop {
            if self.emitted >= self.count {
                return Ok(Batch::done(Vec::new()));
            }
            let batch = self.input.get_batch(n, ctx)?;
            let mut rows = Vec::new();
            for row in batch.rows {
                if self.skipped < self.offset {
                    self.skipped += 1;
                    continue;
                }
                if self.emitted < self.count {
                    rows.push(row);
                    self.emitted += 1;
                }
            }
            let exhausted = !batch.has_more || self.emitted >= self.count;
            if !rows.is_empty() || exhausted {
                return Ok(Batch {
                    rows,
                    has_more: !exhausted,
                });
            }
        }
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

pub struct ReturnExec {
    input: Box<dyn Operator>,
    expression: Expr,
    /// Deduplicate output values; only set when the distinct-as-collect
    /// rule was disabled.
    distinct: bool,
    seen: HashSet<String>,
}

impl ReturnExec {
    pub fn new(input: Box<dyn Operator>, expression: Expr, distinct: bool) -> Self {
        Self {
            input,
            expression,
            distinct,
            seen: HashSet::new(),
        }
    }
}

impl Operator for ReturnExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.seen.clear();
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        let batch = self.input.get_batch(n, ctx)?;
        let mut rows = Vec::with_capacity(batch.rows.len());
        for row in batch.rows {
            let value = eval_in_row(&self.expression, &row, ctx)?;
            if self.distinct && !self.seen.insert(group_key(&value)) {
                continue;
            }
            let mut out = Row::new();
            out.insert(RESULT_BINDING.to_string(), value);
            rows.push(out);
        }
        Ok(Batch {
            rows,
            has_more: batch.has_more,
        })
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
    }
}
