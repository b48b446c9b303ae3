//! Merging per-shard branches on the coordinator.
//!
//! Each branch is an independent operator over one shard. Serial mode
//! drains the branches in shard order; parallel mode drains them on scoped
//! threads, still assembling output in shard order so scheduling never
//! changes result content or which error surfaces (the lowest branch's
//! error wins, as it would serially). With sort elements set, the gather
//! merges the presorted branch streams instead of interleaving.

use std::collections::VecDeque;

use crate::query::ast::SortElement;
use crate::query::errors::QueryResult;
use crate::query::value::cmp_values;

use super::context::ExecutionContext;
use super::eval::eval_in_row;
use super::scan::{drain, serve};
use super::{Batch, Operator, Row};

pub struct GatherExec {
    branches: Vec<Box<dyn Operator>>,
    sort_elements: Vec<SortElement>,
    parallel: bool,
    buffer: Option<VecDeque<Row>>,
}

impl GatherExec {
    pub fn new(
        branches: Vec<Box<dyn Operator>>,
        sort_elements: Vec<SortElement>,
        parallel: bool,
    ) -> Self {
        Self {
            branches,
            sort_elements,
            parallel,
            buffer: None,
        }
    }

    fn pull_all(&mut self, ctx: &ExecutionContext) -> QueryResult<Vec<Vec<Row>>> {
        if self.parallel {
            let results: Vec<QueryResult<Vec<Row>>> = std::thread::scope(|scope| {
                let handles: Vec<_> = self
                    .branches
                    .iter_mut()
                    .map(|branch| scope.spawn(move || drain(branch.as_mut(), ctx)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("gather branch panicked"))
                    .collect()
            });
            // surface the lowest shard's error, matching serial order
            results.into_iter().collect()
        } else {
            let mut out = Vec::with_capacity(self.branches.len());
            for branch in &mut self.branches {
                out.push(drain(branch.as_mut(), ctx)?);
            }
            Ok(out)
        }
    }

    fn merge(&self, per_branch: Vec<Vec<Row>>, ctx: &ExecutionContext) -> QueryResult<Vec<Row>> {
        if self.sort_elements.is_empty() {
            return Ok(per_branch.into_iter().flatten().collect());
        }
        // branch streams are presorted; a stable sort over the
        // concatenation is an n-way merge with simpler bookkeeping
        let mut keyed = Vec::new();
        for rows in per_branch {
            for row in rows {
                let mut keys = Vec::with_capacity(self.sort_elements.len());
                for element in &self.sort_elements {
                    keys.push(eval_in_row(&element.expr, &row, ctx)?);
                }
                keyed.push((keys, row));
            }
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (element, (ka, kb)) in self.sort_elements.iter().zip(a.iter().zip(b.iter())) {
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
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl Operator for GatherExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        for branch in &mut self.branches {
            branch.initialize(ctx)?;
        }
        Ok(())
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        if self.buffer.is_none() {
            let per_branch = self.pull_all(ctx)?;
            let merged = self.merge(per_branch, ctx)?;
            self.buffer = Some(merged.into());
        }
        Ok(serve(self.buffer.as_mut().expect("buffer just filled"), n))
    }

    fn shutdown(&mut self) {
        // every branch is released even when one of them failed
        for branch in &mut self.branches {
            branch.shutdown();
        }
        self.buffer = None;
    }
}
