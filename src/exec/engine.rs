//! Query entry points: parse, bind, plan, optimize, execute.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::catalog::Database;
use crate::observability::Logger;
use crate::optimizer::{optimize, OptimizerContext, RuleToggles};
use crate::plan::{build_plan, explain_plan, ExecutionPlan, NodeKind, PlanBuildContext};
use crate::query::ast::ParsedQuery;
use crate::query::bind::substitute_bind_parameters;
use crate::query::errors::{QueryResult, QueryWarning};
use crate::query::parse_query;

use super::collect::CollectExec;
use super::context::ExecutionContext;
use super::gather::GatherExec;
use super::modify::{InsertExec, UpsertExec};
use super::pipeline::{CalculationExec, FilterExec, LimitExec, ReturnExec, SortExec};
use super::scan::{EnumerateCollectionExec, EnumerateListExec, IndexScanExec, SingletonExec};
use super::traversal::{PathSearchExec, TraversalExec};
use super::{Operator, RESULT_BINDING};

/// Options accepted by execute/explain.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// `+name` / `-name` / `+all` / `-all` optimizer rule tokens.
    pub optimizer_rules: Vec<String>,
}

impl QueryOptions {
    /// Reads `{optimizer: {rules: [...]}}` from a JSON options object.
    pub fn from_value(value: &Value) -> Self {
        let rules = value
            .get("optimizer")
            .and_then(|o| o.get("rules"))
            .and_then(Value::as_array)
            .map(|tokens| {
                tokens
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            optimizer_rules: rules,
        }
    }

    fn toggles(&self) -> RuleToggles {
        RuleToggles::from_tokens(self.optimizer_rules.iter().map(String::as_str))
    }
}

/// Rows plus the non-fatal warnings collected along the way.
#[derive(Debug)]
pub struct QueryResultSet {
    pub result: Vec<Value>,
    pub warnings: Vec<QueryWarning>,
}

impl QueryResultSet {
    /// Wire form: `{result, hasMore, cached, extra: {warnings}}`.
    pub fn to_value(&self) -> Value {
        json!({
            "result": self.result,
            "hasMore": false,
            "cached": false,
            "extra": {
                "warnings": self.warnings
                    .iter()
                    .map(|w| json!({"code": w.code, "message": w.message}))
                    .collect::<Vec<_>>(),
            },
        })
    }
}

pub struct QueryEngine {
    database: Arc<Database>,
}

impl QueryEngine {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    fn prepare(
        &self,
        text: &str,
        bind_vars: &Map<String, Value>,
        options: &QueryOptions,
    ) -> QueryResult<ExecutionPlan> {
        let mut query = parse_query(text)?;
        substitute_bind_parameters(&mut query, bind_vars)?;
        let mut plan = build_plan(&query, &PlanBuildContext::new(&self.database))?;
        optimize(
            &mut plan,
            &options.toggles(),
            &OptimizerContext::new(&self.database),
        )?;
        Ok(plan)
    }

    pub fn execute(
        &self,
        text: &str,
        bind_vars: &Map<String, Value>,
        options: &QueryOptions,
    ) -> QueryResult<QueryResultSet> {
        self.execute_cancellable(text, bind_vars, options, Arc::new(AtomicBool::new(false)))
    }

    /// Execute with an externally owned abort flag. Raising the flag stops
    /// in-flight shard branches at their next batch boundary.
    pub fn execute_cancellable(
        &self,
        text: &str,
        bind_vars: &Map<String, Value>,
        options: &QueryOptions,
        cancel: Arc<AtomicBool>,
    ) -> QueryResult<QueryResultSet> {
        let plan = self.prepare(text, bind_vars, options)?;
        let ctx = ExecutionContext::with_cancel(&self.database, cancel);
        let result = execute_plan(&plan, &ctx);
        let warnings = ctx.take_warnings();
        match result {
            Ok(result) => {
                Logger::trace(
                    "query.executed",
                    &[
                        ("database", self.database.name()),
                        ("rows", &result.len().to_string()),
                    ],
                );
                Ok(QueryResultSet { result, warnings })
            }
            Err(error) => {
                Logger::warn(
                    "query.failed",
                    &[
                        ("database", self.database.name()),
                        ("code", error.code.as_str()),
                    ],
                );
                Err(error)
            }
        }
    }

    /// Plans without executing: `{plan: {nodes, rules}, warnings}`.
    pub fn explain(
        &self,
        text: &str,
        bind_vars: &Map<String, Value>,
        options: &QueryOptions,
    ) -> QueryResult<Value> {
        let plan = self.prepare(text, bind_vars, options)?;
        Ok(json!({
            "plan": explain_plan(&plan),
            "warnings": [],
        }))
    }
}

/// Runs a frozen plan to completion, guaranteeing shutdown on every exit
/// path.
pub(crate) fn execute_plan(
    plan: &ExecutionPlan,
    ctx: &ExecutionContext,
) -> QueryResult<Vec<Value>> {
    let mut root = build_operator(plan, plan.root(), ctx)?;
    let outcome = pull_to_end(root.as_mut(), ctx);
    root.shutdown();
    outcome
}

fn pull_to_end(root: &mut dyn Operator, ctx: &ExecutionContext) -> QueryResult<Vec<Value>> {
    root.initialize(ctx)?;
    let mut values = Vec::new();
    loop {
        let batch = root.get_batch(1000, ctx)?;
        for row in batch.rows {
            if let Some(value) = row.get(RESULT_BINDING) {
                values.push(value.clone());
            }
        }
        if !batch.has_more {
            return Ok(values);
        }
    }
}

/// Executes a subquery inside the surrounding query's context, sharing its
/// warnings and abort flag.
pub(crate) fn run_subquery(
    query: &ParsedQuery,
    ctx: &ExecutionContext,
) -> QueryResult<Vec<Value>> {
    let mut plan = build_plan(query, &PlanBuildContext::new(ctx.database))?;
    optimize(
        &mut plan,
        &RuleToggles::all(),
        &OptimizerContext::new(ctx.database),
    )?;
    execute_plan(&plan, ctx)
}

fn build_operator(
    plan: &ExecutionPlan,
    id: usize,
    ctx: &ExecutionContext,
) -> QueryResult<Box<dyn Operator>> {
    build_operator_sharded(plan, id, ctx, None)
}

fn build_operator_sharded(
    plan: &ExecutionPlan,
    id: usize,
    ctx: &ExecutionContext,
    shard: Option<usize>,
) -> QueryResult<Box<dyn Operator>> {
    let node = plan.node(id);
    let child = |shard: Option<usize>| -> QueryResult<Box<dyn Operator>> {
        build_operator_sharded(plan, node.dependencies[0], ctx, shard)
    };

    Ok(match &node.kind {
        NodeKind::Singleton => Box::new(SingletonExec::new()),
        NodeKind::EnumerateCollection {
            collection,
            variable,
            options,
        } => Box::new(EnumerateCollectionExec::new(
            child(None)?,
            collection.clone(),
            variable.clone(),
            options.clone(),
            shard,
        )),
        NodeKind::IndexScan {
            collection,
            variable,
            index,
            equalities,
            ranges,
            options,
            ..
        } => Box::new(IndexScanExec::new(
            child(None)?,
            collection.clone(),
            variable.clone(),
            index.clone(),
            equalities.clone(),
            ranges.clone(),
            options.clone(),
            shard,
        )),
        NodeKind::EnumerateList {
            variable,
            expression,
        } => Box::new(EnumerateListExec::new(
            child(None)?,
            variable.clone(),
            expression.clone(),
        )),
        NodeKind::Filter { expression } => {
            Box::new(FilterExec::new(child(None)?, expression.clone()))
        }
        NodeKind::Calculation {
            variable,
            expression,
        } => Box::new(CalculationExec::new(
            child(None)?,
            variable.clone(),
            expression.clone(),
        )),
        NodeKind::Sort { elements } => Box::new(SortExec::new(child(None)?, elements.clone())),
        NodeKind::Limit { offset, count } => {
            Box::new(LimitExec::new(child(None)?, *offset, *count))
        }
        NodeKind::Collect {
            groups,
            aggregates,
            into,
            with_count_into,
            method,
        } => Box::new(CollectExec::new(
            child(None)?,
            groups.clone(),
            aggregates.clone(),
            into.clone(),
            with_count_into.clone(),
            *method,
        )),
        NodeKind::Return {
            expression,
            distinct,
        } => Box::new(ReturnExec::new(
            child(None)?,
            expression.clone(),
            *distinct,
        )),
        NodeKind::Insert {
            collection,
            document,
        } => Box::new(InsertExec::new(
            child(None)?,
            collection.clone(),
            document.clone(),
        )),
        NodeKind::Upsert {
            collection,
            search,
            insert,
            update,
            replace,
            read_own_writes,
        } => Box::new(UpsertExec::new(
            child(None)?,
            collection.clone(),
            search.clone(),
            insert.clone(),
            update.clone(),
            *replace,
            *read_own_writes,
        )),
        NodeKind::Traversal { op, .. } => Box::new(TraversalExec::new(child(None)?, op.clone())),
        NodeKind::PathSearch { op } => Box::new(PathSearchExec::new(child(None)?, op.clone())),
        NodeKind::Gather {
            sort_elements,
            parallel,
        } => {
            let upstream = node.dependencies[0];
            let shard_count = match &plan.node(upstream).kind {
                NodeKind::EnumerateCollection { collection, .. }
                | NodeKind::IndexScan { collection, .. } => ctx
                    .database
                    .collection(collection)
                    .map(|c| c.number_of_shards())
                    .unwrap_or(1),
                _ => 1,
            };
            let mut branches = Vec::with_capacity(shard_count);
            for shard in 0..shard_count {
                branches.push(build_operator_sharded(plan, upstream, ctx, Some(shard))?);
            }
            Box::new(GatherExec::new(
                branches,
                sort_elements.clone(),
                *parallel,
            ))
        }
    })
}
