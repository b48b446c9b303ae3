//! Plan node kinds.
//!
//! A closed sum type over every operator the engine knows. Optimizer rules
//! and the executor both match exhaustively, so adding a kind is a
//! compile-time-checked change everywhere.

use serde_json::Value;

use crate::index::IndexDescriptor;
use crate::query::ast::{
    AggregateAssignment, Expr, PathSearchOp, SortElement, TraversalOp,
};

/// How a collect groups its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMethod {
    /// Input sorted by the group keys; groups are emitted on key change.
    Sorted,
    /// Hash grouping; no input order requirement.
    Hash,
    /// DISTINCT lowering: one group key, emitted as the output value.
    Distinct,
    /// Key-less `WITH COUNT INTO`: a single running counter.
    Count,
}

impl CollectMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectMethod::Sorted => "sorted",
            CollectMethod::Hash => "hash",
            CollectMethod::Distinct => "distinct",
            CollectMethod::Count => "count",
        }
    }
}

/// Options common to the scan kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOptions {
    /// When a scan only needs these attribute paths, the engine skips full
    /// document materialization. Empty means "whole document".
    pub projections: Vec<String>,
    /// Reads observe writes made earlier in the same statement.
    pub read_own_writes: bool,
    /// Requested index, from `indexHint`.
    pub index_hint: Option<String>,
    /// Fail instead of falling back when the hinted index is unusable.
    pub force_index_hint: bool,
}

/// Index chosen for one traversal depth level.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthIndex {
    pub depth: u64,
    pub index_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Produces exactly one empty row; the leaf of every plan.
    Singleton,

    /// Full scan of a collection (all shards).
    EnumerateCollection {
        collection: String,
        variable: String,
        options: ScanOptions,
    },

    /// Scan of one index of a collection.
    IndexScan {
        collection: String,
        variable: String,
        index: IndexDescriptor,
        /// Equality condition values per indexed field, in field order.
        equalities: Vec<(String, Value)>,
        /// Range bounds per field: (field, lower, lower_inclusive, upper,
        /// upper_inclusive); None bounds are open.
        ranges: Vec<(String, Option<Value>, bool, Option<Value>, bool)>,
        /// The scan covers all downstream reads from the index alone.
        covering: bool,
        options: ScanOptions,
    },

    /// Enumerates a computed array value.
    EnumerateList { variable: String, expression: Expr },

    Filter {
        expression: Expr,
    },

    /// Binds `variable` to the value of `expression` for each row.
    Calculation {
        variable: String,
        expression: Expr,
    },

    Sort {
        elements: Vec<SortElement>,
    },

    Limit {
        offset: u64,
        count: u64,
    },

    Collect {
        groups: Vec<(String, Expr)>,
        aggregates: Vec<AggregateAssignment>,
        into: Option<String>,
        with_count_into: Option<String>,
        method: CollectMethod,
    },

    Return {
        expression: Expr,
        /// Deduplicate output values. Normally lowered to a distinct
        /// collect by the optimizer; honored here when that rule is off.
        distinct: bool,
    },

    Insert {
        collection: String,
        document: Expr,
    },

    Upsert {
        collection: String,
        search: Expr,
        insert: Expr,
        update: Expr,
        replace: bool,
        read_own_writes: bool,
    },

    Traversal {
        op: TraversalOp,
        /// Index chosen per depth level, reported in plan introspection.
        depth_indexes: Vec<DepthIndex>,
    },

    PathSearch {
        op: PathSearchOp,
    },

    /// Merges the per-shard streams of its dependency.
    Gather {
        /// Merge-sort by these elements instead of interleaving.
        sort_elements: Vec<SortElement>,
        /// Pull shard branches concurrently.
        parallel: bool,
    },
}

impl NodeKind {
    /// Wire name of the node type, as reported by explain.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Singleton => "SingletonNode",
            NodeKind::EnumerateCollection { .. } => "EnumerateCollectionNode",
            NodeKind::IndexScan { .. } => "IndexNode",
            NodeKind::EnumerateList { .. } => "EnumerateListNode",
            NodeKind::Filter { .. } => "FilterNode",
            NodeKind::Calculation { .. } => "CalculationNode",
            NodeKind::Sort { .. } => "SortNode",
            NodeKind::Limit { .. } => "LimitNode",
            NodeKind::Collect { .. } => "CollectNode",
            NodeKind::Return { .. } => "ReturnNode",
            NodeKind::Insert { .. } => "InsertNode",
            NodeKind::Upsert { .. } => "UpsertNode",
            NodeKind::Traversal { .. } => "TraversalNode",
            NodeKind::PathSearch { op } => match op.kind {
                crate::query::ast::PathSearchKind::ShortestPath => "ShortestPathNode",
                crate::query::ast::PathSearchKind::KShortestPaths => "KShortestPathsNode",
                crate::query::ast::PathSearchKind::AllShortestPaths => "AllShortestPathsNode",
            },
            NodeKind::Gather { .. } => "GatherNode",
        }
    }

    /// The variable this node introduces, if any.
    pub fn output_variable(&self) -> Option<&str> {
        match self {
            NodeKind::EnumerateCollection { variable, .. }
            | NodeKind::IndexScan { variable, .. }
            | NodeKind::EnumerateList { variable, .. }
            | NodeKind::Calculation { variable, .. } => Some(variable),
            NodeKind::Traversal { op, .. } => Some(&op.vertex_variable),
            NodeKind::PathSearch { op } => Some(&op.vertex_variable),
            _ => None,
        }
    }
}

/// One node of the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub id: usize,
    pub kind: NodeKind,
    pub dependencies: Vec<usize>,
}
