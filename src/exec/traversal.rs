//! Graph-walk operators: depth-ranged traversal and the shortest-path
//! family.
//!
//! Start and end vertices were type-checked at parse time for literals; a
//! dynamic value that turns out non-string, or the always-legal empty
//! string, yields zero rows plus a warning on the result set instead of
//! aborting the query.

use std::collections::VecDeque;

use serde_json::{json, Value};

use crate::document::Document;
use crate::query::ast::{Direction, PathSearchKind, PathSearchOp, TraversalOp};
use crate::query::errors::{QueryResult, QueryWarning};

use super::context::ExecutionContext;
use super::eval::eval_in_row;
use super::scan::{drain, serve};
use super::{catalog_err, Batch, Operator, Row};

/// Longest simple path the path-search operators will enumerate.
const MAX_PATH_EDGES: usize = 16;

/// Resolves a `collection/key` id to the stored document, when it exists.
fn vertex_document(ctx: &ExecutionContext, id: &str) -> Option<Document> {
    let (collection, key) = id.split_once('/')?;
    let collection = ctx.database.collection(collection).ok()?;
    collection.document(key).ok().flatten()
}

/// One hop from `vertex` over the named edge collections.
fn neighbors(
    ctx: &ExecutionContext,
    edge_collections: &[String],
    vertex: &str,
    direction: Direction,
) -> QueryResult<Vec<(Document, String)>> {
    let mut out = Vec::new();
    for name in edge_collections {
        let collection = ctx.database.collection(name).map_err(catalog_err)?;
        let outbound = matches!(direction, Direction::Outbound | Direction::Any);
        let inbound = matches!(direction, Direction::Inbound | Direction::Any);
        if outbound {
            for edge in collection.edges_for_vertex(vertex, true).map_err(catalog_err)? {
                if let Some(to) = edge.get("_to").and_then(Value::as_str) {
                    let to = to.to_string();
                    out.push((edge, to));
                }
            }
        }
        if inbound {
            for edge in collection.edges_for_vertex(vertex, false).map_err(catalog_err)? {
                if let Some(from) = edge.get("_from").and_then(Value::as_str) {
                    let from = from.to_string();
                    out.push((edge, from));
                }
            }
        }
    }
    Ok(out)
}

/// Validates a runtime start/end vertex value. `Ok(None)` means "skip this
/// row and attach a warning".
fn vertex_id(
    ctx: &ExecutionContext,
    value: &Value,
    context: &str,
) -> Option<String> {
    match value.as_str() {
        Some(id) if !id.is_empty() => Some(id.to_string()),
        _ => {
            ctx.warn(QueryWarning::invalid_start_vertex(context));
            None
        }
    }
}

fn path_value(vertices: &[Value], edges: &[Value]) -> Value {
    json!({ "vertices": vertices, "edges": edges })
}

pub struct TraversalExec {
    input: Box<dyn Operator>,
    op: TraversalOp,
    buffer: Option<VecDeque<Row>>,
}

impl TraversalExec {
    pub fn new(input: Box<dyn Operator>, op: TraversalOp) -> Self {
        Self {
            input,
            op,
            buffer: None,
        }
    }

    fn walk(&self, ctx: &ExecutionContext, row: &Row, out: &mut VecDeque<Row>) -> QueryResult<()> {
        let start = eval_in_row(&self.op.start, row, ctx)?;
        let Some(start) = vertex_id(ctx, &start, "traversal") else {
            return Ok(());
        };

        let start_vertex = vertex_document(ctx, &start)
            .map(Document::into_value)
            .unwrap_or(Value::Null);

        if self.op.min_depth == 0 {
            self.emit(row, start_vertex.clone(), Value::Null, &[start_vertex.clone()], &[], out);
        }

        // breadth-first, vertex uniqueness per path
        struct State {
            vertex: String,
            path_vertex_ids: Vec<String>,
            path_vertices: Vec<Value>,
            path_edges: Vec<Value>,
        }
        let mut frontier = vec![State {
            vertex: start.clone(),
            path_vertex_ids: vec![start.clone()],
            path_vertices: vec![start_vertex],
            path_edges: Vec::new(),
        }];

        for depth in 1..=self.op.max_depth {
            let mut next = Vec::new();
            for state in &frontier {
                for (edge, neighbor) in neighbors(
                    ctx,
                    &self.op.edge_collections,
                    &state.vertex,
                    self.op.direction,
                )? {
                    if state.path_vertex_ids.contains(&neighbor) {
                        continue;
                    }
                    let vertex_doc = vertex_document(ctx, &neighbor)
                        .map(Document::into_value)
                        .unwrap_or(Value::Null);
                    let edge_doc = edge.into_value();

                    let mut path_vertex_ids = state.path_vertex_ids.clone();
                    path_vertex_ids.push(neighbor.clone());
                    let mut path_vertices = state.path_vertices.clone();
                    path_vertices.push(vertex_doc.clone());
                    let mut path_edges = state.path_edges.clone();
                    path_edges.push(edge_doc.clone());

                    if depth >= self.op.min_depth {
                        self.emit(row, vertex_doc, edge_doc, &path_vertices, &path_edges, out);
                    }
                    next.push(State {
                        vertex: neighbor,
                        path_vertex_ids,
                        path_vertices,
                        path_edges,
                    });
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn emit(
        &self,
        base: &Row,
        vertex: Value,
        edge: Value,
        path_vertices: &[Value],
        path_edges: &[Value],
        out: &mut VecDeque<Row>,
    ) {
        let mut row = base.clone();
        row.insert(self.op.vertex_variable.clone(), vertex);
        if let Some(name) = &self.op.edge_variable {
            row.insert(name.clone(), edge);
        }
        if let Some(name) = &self.op.path_variable {
            row.insert(name.clone(), path_value(path_vertices, path_edges));
        }
        out.push_back(row);
    }
}

impl Operator for TraversalExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        if self.buffer.is_none() {
            let input_rows = drain(self.input.as_mut(), ctx)?;
            let mut out = VecDeque::new();
            for row in &input_rows {
                self.walk(ctx, row, &mut out)?;
            }
            self.buffer = Some(out);
        }
        Ok(serve(self.buffer.as_mut().expect("buffer just filled"), n))
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
        self.buffer = None;
    }
}

/// A discovered path, vertices and edges fully materialized.
struct FoundPath {
    vertex_ids: Vec<String>,
    vertices: Vec<Value>,
    edges: Vec<Value>,
}

pub struct PathSearchExec {
    input: Box<dyn Operator>,
    op: PathSearchOp,
    buffer: Option<VecDeque<Row>>,
}

impl PathSearchExec {
    pub fn new(input: Box<dyn Operator>, op: PathSearchOp) -> Self {
        Self {
            input,
            op,
            buffer: None,
        }
    }

    /// All simple paths from `start` to `target`, shortest first.
    fn enumerate_paths(
        &self,
        ctx: &ExecutionContext,
        start: &str,
        target: &str,
    ) -> QueryResult<Vec<FoundPath>> {
        let mut found = Vec::new();
        let start_vertex = vertex_document(ctx, start)
            .map(Document::into_value)
            .unwrap_or(Value::Null);
        let mut stack = vec![FoundPath {
            vertex_ids: vec![start.to_string()],
            vertices: vec![start_vertex],
            edges: Vec::new(),
        }];
        while let Some(path) = stack.pop() {
            let current = path.vertex_ids.last().expect("non-empty path").clone();
            if current == target {
                found.push(path);
                continue;
            }
            if path.edges.len() >= MAX_PATH_EDGES {
                continue;
            }
            for (edge, neighbor) in
                neighbors(ctx, &self.op.edge_collections, &current, self.op.direction)?
            {
                if path.vertex_ids.contains(&neighbor) {
                    continue;
                }
                let vertex_doc = vertex_document(ctx, &neighbor)
                    .map(Document::into_value)
                    .unwrap_or(Value::Null);
                let mut vertex_ids = path.vertex_ids.clone();
                vertex_ids.push(neighbor);
                let mut vertices = path.vertices.clone();
                vertices.push(vertex_doc);
                let mut edges = path.edges.clone();
                edges.push(edge.into_value());
                stack.push(FoundPath {
                    vertex_ids,
                    vertices,
                    edges,
                });
            }
        }
        found.sort_by_key(|path| path.edges.len());
        Ok(found)
    }

    fn search(&self, ctx: &ExecutionContext, row: &Row, out: &mut VecDeque<Row>) -> QueryResult<()> {
        let kind_name = self.op.kind.as_str();
        let start = eval_in_row(&self.op.start, row, ctx)?;
        let Some(start) = vertex_id(ctx, &start, kind_name) else {
            return Ok(());
        };
        let target = eval_in_row(&self.op.target, row, ctx)?;
        let Some(target) = vertex_id(ctx, &target, kind_name) else {
            return Ok(());
        };

        let paths = self.enumerate_paths(ctx, &start, &target)?;
        let Some(shortest_len) = paths.first().map(|p| p.edges.len()) else {
            return Ok(());
        };

        match self.op.kind {
            PathSearchKind::ShortestPath => {
                // one row per vertex along the single shortest path
                let path = &paths[0];
                for (i, vertex) in path.vertices.iter().enumerate() {
                    let mut out_row = row.clone();
                    out_row.insert(self.op.vertex_variable.clone(), vertex.clone());
                    if let Some(name) = &self.op.edge_variable {
                        let edge = if i == 0 {
                            Value::Null
                        } else {
                            path.edges[i - 1].clone()
                        };
                        out_row.insert(name.clone(), edge);
                    }
                    out.push_back(out_row);
                }
            }
            PathSearchKind::KShortestPaths | PathSearchKind::AllShortestPaths => {
                // one row per path; K_SHORTEST_PATHS relies on a downstream
                // LIMIT for k, ALL_SHORTEST_PATHS keeps only minimal length
                for path in &paths {
                    if self.op.kind == PathSearchKind::AllShortestPaths
                        && path.edges.len() != shortest_len
                    {
                        continue;
                    }
                    let mut out_row = row.clone();
                    let mut value = path_value(&path.vertices, &path.edges);
                    value["weight"] = json!(path.edges.len());
                    out_row.insert(self.op.vertex_variable.clone(), value);
                    out.push_back(out_row);
                }
            }
        }
        Ok(())
    }
}

impl Operator for PathSearchExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        if self.buffer.is_none() {
            let input_rows = drain(self.input.as_mut(), ctx)?;
            let mut out = VecDeque::new();
            for row in &input_rows {
                self.search(ctx, row, &mut out)?;
            }
            self.buffer = Some(out);
        }
        Ok(serve(self.buffer.as_mut().expect("buffer just filled"), n))
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
        self.buffer = None;
    }
}
