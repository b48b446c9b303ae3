//! Enumeration operators: collection scans, index scans, list enumeration.

use std::collections::VecDeque;

use serde_json::{Map, Value};

use crate::document::Document;
use crate::plan::ScanOptions;
use crate::index::IndexDescriptor;
use crate::query::errors::QueryResult;
use crate::query::value::{cmp_values, values_equal};

use super::context::ExecutionContext;
use super::eval::eval_in_row;
use super::{catalog_err, Batch, Operator, Row};

/// Materializes a document for the pipeline: the whole body, or just the
/// projected attribute paths when the scan carries projections.
pub(crate) fn project_document(document: &Document, projections: &[String]) -> Value {
    if projections.is_empty() {
        return document.as_value();
    }
    let mut out = Map::new();
    for path in projections {
        let value = document.get_path(path).cloned().unwrap_or(Value::Null);
        insert_path(&mut out, path, value);
    }
    Value::Object(out)
}

fn insert_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Pulls every remaining row out of an operator.
pub(crate) fn drain(input: &mut dyn Operator, ctx: &ExecutionContext) -> QueryResult<Vec<Row>> {
    let mut rows = Vec::new();
    loop {
        let batch = input.get_batch(1000, ctx)?;
        rows.extend(batch.rows);
        if !batch.has_more {
            return Ok(rows);
        }
    }
}

/// Serves rows out of a materialized buffer in `get_batch`-sized slices.
pub(crate) fn serve(buffer: &mut VecDeque<Row>, n: usize) -> Batch {
    let take = n.min(buffer.len());
    let rows: Vec<Row> = buffer.drain(..take).collect();
    if buffer.is_empty() {
        Batch::done(rows)
    } else {
        Batch::more(rows)
    }
}

pub struct EnumerateCollectionExec {
    input: Box<dyn Operator>,
    collection: String,
    variable: String,
    options: ScanOptions,
    /// Restrict to one shard (a gather branch); None scans all shards.
    shard: Option<usize>,
    /// Pre-statement snapshot, taken when the scan must not observe the
    /// statement's own writes.
    snapshot: Option<Vec<Document>>,
    buffer: Option<VecDeque<Row>>,
}

impl EnumerateCollectionExec {
    pub fn new(
        input: Box<dyn Operator>,
        collection: String,
        variable: String,
        options: ScanOptions,
        shard: Option<usize>,
    ) -> Self {
        Self {
            input,
            collection,
            variable,
            options,
            shard,
            snapshot: None,
            buffer: None,
        }
    }

    fn load(&self, ctx: &ExecutionContext) -> QueryResult<Vec<Document>> {
        load_documents(ctx, &self.collection, self.shard)
    }
}

fn load_documents(
    ctx: &ExecutionContext,
    collection: &str,
    shard: Option<usize>,
) -> QueryResult<Vec<Document>> {
    let collection = ctx.database.collection(collection).map_err(catalog_err)?;
    let shards: Vec<usize> = match shard {
        Some(shard) => vec![shard],
        None => (0..collection.number_of_shards()).collect(),
    };
    let mut out = Vec::new();
    for shard in shards {
        out.extend(collection.scan_shard(shard).map_err(catalog_err)?);
    }
    Ok(out)
}

impl Operator for EnumerateCollectionExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)?;
        if !self.options.read_own_writes {
            self.snapshot = Some(self.load(ctx)?);
        }
        Ok(())
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        if self.buffer.is_none() {
            let input_rows = drain(self.input.as_mut(), ctx)?;
            let documents = match &self.snapshot {
                Some(snapshot) => snapshot.clone(),
                None => self.load(ctx)?,
            };
            let mut out = VecDeque::new();
            for row in &input_rows {
                for document in &documents {
                    let mut row = row.clone();
                    row.insert(
                        self.variable.clone(),
                        project_document(document, &self.options.projections),
                    );
                    out.push_back(row);
                }
            }
            self.buffer = Some(out);
        }
        Ok(serve(self.buffer.as_mut().expect("buffer just filled"), n))
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
        self.snapshot = None;
        self.buffer = None;
    }
}

pub struct IndexScanExec {
    input: Box<dyn Operator>,
    collection: String,
    variable: String,
    index: IndexDescriptor,
    equalities: Vec<(String, Value)>,
    ranges: Vec<(String, Option<Value>, bool, Option<Value>, bool)>,
    options: ScanOptions,
    shard: Option<usize>,
    snapshot: Option<Vec<Document>>,
    buffer: Option<VecDeque<Row>>,
}

impl IndexScanExec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: Box<dyn Operator>,
        collection: String,
        variable: String,
        index: IndexDescriptor,
        equalities: Vec<(String, Value)>,
        ranges: Vec<(String, Option<Value>, bool, Option<Value>, bool)>,
        options: ScanOptions,
        shard: Option<usize>,
    ) -> Self {
        Self {
            input,
            collection,
            variable,
            index,
            equalities,
            ranges,
            options,
            shard,
            snapshot: None,
            buffer: None,
        }
    }

    fn matching(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut out: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.matches(doc))
            .collect();
        // entries come back in index order: the indexed fields, in
        // declaration order, under the query value order
        let fields: Vec<String> = self
            .index
            .prefix_fields
            .iter()
            .chain(self.index.fields.iter())
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            for field in &fields {
                let va = a.get_path(field).cloned().unwrap_or(Value::Null);
                let vb = b.get_path(field).cloned().unwrap_or(Value::Null);
                let ord = cmp_values(&va, &vb);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            a.key().cmp(b.key())
        });
        out
    }

    fn matches(&self, document: &Document) -> bool {
        if self.index.sparse {
            let indexed_present = self
                .index
                .prefix_fields
                .iter()
                .chain(self.index.fields.iter())
                .all(|field| document.get_path(field).is_some());
            if !indexed_present {
                return false;
            }
        }
        for (field, expected) in &self.equalities {
            let actual = document.get_path(field).cloned().unwrap_or(Value::Null);
            if !values_equal(&actual, expected) {
                return false;
            }
        }
        for (field, lower, lower_inclusive, upper, upper_inclusive) in &self.ranges {
            let actual = document.get_path(field).cloned().unwrap_or(Value::Null);
            if let Some(bound) = lower {
                let ord = cmp_values(&actual, bound);
                if ord.is_lt() || (ord.is_eq() && !lower_inclusive) {
                    return false;
                }
            }
            if let Some(bound) = upper {
                let ord = cmp_values(&actual, bound);
                if ord.is_gt() || (ord.is_eq() && !upper_inclusive) {
                    return false;
                }
            }
        }
        true
    }
}

impl Operator for IndexScanExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)?;
        if !self.options.read_own_writes {
            let documents = load_documents(ctx, &self.collection, self.shard)?;
            self.snapshot = Some(self.matching(documents));
        }
        Ok(())
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        if self.buffer.is_none() {
            let input_rows = drain(self.input.as_mut(), ctx)?;
            let documents = match &self.snapshot {
                Some(snapshot) => snapshot.clone(),
                None => self.matching(load_documents(ctx, &self.collection, self.shard)?),
            };
            let mut out = VecDeque::new();
            for row in &input_rows {
                for document in &documents {
                    let mut row = row.clone();
                    row.insert(
                        self.variable.clone(),
                        project_document(document, &self.options.projections),
                    );
                    out.push_back(row);
                }
            }
            self.buffer = Some(out);
        }
        Ok(serve(self.buffer.as_mut().expect("buffer just filled"), n))
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
        self.snapshot = None;
        self.buffer = None;
    }
}

/// `FOR x IN <expression>` over an array value.
pub struct EnumerateListExec {
    input: Box<dyn Operator>,
    variable: String,
    expression: crate::query::ast::Expr,
    buffer: Option<VecDeque<Row>>,
}

impl EnumerateListExec {
    pub fn new(
        input: Box<dyn Operator>,
        variable: String,
        expression: crate::query::ast::Expr,
    ) -> Self {
        Self {
            input,
            variable,
            expression,
            buffer: None,
        }
    }
}

impl Operator for EnumerateListExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        if self.buffer.is_none() {
            let input_rows = drain(self.input.as_mut(), ctx)?;
            let mut out = VecDeque::new();
            for row in &input_rows {
                let value = eval_in_row(&self.expression, row, ctx)?;
                let items = match value {
                    Value::Array(items) => items,
                    // enumerating a non-array yields nothing
                    _ => Vec::new(),
                };
                for item in items {
                    let mut row = row.clone();
                    row.insert(self.variable.clone(), item);
                    out.push_back(row);
                }
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

/// The leaf of every plan: exactly one empty row.
pub struct SingletonExec {
    produced: bool,
}

impl SingletonExec {
    pub fn new() -> Self {
        Self { produced: false }
    }
}

impl Operator for SingletonExec {
    fn initialize(&mut self, _ctx: &ExecutionContext) -> QueryResult<()> {
        self.produced = false;
        Ok(())
    }

    fn get_batch(&mut self, _n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        if self.produced {
            return Ok(Batch::done(Vec::new()));
        }
        self.produced = true;
        Ok(Batch::done(vec![Row::new()]))
    }

    fn shutdown(&mut self) {}
}
