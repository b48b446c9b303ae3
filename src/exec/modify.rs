//! Data-modification operators: INSERT and UPSERT.

use serde_json::{Map, Value};

use crate::document::Document;
use crate::query::ast::Expr;
use crate::query::errors::{QueryError, QueryResult};
use crate::query::value::values_equal;

use super::context::ExecutionContext;
use super::eval::eval_in_row;
use super::{catalog_err, Batch, Operator};

pub struct InsertExec {
    input: Box<dyn Operator>,
    collection: String,
    document: Expr,
}

impl InsertExec {
    pub fn new(input: Box<dyn Operator>, collection: String, document: Expr) -> Self {
        Self {
            input,
            collection,
            document,
        }
    }
}

impl Operator for InsertExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        let collection = ctx
            .database
            .collection(&self.collection)
            .map_err(catalog_err)?;
        let batch = self.input.get_batch(n, ctx)?;
        let mut rows = Vec::with_capacity(batch.rows.len());
        for mut row in batch.rows {
            let body = eval_in_row(&self.document, &row, ctx)?;
            let inserted = collection.insert(body).map_err(catalog_err)?;
            row.insert("NEW".to_string(), inserted.into_value());
            row.insert("OLD".to_string(), Value::Null);
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

pub struct UpsertExec {
    input: Box<dyn Operator>,
    collection: String,
    search: Expr,
    insert: Expr,
    update: Expr,
    replace: bool,
    /// With read-own-writes, every iteration's lookup observes the writes
    /// of earlier iterations (N collisions fold into one document). Without
    /// it, lookups run against a pre-statement snapshot, so N collisions
    /// produce N independent inserts.
    read_own_writes: bool,
    snapshot: Option<Vec<Document>>,
}

impl UpsertExec {
    pub fn new(
        input: Box<dyn Operator>,
        collection: String,
        search: Expr,
        insert: Expr,
        update: Expr,
        replace: bool,
        read_own_writes: bool,
    ) -> Self {
        Self {
            input,
            collection,
            search,
            insert,
            update,
            replace,
            read_own_writes,
            snapshot: None,
        }
    }

    fn lookup(
        &self,
        ctx: &ExecutionContext,
        example: &Map<String, Value>,
    ) -> QueryResult<Option<Document>> {
        let candidates: Vec<Document> = match &self.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => {
                let collection = ctx
                    .database
                    .collection(&self.collection)
                    .map_err(catalog_err)?;
                let mut out = Vec::new();
                for shard in 0..collection.number_of_shards() {
                    out.extend(collection.scan_shard(shard).map_err(catalog_err)?);
                }
                out
            }
        };
        Ok(candidates.into_iter().find(|doc| {
            example.iter().all(|(field, expected)| {
                let actual = doc.get_path(field).cloned().unwrap_or(Value::Null);
                values_equal(&actual, expected)
            })
        }))
    }
}

impl Operator for UpsertExec {
    fn initialize(&mut self, ctx: &ExecutionContext) -> QueryResult<()> {
        self.input.initialize(ctx)?;
        if !self.read_own_writes {
            let collection = ctx
                .database
                .collection(&self.collection)
                .map_err(catalog_err)?;
            let mut snapshot = Vec::new();
            for shard in 0..collection.number_of_shards() {
                snapshot.extend(collection.scan_shard(shard).map_err(catalog_err)?);
            }
            self.snapshot = Some(snapshot);
        }
        Ok(())
    }

    fn get_batch(&mut self, n: usize, ctx: &ExecutionContext) -> QueryResult<Batch> {
        ctx.check_cancelled()?;
        let collection = ctx
            .database
            .collection(&self.collection)
            .map_err(catalog_err)?;
        let batch = self.input.get_batch(n, ctx)?;
        let mut rows = Vec::with_capacity(batch.rows.len());
        for mut row in batch.rows {
            let example = match eval_in_row(&self.search, &row, ctx)? {
                Value::Object(map) => map,
                _ => {
                    return Err(QueryError::parse(
                        "UPSERT search expression must be an object",
                    ))
                }
            };

            match self.lookup(ctx, &example)? {
                Some(existing) => {
                    let mut scope = row.clone();
                    scope.insert("OLD".to_string(), existing.as_value());
                    let patch = match eval_in_row(&self.update, &scope, ctx)? {
                        Value::Object(map) => map,
                        _ => {
                            return Err(QueryError::parse(
                                "UPSERT update expression must be an object",
                            ))
                        }
                    };
                    let (old, new) = if self.replace {
                        collection
                            .replace(existing.key(), Value::Object(patch))
                            .map_err(catalog_err)?
                    } else {
                        collection
                            .update(existing.key(), &patch, true)
                            .map_err(catalog_err)?
                    };
                    row.insert("OLD".to_string(), old.into_value());
                    row.insert("NEW".to_string(), new.into_value());
                }
                None => {
                    let body = eval_in_row(&self.insert, &row, ctx)?;
                    let inserted = collection.insert(body).map_err(catalog_err)?;
                    row.insert("OLD".to_string(), Value::Null);
                    row.insert("NEW".to_string(), inserted.into_value());
                }
            }
            rows.push(row);
        }
        Ok(Batch {
            rows,
            has_more: batch.has_more,
        })
    }

    fn shutdown(&mut self) {
        self.input.shutdown();
        self.snapshot = None;
    }
}
