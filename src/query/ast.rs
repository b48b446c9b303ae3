//! Parsed query representation.
//!
//! A query is a linear pipeline of operations; `FOR` introduces an
//! enumeration whose body is every operation that follows it, and the final
//! `RETURN` (or a data-modification operation) terminates the pipeline.
//! Subqueries appear as expressions.

use serde_json::Value;

/// A complete parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    For(ForOp),
    Traversal(TraversalOp),
    PathSearch(PathSearchOp),
    Let(LetOp),
    Filter(Expr),
    Sort(Vec<SortElement>),
    Limit { offset: u64, count: u64 },
    Collect(CollectOp),
    Return(ReturnOp),
    Insert(InsertOp),
    Upsert(UpsertOp),
}

/// `FOR var IN <collection | expression>`
#[derive(Debug, Clone, PartialEq)]
pub struct ForOp {
    pub variable: String,
    pub source: ForSource,
    pub options: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForSource {
    Collection(String),
    Expression(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
    Any,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
            Direction::Any => "any",
        }
    }
}

/// `FOR v[, e[, p]] IN min..max OUTBOUND start edges...`
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalOp {
    pub vertex_variable: String,
    pub edge_variable: Option<String>,
    pub path_variable: Option<String>,
    pub direction: Direction,
    pub min_depth: u64,
    pub max_depth: u64,
    pub start: Expr,
    pub edge_collections: Vec<String>,
    pub options: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSearchKind {
    ShortestPath,
    KShortestPaths,
    AllShortestPaths,
}

impl PathSearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathSearchKind::ShortestPath => "SHORTEST_PATH",
            PathSearchKind::KShortestPaths => "K_SHORTEST_PATHS",
            PathSearchKind::AllShortestPaths => "ALL_SHORTEST_PATHS",
        }
    }
}

/// `FOR v[, e] IN OUTBOUND SHORTEST_PATH start TO target edges...`
#[derive(Debug, Clone, PartialEq)]
pub struct PathSearchOp {
    pub kind: PathSearchKind,
    pub vertex_variable: String,
    pub edge_variable: Option<String>,
    pub direction: Direction,
    pub start: Expr,
    pub target: Expr,
    pub edge_collections: Vec<String>,
    pub options: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetOp {
    pub variable: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortElement {
    pub expr: Expr,
    pub ascending: bool,
}

/// `COLLECT key = expr, ... [AGGREGATE var = FN(expr), ...]
///  [WITH COUNT INTO var | INTO var] [OPTIONS {...}]`
#[derive(Debug, Clone, PartialEq)]
pub struct CollectOp {
    pub groups: Vec<(String, Expr)>,
    pub aggregates: Vec<AggregateAssignment>,
    pub into: Option<String>,
    pub with_count_into: Option<String>,
    pub options: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateAssignment {
    pub variable: String,
    pub function: String,
    pub argument: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnOp {
    pub distinct: bool,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOp {
    pub collection: String,
    pub document: Expr,
    pub options: Option<Expr>,
}

/// `UPSERT search INSERT ins UPDATE upd IN collection` (or REPLACE).
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOp {
    pub collection: String,
    pub search: Expr,
    pub insert: Expr,
    pub update: Expr,
    pub replace: bool,
    pub options: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Value),
    Variable(String),
    FieldAccess(Box<Expr>, String),
    IndexAccess(Box<Expr>, Box<Expr>),
    Range(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    FunctionCall(String, Vec<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(ObjectKey, Expr)>),
    Subquery(Box<ParsedQuery>),
    BindVar(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    Literal(String),
    Dynamic(Box<Expr>),
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Expr {
        Expr::Constant(value.into())
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(_))
    }

    /// The dotted attribute path if this expression is a chain of field
    /// accesses rooted at `variable` (e.g. `doc.a.b` -> `a.b`).
    pub fn attribute_path_of(&self, variable: &str) -> Option<String> {
        match self {
            Expr::FieldAccess(base, field) => match base.as_ref() {
                Expr::Variable(v) if v == variable => Some(field.clone()),
                _ => base
                    .attribute_path_of(variable)
                    .map(|prefix| format!("{}.{}", prefix, field)),
            },
            _ => None,
        }
    }

    /// Collects the names of all variables referenced by the expression.
    pub fn referenced_variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Constant(_) | Expr::BindVar(_) => {}
            Expr::Variable(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::FieldAccess(base, _) => base.referenced_variables(out),
            Expr::IndexAccess(base, index) => {
                base.referenced_variables(out);
                index.referenced_variables(out);
            }
            Expr::Range(a, b) => {
                a.referenced_variables(out);
                b.referenced_variables(out);
            }
            Expr::Unary(_, inner) => inner.referenced_variables(out),
            Expr::Binary(_, a, b) => {
                a.referenced_variables(out);
                b.referenced_variables(out);
            }
            Expr::Ternary(c, t, f) => {
                c.referenced_variables(out);
                t.referenced_variables(out);
                f.referenced_variables(out);
            }
            Expr::FunctionCall(_, args) => {
                for arg in args {
                    arg.referenced_variables(out);
                }
            }
            Expr::Array(items) => {
                for item in items {
                    item.referenced_variables(out);
                }
            }
            Expr::Object(entries) => {
                for (key, value) in entries {
                    if let ObjectKey::Dynamic(e) = key {
                        e.referenced_variables(out);
                    }
                    value.referenced_variables(out);
                }
            }
            Expr::Subquery(query) => {
                for op in &query.operations {
                    op.referenced_variables(out);
                }
            }
        }
    }

    /// Collects every attribute path of `variable` dereferenced anywhere in
    /// the expression. Returns false if the whole document value is needed
    /// (the variable is used other than through a field access).
    pub fn attribute_usage_of(&self, variable: &str, paths: &mut Vec<String>) -> bool {
        match self {
            Expr::Constant(_) | Expr::BindVar(_) => true,
            Expr::Variable(name) => name != variable,
            Expr::FieldAccess(_, _) => {
                if let Some(path) = self.attribute_path_of(variable) {
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                    true
                } else {
                    match self {
                        Expr::FieldAccess(base, _) => base.attribute_usage_of(variable, paths),
                        _ => unreachable!(),
                    }
                }
            }
            Expr::IndexAccess(base, index) => {
                base.attribute_usage_of(variable, paths)
                    && index.attribute_usage_of(variable, paths)
            }
            Expr::Range(a, b) => {
                a.attribute_usage_of(variable, paths) && b.attribute_usage_of(variable, paths)
            }
            Expr::Unary(_, inner) => inner.attribute_usage_of(variable, paths),
            Expr::Binary(_, a, b) => {
                a.attribute_usage_of(variable, paths) && b.attribute_usage_of(variable, paths)
            }
            Expr::Ternary(c, t, f) => {
                c.attribute_usage_of(variable, paths)
                    && t.attribute_usage_of(variable, paths)
                    && f.attribute_usage_of(variable, paths)
            }
            Expr::FunctionCall(_, args) => args
                .iter()
                .all(|arg| arg.attribute_usage_of(variable, paths)),
            Expr::Array(items) => items
                .iter()
                .all(|item| item.attribute_usage_of(variable, paths)),
            Expr::Object(entries) => entries.iter().all(|(key, value)| {
                let key_ok = match key {
                    ObjectKey::Literal(_) => true,
                    ObjectKey::Dynamic(e) => e.attribute_usage_of(variable, paths),
                };
                key_ok && value.attribute_usage_of(variable, paths)
            }),
            Expr::Subquery(query) => query
                .operations
                .iter()
                .all(|op| op.attribute_usage_of(variable, paths)),
        }
    }
}

impl Operation {
    pub fn referenced_variables(&self, out: &mut Vec<String>) {
        self.visit_expressions(&mut |e| e.referenced_variables(out));
    }

    pub fn attribute_usage_of(&self, variable: &str, paths: &mut Vec<String>) -> bool {
        let mut whole_document = false;
        self.visit_expressions(&mut |e| {
            if !e.attribute_usage_of(variable, paths) {
                whole_document = true;
            }
        });
        !whole_document
    }

    fn visit_expressions(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Operation::For(op) => {
                if let ForSource::Expression(e) = &op.source {
                    f(e);
                }
            }
            Operation::Traversal(op) => f(&op.start),
            Operation::PathSearch(op) => {
                f(&op.start);
                f(&op.target);
            }
            Operation::Let(op) => f(&op.value),
            Operation::Filter(e) => f(e),
            Operation::Sort(elements) => {
                for element in elements {
                    f(&element.expr);
                }
            }
            Operation::Limit { .. } => {}
            Operation::Collect(op) => {
                for (_, e) in &op.groups {
                    f(e);
                }
                for aggregate in &op.aggregates {
                    if let Some(arg) = &aggregate.argument {
                        f(arg);
                    }
                }
            }
            Operation::Return(op) => f(&op.expr),
            Operation::Insert(op) => f(&op.document),
            Operation::Upsert(op) => {
                f(&op.search);
                f(&op.insert);
                f(&op.update);
            }
        }
    }
}
