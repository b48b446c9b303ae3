//! Recursive-descent parser for the query language subset the engine
//! executes: FOR (collection, array, traversal and path-search forms),
//! FILTER, LET, SORT, LIMIT, COLLECT (grouping, AGGREGATE, INTO,
//! WITH COUNT INTO), RETURN [DISTINCT], INSERT and UPSERT.
//!
//! Structural rules enforced here, at parse time:
//! - binding names (FOR/LET/COLLECT variables) must be unique in scope
//! - `RETURN DISTINCT` is only legal as the final projection of a query
//!   block that enumerates a collection or literal array with an ordinary
//!   FOR, and not after a COLLECT
//! - traversal/path-search start and target vertices must not be statically
//!   typed non-strings (a numeric or null literal is rejected; an empty
//!   string is legal here and handled at runtime)
//! - traversal output bindings cannot be destructured

use serde_json::Value;

use super::ast::*;
use super::errors::{QueryError, QueryResult};
use super::lexer::{Keyword, Lexer, Token};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    scopes: Vec<Vec<String>>,
}

/// Parses a full query text.
pub fn parse_query(text: &str) -> QueryResult<ParsedQuery> {
    let tokens = Lexer::new(text).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        scopes: vec![Vec::new()],
    };
    let query = parser.parse_block(true)?;
    if parser.pos < parser.tokens.len() {
        return Err(QueryError::parse("expected end of query"));
    }
    Ok(query)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.peek() == Some(&Token::Keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword, what: &str) -> QueryResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(QueryError::parse(format!("expected {}", what)))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> QueryResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(QueryError::parse(format!("expected {}", what)))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> QueryResult<String> {
        match self.bump() {
            Some(Token::Identifier(name)) => Ok(name),
            _ => Err(QueryError::parse(format!("expected {}", what))),
        }
    }

    fn declare(&mut self, name: &str) -> QueryResult<()> {
        if self.scopes.iter().any(|scope| scope.iter().any(|v| v == name)) {
            return Err(QueryError::parse(format!(
                "variable name '{}' is already declared",
                name
            )));
        }
        self.scopes
            .last_mut()
            .expect("at least one scope")
            .push(name.to_string());
        Ok(())
    }

    fn is_declared(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.iter().any(|v| v == name))
    }

    // ---- operations ----

    /// Parses a query block (the whole query, or a parenthesized subquery).
    fn parse_block(&mut self, top_level: bool) -> QueryResult<ParsedQuery> {
        let mut operations: Vec<Operation> = Vec::new();
        let mut terminated = false;

        while let Some(token) = self.peek() {
            if terminated {
                if top_level {
                    return Err(QueryError::parse("expected end of query"));
                }
                break;
            }
            let op = match token {
                Token::Keyword(Keyword::For) => self.parse_for()?,
                Token::Keyword(Keyword::Let) => self.parse_let()?,
                Token::Keyword(Keyword::Filter) => {
                    self.pos += 1;
                    Operation::Filter(self.parse_expr()?)
                }
                Token::Keyword(Keyword::Sort) => self.parse_sort()?,
                Token::Keyword(Keyword::Limit) => self.parse_limit()?,
                Token::Keyword(Keyword::Collect) => self.parse_collect()?,
                Token::Keyword(Keyword::Return) => {
                    let op = self.parse_return(&operations)?;
                    terminated = true;
                    op
                }
                Token::Keyword(Keyword::Insert) => self.parse_insert()?,
                Token::Keyword(Keyword::Upsert) => self.parse_upsert()?,
                _ => {
                    if top_level {
                        return Err(QueryError::parse("expected query operation"));
                    }
                    break;
                }
            };
            operations.push(op);
        }

        if operations.is_empty() {
            return Err(QueryError::parse("empty query"));
        }
        Ok(ParsedQuery { operations })
    }

    fn parse_for(&mut self) -> QueryResult<Operation> {
        self.pos += 1; // FOR

        if matches!(self.peek(), Some(Token::LBracket) | Some(Token::LBrace)) {
            return Err(QueryError::parse(
                "cannot destructure loop variables; traversal and path outputs have a fixed shape",
            ));
        }

        let mut variables = vec![self.expect_identifier("loop variable name")?];
        while self.eat(&Token::Comma) {
            if matches!(self.peek(), Some(Token::LBracket) | Some(Token::LBrace)) {
                return Err(QueryError::parse(
                    "cannot destructure loop variables; traversal and path outputs have a fixed shape",
                ));
            }
            variables.push(self.expect_identifier("loop variable name")?);
        }

        self.expect_keyword(Keyword::In, "IN")?;

        // direction first: traversal without depth range, or path search
        if let Some(direction) = self.peek_direction() {
            self.pos += 1;
            return self.parse_graph_tail(variables, direction, 1, 1);
        }

        // otherwise an expression; a following direction keyword means the
        // expression was the traversal depth range
        let source = self.parse_expr()?;
        if let Some(direction) = self.peek_direction() {
            self.pos += 1;
            let (min_depth, max_depth) = Self::depth_range_of(&source)?;
            return self.parse_graph_tail(variables, direction, min_depth, max_depth);
        }

        if variables.len() != 1 {
            return Err(QueryError::parse(
                "multiple loop variables are only valid for traversals",
            ));
        }
        let variable = variables.remove(0);
        self.declare(&variable)?;

        let source = match source {
            Expr::Variable(name) if !self.is_declared(&name) => ForSource::Collection(name),
            other => ForSource::Expression(other),
        };
        let options = self.parse_optional_options()?;
        Ok(Operation::For(ForOp {
            variable,
            source,
            options,
        }))
    }

    fn peek_direction(&self) -> Option<Direction> {
        match self.peek() {
            Some(Token::Keyword(Keyword::Outbound)) => Some(Direction::Outbound),
            Some(Token::Keyword(Keyword::Inbound)) => Some(Direction::Inbound),
            // ANY is a direction only when followed by a vertex expression or
            // a path-search keyword, which is always the case in this grammar
            Some(Token::Keyword(Keyword::Any)) => Some(Direction::Any),
            _ => None,
        }
    }

    fn depth_range_of(expr: &Expr) -> QueryResult<(u64, u64)> {
        match expr {
            Expr::Range(min, max) => {
                let min = Self::depth_bound(min)?;
                let max = Self::depth_bound(max)?;
                if max < min {
                    return Err(QueryError::parse("invalid traversal depth range"));
                }
                Ok((min, max))
            }
            Expr::Constant(Value::Number(_)) => {
                let depth = Self::depth_bound(expr)?;
                Ok((depth, depth))
            }
            _ => Err(QueryError::parse("invalid traversal depth specification")),
        }
    }

    fn depth_bound(expr: &Expr) -> QueryResult<u64> {
        match expr {
            Expr::Constant(Value::Number(n)) => {
                let value = n.as_f64().unwrap_or(-1.0);
                if value < 0.0 || value.fract() != 0.0 {
                    return Err(QueryError::parse("traversal depth must be a non-negative integer"));
                }
                Ok(value as u64)
            }
            _ => Err(QueryError::parse("traversal depth must be a number literal")),
        }
    }

    /// Everything after `FOR vars IN [range] DIRECTION`.
    fn parse_graph_tail(
        &mut self,
        variables: Vec<String>,
        direction: Direction,
        min_depth: u64,
        max_depth: u64,
    ) -> QueryResult<Operation> {
        let kind = match self.peek() {
            Some(Token::Keyword(Keyword::ShortestPath)) => Some(PathSearchKind::ShortestPath),
            Some(Token::Keyword(Keyword::KShortestPaths)) => Some(PathSearchKind::KShortestPaths),
            Some(Token::Keyword(Keyword::AllShortestPaths)) => {
                Some(PathSearchKind::AllShortestPaths)
            }
            _ => None,
        };

        if let Some(kind) = kind {
            self.pos += 1;
            let start = self.parse_expr()?;
            Self::check_vertex_expr(&start, "path search")?;
            self.expect_keyword(Keyword::To, "TO")?;
            let target = self.parse_expr()?;
            Self::check_vertex_expr(&target, "path search")?;
            let edge_collections = self.parse_edge_collections()?;
            let options = self.parse_optional_options()?;

            let max_vars = match kind {
                PathSearchKind::ShortestPath => 2,
                _ => 1,
            };
            if variables.len() > max_vars {
                return Err(QueryError::parse(format!(
                    "{} binds at most {} output variable(s)",
                    kind.as_str(),
                    max_vars
                )));
            }
            let mut it = variables.into_iter();
            let vertex_variable = it.next().expect("at least one variable");
            self.declare(&vertex_variable)?;
            let edge_variable = it.next();
            if let Some(name) = &edge_variable {
                self.declare(name)?;
            }
            return Ok(Operation::PathSearch(PathSearchOp {
                kind,
                vertex_variable,
                edge_variable,
                direction,
                start,
                target,
                edge_collections,
                options,
            }));
        }

        let start = self.parse_expr()?;
        Self::check_vertex_expr(&start, "traversal")?;
        let edge_collections = self.parse_edge_collections()?;
        let options = self.parse_optional_options()?;

        if variables.len() > 3 {
            return Err(QueryError::parse(
                "traversals bind at most vertex, edge and path variables",
            ));
        }
        let mut it = variables.into_iter();
        let vertex_variable = it.next().expect("at least one variable");
        self.declare(&vertex_variable)?;
        let edge_variable = it.next();
        if let Some(name) = &edge_variable {
            self.declare(name)?;
        }
        let path_variable = it.next();
        if let Some(name) = &path_variable {
            self.declare(name)?;
        }
        Ok(Operation::Traversal(TraversalOp {
            vertex_variable,
            edge_variable,
            path_variable,
            direction,
            min_depth,
            max_depth,
            start,
            edge_collections,
            options,
        }))
    }

    /// Start/end vertices must not be statically non-string literals. An
    /// empty string is syntactically fine (it yields no results at runtime,
    /// with a warning); null, numbers, bools, arrays and objects are parse
    /// errors.
    fn check_vertex_expr(expr: &Expr, context: &str) -> QueryResult<()> {
        if let Expr::Constant(value) = expr {
            if !value.is_string() {
                return Err(QueryError::parse(format!(
                    "invalid start vertex for {}: expected a document id string",
                    context
                )));
            }
        }
        Ok(())
    }

    fn parse_edge_collections(&mut self) -> QueryResult<Vec<String>> {
        let mut collections = vec![self.expect_identifier("edge collection name")?];
        while self.eat(&Token::Comma) {
            collections.push(self.expect_identifier("edge collection name")?);
        }
        Ok(collections)
    }

    fn parse_let(&mut self) -> QueryResult<Operation> {
        self.pos += 1; // LET
        let variable = self.expect_identifier("variable name")?;
        self.expect(Token::Assign, "'='")?;
        let value = self.parse_expr()?;
        self.declare(&variable)?;
        Ok(Operation::Let(LetOp { variable, value }))
    }

    fn parse_sort(&mut self) -> QueryResult<Operation> {
        self.pos += 1; // SORT
        let mut elements = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            let ascending = if self.eat_keyword(Keyword::Desc) {
                false
            } else {
                self.eat_keyword(Keyword::Asc);
                true
            };
            elements.push(SortElement { expr, ascending });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(Operation::Sort(elements))
    }

    fn parse_limit(&mut self) -> QueryResult<Operation> {
        self.pos += 1; // LIMIT
        let first = self.parse_limit_number()?;
        if self.eat(&Token::Comma) {
            let count = self.parse_limit_number()?;
            Ok(Operation::Limit {
                offset: first,
                count,
            })
        } else {
            Ok(Operation::Limit {
                offset: 0,
                count: first,
            })
        }
    }

    fn parse_limit_number(&mut self) -> QueryResult<u64> {
        match self.bump() {
            Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => Ok(n as u64),
            _ => Err(QueryError::parse("LIMIT expects non-negative integer literals")),
        }
    }

    fn parse_collect(&mut self) -> QueryResult<Operation> {
        self.pos += 1; // COLLECT

        let mut groups = Vec::new();
        let mut aggregates = Vec::new();
        let mut into = None;
        let mut with_count_into = None;

        // group assignments (absent for the bare WITH COUNT form)
        while let (Some(Token::Identifier(_)), Some(Token::Assign)) =
            (self.peek(), self.peek_at(1))
        {
            let name = self.expect_identifier("group variable")?;
            self.expect(Token::Assign, "'='")?;
            let expr = self.parse_expr()?;
            groups.push((name, expr));
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        if self.eat_keyword(Keyword::Aggregate) {
            loop {
                let variable = self.expect_identifier("aggregate variable")?;
                self.expect(Token::Assign, "'='")?;
                let function = match self.bump() {
                    Some(Token::Identifier(name)) => name.to_ascii_uppercase(),
                    Some(Token::Keyword(Keyword::Count)) => "COUNT".to_string(),
                    _ => return Err(QueryError::parse("expected aggregate function")),
                };
                self.expect(Token::LParen, "'('")?;
                let argument = if self.peek() == Some(&Token::RParen) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(Token::RParen, "')'")?;
                aggregates.push(AggregateAssignment {
                    variable,
                    function,
                    argument,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        if self.eat_keyword(Keyword::With) {
            self.expect_keyword(Keyword::Count, "COUNT after WITH")?;
            self.expect_keyword(Keyword::Into, "INTO after WITH COUNT")?;
            with_count_into = Some(self.expect_identifier("count variable")?);
        } else if self.eat_keyword(Keyword::Into) {
            into = Some(self.expect_identifier("INTO variable")?);
        }

        let options = self.parse_optional_options()?;

        for (name, _) in &groups {
            self.declare(name)?;
        }
        for aggregate in &aggregates {
            self.declare(&aggregate.variable)?;
        }
        if let Some(name) = &into {
            self.declare(name)?;
        }
        if let Some(name) = &with_count_into {
            self.declare(name)?;
        }

        if groups.is_empty() && aggregates.is_empty() && into.is_none() && with_count_into.is_none()
        {
            return Err(QueryError::parse("COLLECT requires at least one assignment"));
        }

        Ok(Operation::Collect(CollectOp {
            groups,
            aggregates,
            into,
            with_count_into,
            options,
        }))
    }

    fn parse_return(&mut self, previous: &[Operation]) -> QueryResult<Operation> {
        self.pos += 1; // RETURN
        let distinct = self.eat_keyword(Keyword::Distinct);
        if distinct {
            // DISTINCT is only legal directly over an ordinary enumeration:
            // the block must contain a FOR over a collection or literal
            // array, and no COLLECT may sit between them.
            let has_plain_for = previous
                .iter()
                .any(|op| matches!(op, Operation::For(_)));
            let has_collect = previous
                .iter()
                .any(|op| matches!(op, Operation::Collect(_)));
            if !has_plain_for || has_collect {
                return Err(QueryError::parse(
                    "DISTINCT is only allowed on the result of a FOR enumeration",
                ));
            }
        }
        let expr = self.parse_expr()?;
        Ok(Operation::Return(ReturnOp { distinct, expr }))
    }

    fn parse_insert(&mut self) -> QueryResult<Operation> {
        self.pos += 1; // INSERT
        let document = self.parse_expr()?;
        if !self.eat_keyword(Keyword::Into) && !self.eat_keyword(Keyword::In) {
            return Err(QueryError::parse("expected INTO after INSERT document"));
        }
        let collection = self.parse_collection_name()?;
        let options = self.parse_optional_options()?;
        // RETURN NEW may follow an INSERT.
        if !self.is_declared("NEW") {
            self.scopes
                .last_mut()
                .expect("at least one scope")
                .push("NEW".to_string());
        }
        Ok(Operation::Insert(InsertOp {
            collection,
            document,
            options,
        }))
    }

    fn parse_upsert(&mut self) -> QueryResult<Operation> {
        self.pos += 1; // UPSERT
        let search = self.parse_expr()?;
        self.expect_keyword(Keyword::Insert, "INSERT branch of UPSERT")?;
        let insert = self.parse_expr()?;
        let replace = if self.eat_keyword(Keyword::Update) {
            false
        } else if self.eat_keyword(Keyword::Replace) {
            true
        } else {
            return Err(QueryError::parse("expected UPDATE or REPLACE branch of UPSERT"));
        };
        let update = self.parse_expr()?;
        if !self.eat_keyword(Keyword::Into) && !self.eat_keyword(Keyword::In) {
            return Err(QueryError::parse("expected IN after UPSERT branches"));
        }
        let collection = self.parse_collection_name()?;
        let options = self.parse_optional_options()?;
        // NEW/OLD pseudo-variables become visible after the operation.
        for pseudo in ["NEW", "OLD"] {
            if !self.is_declared(pseudo) {
                self.scopes
                    .last_mut()
                    .expect("at least one scope")
                    .push(pseudo.to_string());
            }
        }
        Ok(Operation::Upsert(UpsertOp {
            collection,
            search,
            insert,
            update,
            replace,
            options,
        }))
    }

    fn parse_collection_name(&mut self) -> QueryResult<String> {
        match self.bump() {
            Some(Token::Identifier(name)) => Ok(name),
            Some(Token::BindCollection(name)) => Ok(format!("@{}", name)),
            _ => Err(QueryError::parse("expected collection name")),
        }
    }

    fn parse_optional_options(&mut self) -> QueryResult<Option<Expr>> {
        if self.eat_keyword(Keyword::Options) {
            let expr = self.parse_expr()?;
            if !matches!(expr, Expr::Object(_)) {
                return Err(QueryError::parse("OPTIONS expects an object literal"));
            }
            Ok(Some(expr))
        } else {
            Ok(None)
        }
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> QueryResult<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> QueryResult<Expr> {
        let condition = self.parse_or()?;
        if self.eat(&Token::Question) {
            let then_value = self.parse_expr()?;
            self.expect(Token::Colon, "':'")?;
            let else_value = self.parse_expr()?;
            Ok(Expr::Ternary(
                Box::new(condition),
                Box::new(then_value),
                Box::new(else_value),
            ))
        } else {
            Ok(condition)
        }
    }

    fn parse_or(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_and()?;
        loop {
            let matched = self.eat(&Token::OrOr) || self.eat_keyword(Keyword::Or);
            if !matched {
                return Ok(left);
            }
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
    }

    fn parse_and(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_not()?;
        loop {
            let matched = self.eat(&Token::AndAnd) || self.eat_keyword(Keyword::And);
            if !matched {
                return Ok(left);
            }
            let right = self.parse_not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
    }

    fn parse_not(&mut self) -> QueryResult<Expr> {
        if self.eat(&Token::Not) || self.eat_keyword(Keyword::Not) {
            // NOT IN needs the comparison parser to see the IN
            if self.peek() == Some(&Token::Keyword(Keyword::In)) {
                return Err(QueryError::parse("unexpected IN"));
            }
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> QueryResult<Expr> {
        let left = self.parse_range()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(BinaryOp::Eq),
            Some(Token::Ne) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            Some(Token::Keyword(Keyword::In)) => Some(BinaryOp::In),
            Some(Token::Keyword(Keyword::Like)) => Some(BinaryOp::Like),
            Some(Token::Keyword(Keyword::Not))
                if self.peek_at(1) == Some(&Token::Keyword(Keyword::In)) =>
            {
                self.pos += 1;
                Some(BinaryOp::NotIn)
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let right = self.parse_range()?;
                Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn parse_range(&mut self) -> QueryResult<Expr> {
        let left = self.parse_additive()?;
        if self.eat(&Token::DotDot) {
            let right = self.parse_additive()?;
            Ok(Expr::Range(Box::new(left), Box::new(right)))
        } else {
            Ok(left)
        }
    }

    fn parse_additive(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> QueryResult<Expr> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            // fold literal negation so -1 is a constant
            if let Expr::Constant(Value::Number(n)) = &inner {
                if let Some(v) = n.as_f64() {
                    return Ok(Expr::Constant(crate::query::value::number_value(-v)));
                }
            }
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> QueryResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let field = match self.bump() {
                    Some(Token::Identifier(name)) => name,
                    // allow keywords as attribute names (doc.count, doc.sort)
                    Some(Token::Keyword(k)) => format!("{:?}", k).to_ascii_lowercase(),
                    _ => return Err(QueryError::parse("expected attribute name after '.'")),
                };
                expr = Expr::FieldAccess(Box::new(expr), field);
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_expr()?;
                self.expect(Token::RBracket, "']'")?;
                match index {
                    Expr::Constant(Value::String(field)) => {
                        expr = Expr::FieldAccess(Box::new(expr), field);
                    }
                    other => expr = Expr::IndexAccess(Box::new(expr), Box::new(other)),
                }
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> QueryResult<Expr> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Constant(crate::query::value::number_value(n)))
            }
            Some(Token::String(s)) => {
                self.pos += 1;
                Ok(Expr::Constant(Value::String(s)))
            }
            Some(Token::Keyword(Keyword::True)) => {
                self.pos += 1;
                Ok(Expr::Constant(Value::Bool(true)))
            }
            Some(Token::Keyword(Keyword::False)) => {
                self.pos += 1;
                Ok(Expr::Constant(Value::Bool(false)))
            }
            Some(Token::Keyword(Keyword::Null)) => {
                self.pos += 1;
                Ok(Expr::Constant(Value::Null))
            }
            Some(Token::Keyword(Keyword::Count)) if self.peek_at(1) == Some(&Token::LParen) => {
                self.pos += 1;
                self.parse_call_args("COUNT")
            }
            Some(Token::BindVar(name)) => {
                self.pos += 1;
                Ok(Expr::BindVar(name))
            }
            Some(Token::BindCollection(name)) => {
                self.pos += 1;
                Ok(Expr::Variable(format!("@{}", name)))
            }
            Some(Token::Identifier(name)) => {
                self.pos += 1;
                if self.peek() == Some(&Token::LParen) {
                    self.parse_call_args(&name.to_ascii_uppercase())
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                self.pos += 1;
                // a parenthesized subquery starts with a query keyword
                let is_subquery = matches!(
                    self.peek(),
                    Some(Token::Keyword(Keyword::For))
                        | Some(Token::Keyword(Keyword::Return))
                        | Some(Token::Keyword(Keyword::Let))
                        | Some(Token::Keyword(Keyword::Collect))
                        | Some(Token::Keyword(Keyword::Insert))
                        | Some(Token::Keyword(Keyword::Upsert))
                );
                if is_subquery {
                    self.scopes.push(Vec::new());
                    let block = self.parse_block(false)?;
                    self.scopes.pop();
                    self.expect(Token::RParen, "')'")?;
                    Ok(Expr::Subquery(Box::new(block)))
                } else {
                    let expr = self.parse_expr()?;
                    self.expect(Token::RParen, "')'")?;
                    Ok(expr)
                }
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RBracket, "']'")?;
                }
                Ok(Expr::Array(items))
            }
            Some(Token::LBrace) => {
                self.pos += 1;
                let mut entries = Vec::new();
                if !self.eat(&Token::RBrace) {
                    loop {
                        let key = match self.bump() {
                            Some(Token::Identifier(name)) => ObjectKey::Literal(name),
                            Some(Token::String(name)) => ObjectKey::Literal(name),
                            Some(Token::Keyword(k)) => {
                                ObjectKey::Literal(format!("{:?}", k).to_ascii_lowercase())
                            }
                            Some(Token::LBracket) => {
                                let expr = self.parse_expr()?;
                                self.expect(Token::RBracket, "']'")?;
                                ObjectKey::Dynamic(Box::new(expr))
                            }
                            _ => return Err(QueryError::parse("expected object key")),
                        };
                        self.expect(Token::Colon, "':'")?;
                        let value = self.parse_expr()?;
                        entries.push((key, value));
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RBrace, "'}'")?;
                }
                Ok(Expr::Object(entries))
            }
            _ => Err(QueryError::parse("expected expression")),
        }
    }

    fn parse_call_args(&mut self, name: &str) -> QueryResult<Expr> {
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen, "')'")?;
        }
        Ok(Expr::FunctionCall(name.to_string(), args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    fn parse(text: &str) -> ParsedQuery {
        parse_query(text).unwrap()
    }

    fn parse_err(text: &str) -> QueryError {
        parse_query(text).unwrap_err()
    }

    #[test]
    fn test_for_return() {
        let q = parse("FOR doc IN users RETURN doc");
        assert_eq!(q.operations.len(), 2);
        match &q.operations[0] {
            Operation::For(op) => {
                assert_eq!(op.variable, "doc");
                assert_eq!(op.source, ForSource::Collection("users".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_for_over_declared_variable_is_expression() {
        let q = parse("LET xs = [1, 2] FOR x IN xs RETURN x");
        match &q.operations[1] {
            Operation::For(op) => {
                assert!(matches!(op.source, ForSource::Expression(Expr::Variable(_))))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let err = parse_err("FOR x IN users FOR x IN users RETURN x");
        assert_eq!(err.code, ErrorCode::QueryParse);
        let err = parse_err("LET a = 1 LET a = 2 RETURN a");
        assert_eq!(err.code, ErrorCode::QueryParse);
    }

    #[test]
    fn test_collect_with_count() {
        let q = parse(
            "FOR i IN c COLLECT class = i.group WITH COUNT INTO count RETURN [class, count]",
        );
        match &q.operations[1] {
            Operation::Collect(op) => {
                assert_eq!(op.groups.len(), 1);
                assert_eq!(op.with_count_into.as_deref(), Some("count"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bare_collect_with_count() {
        let q = parse("FOR i IN c COLLECT WITH COUNT INTO total RETURN total");
        match &q.operations[1] {
            Operation::Collect(op) => {
                assert!(op.groups.is_empty());
                assert_eq!(op.with_count_into.as_deref(), Some("total"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_collect_aggregate() {
        let q = parse("FOR i IN c COLLECT g = i.g AGGREGATE m = MAX(i.v), n = COUNT() RETURN [g, m, n]");
        match &q.operations[1] {
            Operation::Collect(op) => {
                assert_eq!(op.aggregates.len(), 2);
                assert_eq!(op.aggregates[0].function, "MAX");
                assert_eq!(op.aggregates[1].function, "COUNT");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_return_distinct_requires_enumeration() {
        assert!(parse_query("FOR d IN c RETURN DISTINCT d.v").is_ok());
        let err = parse_err("RETURN DISTINCT 1");
        assert_eq!(err.code, ErrorCode::QueryParse);
        let err = parse_err("FOR d IN c COLLECT g = d.g RETURN DISTINCT g");
        assert_eq!(err.code, ErrorCode::QueryParse);
        // inside a LET subquery without its own enumeration
        let err = parse_err("FOR d IN c LET x = (RETURN DISTINCT d.v) RETURN x");
        assert_eq!(err.code, ErrorCode::QueryParse);
    }

    #[test]
    fn test_traversal() {
        let q = parse("FOR v, e, p IN 1..3 OUTBOUND 'users/alice' knows RETURN v");
        match &q.operations[0] {
            Operation::Traversal(op) => {
                assert_eq!(op.min_depth, 1);
                assert_eq!(op.max_depth, 3);
                assert_eq!(op.direction, Direction::Outbound);
                assert_eq!(op.edge_variable.as_deref(), Some("e"));
                assert_eq!(op.path_variable.as_deref(), Some("p"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_traversal_default_depth() {
        let q = parse("FOR v IN OUTBOUND 'users/alice' knows RETURN v");
        match &q.operations[0] {
            Operation::Traversal(op) => {
                assert_eq!((op.min_depth, op.max_depth), (1, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_traversal_non_string_start_rejected() {
        let err = parse_err("FOR v IN 1..2 OUTBOUND null knows RETURN v");
        assert_eq!(err.code, ErrorCode::QueryParse);
        let err = parse_err("FOR v IN 1..2 OUTBOUND 42 knows RETURN v");
        assert_eq!(err.code, ErrorCode::QueryParse);
    }

    #[test]
    fn test_traversal_empty_string_start_parses() {
        assert!(parse_query("FOR v IN 1..2 OUTBOUND '' knows RETURN v").is_ok());
    }

    #[test]
    fn test_destructuring_rejected() {
        let err = parse_err("FOR [a, b] IN 1..2 OUTBOUND 'users/x' knows RETURN a");
        assert_eq!(err.code, ErrorCode::QueryParse);
        let err = parse_err("FOR {v} IN OUTBOUND 'users/x' knows RETURN v");
        assert_eq!(err.code, ErrorCode::QueryParse);
    }

    #[test]
    fn test_shortest_path() {
        let q = parse("FOR v, e IN OUTBOUND SHORTEST_PATH 'users/a' TO 'users/b' knows RETURN v");
        match &q.operations[0] {
            Operation::PathSearch(op) => {
                assert_eq!(op.kind, PathSearchKind::ShortestPath);
                assert_eq!(op.edge_variable.as_deref(), Some("e"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_k_shortest_paths_single_variable() {
        assert!(parse_query(
            "FOR p IN OUTBOUND K_SHORTEST_PATHS 'users/a' TO 'users/b' knows RETURN p"
        )
        .is_ok());
        let err = parse_err(
            "FOR p, e IN OUTBOUND K_SHORTEST_PATHS 'users/a' TO 'users/b' knows RETURN p",
        );
        assert_eq!(err.code, ErrorCode::QueryParse);
    }

    #[test]
    fn test_upsert() {
        let q = parse(
            "UPSERT { name: 'x' } INSERT { name: 'x', count: 1 } UPDATE { count: OLD.count + 1 } IN c",
        );
        match &q.operations[0] {
            Operation::Upsert(op) => {
                assert!(!op.replace);
                assert_eq!(op.collection, "c");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_upsert_options() {
        let q = parse(
            "FOR i IN 1..3 UPSERT { k: 'a' } INSERT { k: 'a', n: 1 } UPDATE { n: OLD.n + 1 } IN c OPTIONS { readOwnWrites: true } RETURN NEW",
        );
        match &q.operations[1] {
            Operation::Upsert(op) => assert!(op.options.is_some()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let q = parse("RETURN 1 + 2 * 3 == 7 && true");
        match &q.operations[0] {
            Operation::Return(op) => match &op.expr {
                Expr::Binary(BinaryOp::And, _, _) => {}
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_return_distinct_requires_for() {
        // expression-source FOR still counts as an enumeration
        assert!(parse_query("FOR x IN [1, 1, 2] RETURN DISTINCT x").is_ok());
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = parse_err("FOR d IN c RETURN d RETURN d");
        assert_eq!(err.code, ErrorCode::QueryParse);
    }
}
