// Statement facts
// The router does not need a full AST, only a handful of facts about a
// statement: which table it targets, which sharding-key literals it binds,
// and for SELECTs the LIMIT/OFFSET window and ORDER BY columns.
// We use the sqlparser crate to handle the SQL grammar.

use crate::error::ProxyError;
use crate::schema::Schema;
use crate::sharding::Value;
use sqlparser::ast::{
    BinaryOperator, Expr, FromTable, Ident, ObjectName, ObjectType, Query, SetExpr, Statement,
    TableFactor, TableWithJoins, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;

/// Coarse statement classification, decided from the leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Replace,
    Update,
    Delete,
    /// DDL, SET, SHOW and everything else
    Other,
}

impl StatementKind {
    /// Classify a statement by its first keyword without parsing it
    ///
    /// Leading whitespace, comments and opening parentheses are skipped, so
    /// `/* hint */ (SELECT ...)` is still a SELECT.
    pub fn classify(sql: &str) -> Self {
        let mut rest = sql.trim_start();
        loop {
            if let Some(stripped) = rest.strip_prefix("/*") {
                rest = match stripped.find("*/") {
                    Some(end) => stripped[end + 2..].trim_start(),
                    None => return StatementKind::Other,
                };
            } else if rest.starts_with("--") || rest.starts_with('#') {
                rest = match rest.find('\n') {
                    Some(end) => rest[end + 1..].trim_start(),
                    None => return StatementKind::Other,
                };
            } else if let Some(stripped) = rest.strip_prefix('(') {
                rest = stripped.trim_start();
            } else {
                break;
            }
        }

        let keyword: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "SELECT" | "WITH" => StatementKind::Select,
            "INSERT" => StatementKind::Insert,
            "REPLACE" => StatementKind::Replace,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            _ => StatementKind::Other,
        }
    }

    /// True for statements that only read data
    pub fn is_read(&self) -> bool {
        matches!(self, StatementKind::Select)
    }
}

/// Sort direction of one ORDER BY column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    /// Column name, upper-cased
    pub column: String,
    pub ascending: bool,
}

/// LIMIT/OFFSET as written in the statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitClause {
    pub offset: u64,
    pub limit: u64,
}

/// Key values bound by one row of a multi-row INSERT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRow {
    /// Position of the row in the VALUES list
    pub index: usize,
    pub key: Value,
}

/// A parsed statement together with the facts routing needs
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    statement: Statement,
    /// Target table as written, if the statement is table-scoped
    pub table: Option<String>,
    /// Sharding-key literals bound by the statement
    pub values: BTreeSet<Value>,
    /// Per-row keys of an INSERT into a sharded table
    pub insert_rows: Vec<InsertRow>,
    pub limit: Option<LimitClause>,
    pub order_by: Vec<OrderKey>,
}

/// Largest magnitude below which every integer is exact as an f64
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// The sharding column as a predicate may name it
struct KeyColumn {
    name: String,
    /// Names that qualify the target relation, upper-cased
    qualifiers: Vec<String>,
    /// The target is the only relation, so a bare column name is its own
    sole: bool,
}

impl KeyColumn {
    fn new(name: &str, relation: &TableFactor, sole: bool) -> Self {
        let qualifiers = match relation {
            // An alias hides the table name
            TableFactor::Table {
                alias: Some(alias), ..
            } => vec![alias.name.value.to_uppercase()],
            TableFactor::Table { name, .. } => {
                let mut names = vec![StatementParser::object_name(name).to_uppercase()];
                if let Some(last) = name.0.last() {
                    names.push(last.value.to_uppercase());
                }
                names
            }
            _ => Vec::new(),
        };
        Self {
            name: name.to_string(),
            qualifiers,
            sole,
        }
    }

    fn matches(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Identifier(ident) => self.sole && ident.value.eq_ignore_ascii_case(&self.name),
            Expr::CompoundIdentifier(idents) => match idents.split_last() {
                Some((column, prefix)) if !prefix.is_empty() => {
                    column.value.eq_ignore_ascii_case(&self.name) && self.qualified_by(prefix)
                }
                _ => false,
            },
            Expr::Nested(inner) => self.matches(inner),
            _ => false,
        }
    }

    fn qualified_by(&self, prefix: &[Ident]) -> bool {
        let joined = prefix
            .iter()
            .map(|i| i.value.to_uppercase())
            .collect::<Vec<_>>()
            .join(".");
        let last = prefix.last().map(|i| i.value.to_uppercase()).unwrap_or_default();
        self.qualifiers.iter().any(|q| *q == joined || *q == last)
    }
}

/// The statement parser
pub struct StatementParser;

impl StatementParser {
    /// Parse a SQL string and extract its routing facts
    ///
    /// The schema is consulted to learn the target table's sharding column;
    /// only literals bound to that column are collected.
    pub fn parse(schema: &Schema, sql: &str) -> Result<ParsedStatement, ProxyError> {
        let dialect = MySqlDialect {};
        let mut ast = Parser::parse_sql(&dialect, sql)
            .map_err(|e| ProxyError::Parse(format!("SQL parsing error: {}", e)))?;

        // We only route one statement at a time
        if ast.len() != 1 {
            return Err(ProxyError::Parse(
                "Only single statements are supported".to_string(),
            ));
        }
        let statement = ast.remove(0);

        let mut parsed = ParsedStatement {
            table: Self::target_table(&statement),
            statement,
            values: BTreeSet::new(),
            insert_rows: Vec::new(),
            limit: None,
            order_by: Vec::new(),
        };

        let column = parsed
            .table
            .as_deref()
            .and_then(|name| schema.table(name))
            .and_then(|table| table.rule_column())
            .map(str::to_string);

        match &parsed.statement {
            Statement::Query(query) => {
                parsed.limit = Self::limit_clause(query);
                parsed.order_by = Self::order_keys(query);
                if let (Some(column), SetExpr::Select(select)) = (&column, query.body.as_ref()) {
                    if let (Some(target), Some(selection)) = (select.from.first(), &select.selection) {
                        let sole = select.from.len() == 1 && target.joins.is_empty();
                        parsed.values = Self::key_values(selection, column, target, sole);
                    }
                }
            }
            Statement::Insert(insert) => {
                if let Some(column) = &column {
                    parsed.insert_rows = Self::insert_keys(insert, column)?;
                    parsed.values = parsed.insert_rows.iter().map(|r| r.key.clone()).collect();
                }
            }
            Statement::Update {
                table,
                from,
                selection: Some(selection),
                ..
            } => {
                if let Some(column) = &column {
                    let sole = table.joins.is_empty() && from.is_none();
                    parsed.values = Self::key_values(selection, column, table, sole);
                }
            }
            Statement::Delete(delete) => {
                let (FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from)) = &delete.from;
                if let (Some(column), Some(target), Some(selection)) =
                    (&column, from.first(), &delete.selection)
                {
                    let sole = delete.tables.is_empty()
                        && delete.using.is_none()
                        && from.len() == 1
                        && target.joins.is_empty();
                    parsed.values = Self::key_values(selection, column, target, sole);
                }
            }
            _ => {}
        }

        Ok(parsed)
    }

    /// Helper: Extract the table a statement is scoped to
    ///
    /// For joins and set operations this is the first table named; DDL on a
    /// table counts as scoped to it so it reaches every shard holding it.
    fn target_table(statement: &Statement) -> Option<String> {
        match statement {
            Statement::Query(query) => Self::query_table(query),
            Statement::Insert(insert) => Some(Self::object_name(&insert.table_name)),
            Statement::Update { table, .. } => Self::relation_table(table),
            Statement::Delete(delete) => match delete.tables.first() {
                Some(name) => Some(Self::object_name(name)),
                None => match &delete.from {
                    FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => {
                        from.first().and_then(Self::relation_table)
                    }
                },
            },
            Statement::CreateTable(create) => Some(Self::object_name(&create.name)),
            Statement::CreateIndex(create) => Some(Self::object_name(&create.table_name)),
            Statement::AlterTable { name, .. } => Some(Self::object_name(name)),
            Statement::Drop {
                object_type: ObjectType::Table,
                names,
                ..
            } => names.first().map(Self::object_name),
            _ => None,
        }
    }

    fn query_table(query: &Query) -> Option<String> {
        let mut body = query.body.as_ref();
        loop {
            match body {
                SetExpr::Select(select) => {
                    return select.from.first().and_then(Self::relation_table)
                }
                SetExpr::Query(inner) => body = inner.body.as_ref(),
                SetExpr::SetOperation { left, .. } => body = left.as_ref(),
                _ => return None,
            }
        }
    }

    fn relation_table(table: &TableWithJoins) -> Option<String> {
        match &table.relation {
            TableFactor::Table { name, .. } => Some(Self::object_name(name)),
            _ => None,
        }
    }

    fn object_name(name: &ObjectName) -> String {
        name.0
            .iter()
            .map(|i| i.value.clone())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Helper: Keys bound to the sharding column by each VALUES row
    ///
    /// An INSERT into a sharded table must place every row, so a missing
    /// column list, a missing sharding column or a non-literal key is an error
    /// rather than a broadcast that would duplicate rows.
    fn insert_keys(insert: &sqlparser::ast::Insert, column: &str) -> Result<Vec<InsertRow>, ProxyError> {
        let table = Self::object_name(&insert.table_name);
        let position = insert
            .columns
            .iter()
            .position(|c| c.value.eq_ignore_ascii_case(column))
            .ok_or_else(|| {
                ProxyError::Routing(format!(
                    "INSERT into sharded table '{}' must list its sharding column {}",
                    table, column
                ))
            })?;

        let rows = match insert.source.as_ref().map(|q| q.body.as_ref()) {
            Some(SetExpr::Values(values)) => &values.rows,
            _ => {
                return Err(ProxyError::Routing(format!(
                    "INSERT into sharded table '{}' must use a VALUES list",
                    table
                )))
            }
        };

        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                row.get(position)
                    .and_then(Self::literal)
                    .map(|key| InsertRow { index, key })
                    .ok_or_else(|| {
                        ProxyError::Routing(format!(
                            "row {} of INSERT into '{}' has no literal value for {}",
                            index + 1,
                            table,
                            column
                        ))
                    })
            })
            .collect()
    }

    /// Helper: Keys a WHERE clause binds to the target's sharding column
    fn key_values(selection: &Expr, column: &str, target: &TableWithJoins, sole: bool) -> BTreeSet<Value> {
        let key = KeyColumn::new(column, &target.relation, sole);
        Self::bound_values(selection, &key).unwrap_or_default()
    }

    /// Helper: Values a predicate pins the sharding column to
    ///
    /// Returns None when the predicate does not restrict the column to a
    /// finite set of literals, in which case every shard must be visited.
    fn bound_values(expr: &Expr, key: &KeyColumn) -> Option<BTreeSet<Value>> {
        match expr {
            Expr::Nested(inner) => Self::bound_values(inner, key),
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::Eq => {
                    if key.matches(left) {
                        Self::literal(right).map(|v| BTreeSet::from([v]))
                    } else if key.matches(right) {
                        Self::literal(left).map(|v| BTreeSet::from([v]))
                    } else {
                        None
                    }
                }
                // Either side alone is a sound restriction
                BinaryOperator::And => {
                    match (Self::bound_values(left, key), Self::bound_values(right, key)) {
                        (Some(l), Some(r)) => {
                            let both: BTreeSet<Value> = l.intersection(&r).cloned().collect();
                            if both.is_empty() {
                                Some(l)
                            } else {
                                Some(both)
                            }
                        }
                        (Some(l), None) => Some(l),
                        (None, r) => r,
                    }
                }
                // Only sound when both sides are restricted
                BinaryOperator::Or => {
                    let mut l = Self::bound_values(left, key)?;
                    l.extend(Self::bound_values(right, key)?);
                    Some(l)
                }
                _ => None,
            },
            Expr::InList {
                expr,
                list,
                negated: false,
            } if key.matches(expr) => list.iter().map(Self::literal).collect(),
            _ => None,
        }
    }

    /// Helper: Convert a literal expression to a key value
    fn literal(expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Value(SqlValue::Number(n, _)) => Some(Self::number(n)),
            Expr::Value(SqlValue::SingleQuotedString(s))
            | Expr::Value(SqlValue::DoubleQuotedString(s)) => Some(Value::Text(s.clone())),
            Expr::Value(SqlValue::Boolean(b)) => Some(Value::Boolean(*b)),
            Expr::Value(SqlValue::Null) => Some(Value::Null),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => match Self::literal(expr)? {
                Value::Integer(i) => Some(Value::Integer(-i)),
                Value::Text(s) => Some(Value::Text(format!("-{}", s))),
                _ => None,
            },
            Expr::Nested(inner) => Self::literal(inner),
            _ => None,
        }
    }

    /// Integral numbers hash the same however they are written, so `7.0`
    /// binds the same key as `7`
    fn number(text: &str) -> Value {
        if let Ok(i) = text.parse::<i64>() {
            return Value::Integer(i);
        }
        match text.parse::<f64>() {
            Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT => {
                Value::Integer(f as i64)
            }
            _ => Value::Text(text.to_string()),
        }
    }

    fn limit_clause(query: &Query) -> Option<LimitClause> {
        let limit = Self::unsigned(query.limit.as_ref()?)?;
        let offset = match &query.offset {
            Some(offset) => Self::unsigned(&offset.value)?,
            None => 0,
        };
        Some(LimitClause { offset, limit })
    }

    fn unsigned(expr: &Expr) -> Option<u64> {
        match expr {
            Expr::Value(SqlValue::Number(n, _)) => n.parse().ok(),
            _ => None,
        }
    }

    fn order_keys(query: &Query) -> Vec<OrderKey> {
        let Some(order_by) = &query.order_by else {
            return Vec::new();
        };
        order_by
            .exprs
            .iter()
            .map_while(|item| {
                let column = match &item.expr {
                    Expr::Identifier(ident) => ident.value.to_uppercase(),
                    Expr::CompoundIdentifier(idents) => idents.last()?.value.to_uppercase(),
                    _ => return None,
                };
                Some(OrderKey {
                    column,
                    ascending: item.asc.unwrap_or(true),
                })
            })
            .collect()
    }
}

impl ParsedStatement {
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// The statement each shard receives when a SELECT window spans shards
    ///
    /// Every shard must return enough rows to cover the global window, so
    /// `LIMIT o, n` becomes `LIMIT o+n` and the offset is applied after
    /// merging.
    pub fn widened_limit_sql(&self) -> Option<String> {
        let limit = self.limit?;
        let Statement::Query(query) = &self.statement else {
            return None;
        };
        let mut query = query.as_ref().clone();
        let window = limit.offset.saturating_add(limit.limit);
        query.limit = Some(Expr::Value(SqlValue::Number(window.to_string(), false)));
        query.offset = None;
        Some(Statement::Query(Box::new(query)).to_string())
    }

    /// The INSERT restricted to the given VALUES rows
    pub fn insert_subset_sql(&self, rows: &[usize]) -> Option<String> {
        let Statement::Insert(insert) = &self.statement else {
            return None;
        };
        let mut insert = insert.clone();
        let source = insert.source.as_mut()?;
        let SetExpr::Values(values) = source.body.as_mut() else {
            return None;
        };
        values.rows = rows
            .iter()
            .filter_map(|i| values.rows.get(*i).cloned())
            .collect();
        Some(Statement::Insert(insert).to_string())
    }
}
