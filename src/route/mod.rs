// Statement routing
// Decides which shards a statement must reach. The result is an ordered
// list of Outlets, one per shard, each carrying the statement text that
// shard should run.
//
// Routing policy, in order:
// 1. Not table-scoped (or table unknown): any one shard
// 2. Read of a GLOBAL table: any one shard holding a copy
// 3. No sharding key bound: every shard of the table (scatter-gather)
// 4. Keys bound: the shards the table's sharding function picks

use crate::error::ProxyError;
use crate::query::parser::OrderKey;
use crate::query::{ParsedStatement, StatementKind, StatementParser};
use crate::schema::{Schema, Table};
use crate::sharding::{ShardId, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Connection charsets the router accepts
const CHARSETS: &[&str] = &["utf8", "utf8mb3", "utf8mb4", "latin1", "ascii", "binary"];

/// One routed sub-statement targeted at a single shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outlet {
    pub shard: ShardId,
    pub sql: String,
}

impl Outlet {
    pub fn new(shard: ShardId, sql: impl Into<String>) -> Self {
        Self {
            shard,
            sql: sql.into(),
        }
    }
}

/// Row window applied after merging multi-shard results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    /// Rows to skip
    pub offset: usize,
    /// Rows to emit after skipping; None means no limit
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    /// Number of rows emitted from a merged result of `total` rows
    pub fn emitted(&self, total: usize) -> usize {
        let available = total.saturating_sub(self.offset);
        match self.limit {
            Some(limit) => available.min(limit),
            None => available,
        }
    }
}

/// The routing result: ordered Outlets plus the post-merge window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outlets {
    outlets: Vec<Outlet>,
    pagination: Pagination,
    order_by: Vec<OrderKey>,
}

impl Outlets {
    fn single(outlet: Outlet) -> Self {
        Self {
            outlets: vec![outlet],
            pagination: Pagination::default(),
            order_by: Vec::new(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Outlet> {
        self.outlets.iter()
    }

    pub fn len(&self) -> usize {
        self.outlets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outlets.is_empty()
    }

    /// Target shards in routing order
    pub fn shards(&self) -> Vec<ShardId> {
        self.outlets.iter().map(|o| o.shard).collect()
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    /// ORDER BY columns the merged result must follow
    pub fn order_by(&self) -> &[OrderKey] {
        &self.order_by
    }

    /// Format the outlets as a table for display
    pub fn format(&self) -> String {
        let headers = ["shard", "sql"];
        let rows: Vec<[String; 2]> = self
            .outlets
            .iter()
            .map(|o| [o.shard.to_string(), o.sql.clone()])
            .collect();

        // Calculate column widths
        let mut widths = [headers[0].len(), headers[1].len()];
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let border = |left: &str, mid: &str, right: &str| {
            format!(
                "{}{}{}{}{}\n",
                left,
                "─".repeat(widths[0] + 2),
                mid,
                "─".repeat(widths[1] + 2),
                right
            )
        };

        let mut result = border("┌", "┬", "┐");
        result.push_str(&format!(
            "│ {:<w0$} │ {:<w1$} │\n",
            headers[0],
            headers[1],
            w0 = widths[0],
            w1 = widths[1]
        ));
        result.push_str(&border("├", "┼", "┤"));
        for row in &rows {
            result.push_str(&format!(
                "│ {:<w0$} │ {:<w1$} │\n",
                row[0],
                row[1],
                w0 = widths[0],
                w1 = widths[1]
            ));
        }
        result.push_str(&border("└", "┴", "┘"));

        result.push_str(&format!("\n{} outlet(s)", self.outlets.len()));
        if self.pagination != Pagination::default() {
            let limit = self
                .pagination
                .limit
                .map_or_else(|| "all".to_string(), |l| l.to_string());
            result.push_str(&format!(
                ", merged window offset {} limit {}",
                self.pagination.offset, limit
            ));
        }
        result
    }
}

impl<'a> IntoIterator for &'a Outlets {
    type Item = &'a Outlet;
    type IntoIter = std::slice::Iter<'a, Outlet>;

    fn into_iter(self) -> Self::IntoIter {
        self.outlets.iter()
    }
}

/// The statement router
pub struct Router;

impl Router {
    /// Route a statement to the shards that must run it
    ///
    /// `charset` is the client connection charset and `kind` the statement
    /// classification made by the caller. Fails before anything is
    /// dispatched when the statement cannot be parsed or placed.
    pub fn route(
        schema: &Schema,
        sql: &str,
        charset: &str,
        kind: StatementKind,
    ) -> Result<Outlets, ProxyError> {
        if !CHARSETS.iter().any(|c| c.eq_ignore_ascii_case(charset)) {
            return Err(ProxyError::Parse(format!("Unknown charset '{}'", charset)));
        }

        let parsed = StatementParser::parse(schema, sql)?;

        let Some(table) = parsed.table.as_deref().and_then(|name| schema.table(name)) else {
            let shard = schema.random_shard();
            debug!(schema = schema.name(), shard, "statement not table-scoped, routing to any shard");
            return Ok(Outlets::single(Outlet::new(shard, sql)));
        };

        if table.is_global() && kind.is_read() {
            let shard = table.random_shard();
            debug!(table = %table.name, shard, "read of global table, routing to one copy");
            return Ok(Outlets::single(Outlet::new(shard, sql)));
        }

        let outlets = if parsed.values.is_empty() {
            debug!(table = %table.name, shards = table.shards().len(), "no sharding key bound, broadcasting");
            table
                .shards()
                .iter()
                .map(|shard| Outlet::new(*shard, sql))
                .collect()
        } else if parsed.insert_rows.is_empty() {
            Self::calculate(table, &parsed.values)?
                .into_iter()
                .map(|shard| Outlet::new(shard, sql))
                .collect()
        } else {
            Self::split_insert(table, &parsed, sql)?
        };

        Ok(Self::paginate(outlets, &parsed))
    }

    /// Evaluate the table's function and check the result against the table
    fn calculate(table: &Table, values: &BTreeSet<Value>) -> Result<BTreeSet<ShardId>, ProxyError> {
        let rule = table.rule.as_ref().ok_or_else(|| {
            ProxyError::Routing(format!("table '{}' has no sharding rule", table.name))
        })?;

        let shards = rule
            .function
            .calculate(values)
            .map_err(|e| ProxyError::Routing(e.to_string()))?;

        if shards.is_empty() {
            return Err(ProxyError::Routing(format!(
                "{} placed no shard for table '{}'",
                rule.function.describe(),
                table.name
            )));
        }
        if let Some(stray) = shards.iter().find(|s| !table.shards().contains(s)) {
            return Err(ProxyError::Routing(format!(
                "{} placed shard {} outside table '{}'",
                rule.function.describe(),
                stray,
                table.name
            )));
        }

        debug!(table = %table.name, ?shards, function = %rule.function.describe(), "sharding key bound");
        Ok(shards)
    }

    /// Give every shard only the INSERT rows it owns
    fn split_insert(table: &Table, parsed: &ParsedStatement, sql: &str) -> Result<Vec<Outlet>, ProxyError> {
        let mut rows_by_shard: BTreeMap<ShardId, Vec<usize>> = BTreeMap::new();
        for row in &parsed.insert_rows {
            let shards = Self::calculate(table, &BTreeSet::from([row.key.clone()]))?;
            if shards.len() != 1 {
                return Err(ProxyError::Routing(format!(
                    "value {} of table '{}' maps to {} shards",
                    row.key,
                    table.name,
                    shards.len()
                )));
            }
            for shard in shards {
                rows_by_shard.entry(shard).or_default().push(row.index);
            }
        }

        // A single target keeps the statement exactly as the client sent it
        if rows_by_shard.len() == 1 {
            return Ok(rows_by_shard
                .into_keys()
                .map(|shard| Outlet::new(shard, sql))
                .collect());
        }

        rows_by_shard
            .into_iter()
            .map(|(shard, rows)| {
                let sub_sql = parsed.insert_subset_sql(&rows).ok_or_else(|| {
                    ProxyError::Routing("INSERT rows could not be split".to_string())
                })?;
                Ok(Outlet::new(shard, sub_sql))
            })
            .collect()
    }

    /// Attach the merge window when a SELECT spans several shards
    fn paginate(outlets: Vec<Outlet>, parsed: &ParsedStatement) -> Outlets {
        let mut result = Outlets {
            outlets,
            pagination: Pagination::default(),
            order_by: Vec::new(),
        };
        if result.outlets.len() < 2 {
            return result;
        }

        result.order_by = parsed.order_by.clone();
        if let (Some(limit), Some(sql)) = (parsed.limit, parsed.widened_limit_sql()) {
            result.pagination = Pagination::new(
                usize::try_from(limit.offset).unwrap_or(usize::MAX),
                Some(usize::try_from(limit.limit).unwrap_or(usize::MAX)),
            );
            for outlet in &mut result.outlets {
                outlet.sql = sql.clone();
            }
        }
        result
    }
}
