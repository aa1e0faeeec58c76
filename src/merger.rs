// Result merging
// Rows from every shard of a scatter-gather SELECT are collected here and
// handed back as one ordered result once all shards are done.

use crate::protocol::{Packet, PacketError, RowDataPacket};
use crate::query::parser::OrderKey;
use crate::route::Pagination;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Position and declared type of one result column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInfo {
    pub index: usize,
    pub column_type: u8,
}

impl ColumnInfo {
    pub fn new(index: usize, column_type: u8) -> Self {
        Self { index, column_type }
    }

    /// True for MySQL column types whose text form compares numerically
    pub fn is_numeric(&self) -> bool {
        // DECIMAL, TINY, SHORT, LONG, FLOAT, DOUBLE, LONGLONG, INT24, YEAR, NEWDECIMAL
        matches!(
            self.column_type,
            0x00 | 0x01 | 0x02 | 0x03 | 0x04 | 0x05 | 0x08 | 0x09 | 0x0d | 0xf6
        )
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("ORDER BY column {0} is not in the result")]
    UnknownOrderColumn(String),
    #[error("rows offered before the column layout was known")]
    NotInitialized,
    #[error("malformed row: {0}")]
    Row(#[from] PacketError),
}

/// Combines rows from several shards into one result
///
/// Calls are serialized by the caller; implementations need no locking.
pub trait Merger: Send {
    /// Learn the column layout, keyed by upper-cased column name
    fn init(&mut self, columns: HashMap<String, ColumnInfo>, field_count: usize) -> Result<(), MergeError>;

    /// Accept one raw row from any shard
    fn offer(&mut self, row: &Packet) -> Result<(), MergeError>;

    /// Remove and return the merged rows in output order
    fn take_result(&mut self) -> VecDeque<RowDataPacket>;

    /// Window to apply to the merged rows
    fn pagination(&self) -> Pagination;
}

/// Buffers every row, then sorts by the ORDER BY columns if there are any
#[derive(Debug)]
pub struct RowMerger {
    pagination: Pagination,
    order_by: Vec<OrderKey>,
    /// (column info, ascending) per ORDER BY key, resolved at init
    sort_keys: Vec<(ColumnInfo, bool)>,
    field_count: Option<usize>,
    rows: Vec<RowDataPacket>,
}

impl RowMerger {
    pub fn new(pagination: Pagination, order_by: Vec<OrderKey>) -> Self {
        Self {
            pagination,
            order_by,
            sort_keys: Vec::new(),
            field_count: None,
            rows: Vec::new(),
        }
    }

    /// Rows buffered so far
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn compare(keys: &[(ColumnInfo, bool)], a: &RowDataPacket, b: &RowDataPacket) -> Ordering {
        for (info, ascending) in keys {
            let left = a.values.get(info.index).and_then(Option::as_ref);
            let right = b.values.get(info.index).and_then(Option::as_ref);
            // NULL sorts first ascending, as in MySQL
            let ord = match (left, right) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(l), Some(r)) => {
                    if info.is_numeric() {
                        Self::compare_numeric(l, r)
                    } else {
                        l.as_ref().cmp(r.as_ref())
                    }
                }
            };
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn compare_numeric(l: &[u8], r: &[u8]) -> Ordering {
        let parse = |b: &[u8]| std::str::from_utf8(b).ok().and_then(|s| s.parse::<f64>().ok());
        match (parse(l), parse(r)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => l.cmp(r),
        }
    }
}

impl Merger for RowMerger {
    fn init(&mut self, columns: HashMap<String, ColumnInfo>, field_count: usize) -> Result<(), MergeError> {
        self.sort_keys = self
            .order_by
            .iter()
            .map(|key| {
                columns
                    .get(&key.column)
                    .map(|info| (*info, key.ascending))
                    .ok_or_else(|| MergeError::UnknownOrderColumn(key.column.clone()))
            })
            .collect::<Result<_, _>>()?;
        self.field_count = Some(field_count);
        Ok(())
    }

    fn offer(&mut self, row: &Packet) -> Result<(), MergeError> {
        let field_count = self.field_count.ok_or(MergeError::NotInitialized)?;
        self.rows.push(RowDataPacket::read(row, field_count)?);
        Ok(())
    }

    fn take_result(&mut self) -> VecDeque<RowDataPacket> {
        let mut rows = std::mem::take(&mut self.rows);
        if !self.sort_keys.is_empty() {
            // Stable, so rows equal on every key keep arrival order
            let keys = &self.sort_keys;
            rows.sort_by(|a, b| Self::compare(keys, a, b));
        }
        rows.into()
    }

    fn pagination(&self) -> Pagination {
        self.pagination
    }
}
