// Sharding functions
// Sharding splits a logical table horizontally: every shard holds a subset
// of the rows, and a sharding function tells us which shards can hold the
// rows matching a set of key values.
//
// Two strategies are supported:
// 1. Hash-based: hash(key) % shard_count, mapped onto the table's shards
// 2. Range-based: ordered upper bounds, each bound owned by one shard

pub mod value;

pub use value::Value;

use seahash::hash;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Identifier of one physical shard
pub type ShardId = u32;

/// Errors raised when a function cannot place a value
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShardingError {
    #[error("value {value} is not an integer, range function on {function} cannot place it")]
    NotAnInteger { value: String, function: String },
    #[error("value {value} is beyond the last bound of {function}")]
    OutOfRange { value: String, function: String },
}

/// Maps a set of key values to the shards that may hold matching rows
///
/// Implementations must be pure and deterministic: the same values always
/// produce the same shards, and every returned id belongs to the table the
/// function was built for. The value set is never empty; the router
/// broadcasts instead of calling the function in that case.
pub trait ShardingFunction: Send + Sync + fmt::Debug {
    /// Compute the shard ids for the given values
    fn calculate(&self, values: &BTreeSet<Value>) -> Result<BTreeSet<ShardId>, ShardingError>;

    /// Human readable description, used in logs
    fn describe(&self) -> String;
}

/// Hash-based function over a table's ordered shard list
#[derive(Debug, Clone)]
pub struct HashFunction {
    shards: Vec<ShardId>,
}

impl HashFunction {
    /// Create a hash function over the given shards
    ///
    /// The shard list is sorted so that two tables declaring the same shards
    /// in a different order still place values identically.
    pub fn new(shards: impl IntoIterator<Item = ShardId>) -> Self {
        let set: BTreeSet<ShardId> = shards.into_iter().collect();
        Self {
            shards: set.into_iter().collect(),
        }
    }

    /// Determine which shard a single value belongs to
    ///
    /// The value's canonical bytes are hashed with SeaHash, and the hash is
    /// mapped onto the shard list with modulo.
    pub fn shard_for(&self, value: &Value) -> ShardId {
        let hash_value = hash(&value.canonical_bytes());
        let index = (hash_value % self.shards.len() as u64) as usize;
        self.shards[index]
    }
}

impl ShardingFunction for HashFunction {
    fn calculate(&self, values: &BTreeSet<Value>) -> Result<BTreeSet<ShardId>, ShardingError> {
        if self.shards.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(values.iter().map(|v| self.shard_for(v)).collect())
    }

    fn describe(&self) -> String {
        format!("hash(shards={:?})", self.shards)
    }
}

/// Range-based function: shard i owns [bounds[i-1], bounds[i])
#[derive(Debug, Clone)]
pub struct RangeFunction {
    /// (exclusive upper bound, owning shard), ascending by bound
    bounds: Vec<(i64, ShardId)>,
}

impl RangeFunction {
    /// Pair each upper bound with a shard; callers validate the lengths
    pub fn new(bounds: Vec<(i64, ShardId)>) -> Self {
        Self { bounds }
    }

    fn shard_for(&self, value: &Value) -> Result<ShardId, ShardingError> {
        let key = value.as_integer().ok_or_else(|| ShardingError::NotAnInteger {
            value: value.to_string(),
            function: self.describe(),
        })?;

        // First bound strictly greater than the key owns it
        let pos = self.bounds.partition_point(|(upper, _)| *upper <= key);
        self.bounds
            .get(pos)
            .map(|(_, shard)| *shard)
            .ok_or_else(|| ShardingError::OutOfRange {
                value: value.to_string(),
                function: self.describe(),
            })
    }
}

impl ShardingFunction for RangeFunction {
    fn calculate(&self, values: &BTreeSet<Value>) -> Result<BTreeSet<ShardId>, ShardingError> {
        values.iter().map(|v| self.shard_for(v)).collect()
    }

    fn describe(&self) -> String {
        let bounds: Vec<String> = self
            .bounds
            .iter()
            .map(|(upper, shard)| format!("<{}:{}", upper, shard))
            .collect();
        format!("range({})", bounds.join(","))
    }
}
