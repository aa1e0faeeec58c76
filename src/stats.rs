// SQL statistics
// Every completed backend reply is recorded with its shard and latency, so
// slow shards and skewed distribution show up without tracing every query.

use crate::session::BackendConnection;
use crate::sharding::ShardId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One statement execution on one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlRecord {
    pub host: String,
    pub database: String,
    pub shard: ShardId,
    pub sql: String,
    pub elapsed: Duration,
}

impl SqlRecord {
    /// Build a record for a reply that just completed on `connection`
    pub fn completed(connection: &BackendConnection, sql: &str) -> Self {
        let source = connection.datasource();
        Self {
            host: source.host.clone(),
            database: source.database.clone(),
            shard: source.shard,
            sql: sql.to_string(),
            elapsed: Instant::now().saturating_duration_since(connection.last_active()),
        }
    }
}

/// Sink for execution records
pub trait Recorder: Send + Sync {
    fn record(&self, record: SqlRecord);
}

/// Aggregated statistics for a single shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub shard_id: ShardId,
    pub statements: u64,
    pub total: Duration,
    pub slowest: Duration,
}

impl ShardStats {
    pub fn format(&self) -> String {
        let avg = if self.statements == 0 {
            Duration::ZERO
        } else {
            self.total / self.statements as u32
        };
        format!(
            "Shard {}: {} statement(s), avg {:?}, max {:?}",
            self.shard_id, self.statements, avg, self.slowest
        )
    }
}

/// In-memory recorder keeping per-shard totals
pub struct SqlStatistics {
    slow_threshold: Duration,
    shards: Mutex<BTreeMap<ShardId, ShardStats>>,
}

impl SqlStatistics {
    /// Statements slower than `slow_threshold` are logged as warnings
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            shards: Mutex::new(BTreeMap::new()),
        }
    }

    /// Per-shard statistics, ascending by shard
    pub fn snapshot(&self) -> Vec<ShardStats> {
        self.shards.lock().values().cloned().collect()
    }
}

impl Default for SqlStatistics {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Recorder for SqlStatistics {
    fn record(&self, record: SqlRecord) {
        if record.elapsed >= self.slow_threshold {
            warn!(
                shard = record.shard,
                host = %record.host,
                elapsed_ms = record.elapsed.as_millis() as u64,
                sql = %record.sql,
                "slow statement"
            );
        } else {
            debug!(shard = record.shard, elapsed_us = record.elapsed.as_micros() as u64, "statement completed");
        }

        let mut shards = self.shards.lock();
        let stats = shards.entry(record.shard).or_insert_with(|| ShardStats {
            shard_id: record.shard,
            ..ShardStats::default()
        });
        stats.statements += 1;
        stats.total += record.elapsed;
        stats.slowest = stats.slowest.max(record.elapsed);
    }
}
