// Schema metadata
// The routing view of a logical database: its shards and, per table, the
// table type, the shards holding it and its sharding rule.

use crate::config::{FunctionConfig, SchemaConfig, TableConfig};
use crate::sharding::{HashFunction, RangeFunction, ShardId, ShardingFunction};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// How a table's rows are placed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    /// Rows are partitioned over the table's shards
    #[default]
    Normal,
    /// Every shard holds a full copy
    Global,
}

/// Inconsistent schema configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("schema '{0}' declares no shards")]
    NoShards(String),
    #[error("table '{0}' declares no shards")]
    TableWithoutShards(String),
    #[error("table '{table}' uses shard {shard} which schema '{schema}' does not declare")]
    UnknownShard {
        schema: String,
        table: String,
        shard: ShardId,
    },
    #[error("table '{table}' lists shard {shard} more than once")]
    DuplicateShard { table: String, shard: ShardId },
    #[error("table '{0}' is declared more than once")]
    DuplicateTable(String),
    #[error("range rule of table '{table}' has {bounds} bound(s) for {shards} shard(s)")]
    BoundCount {
        table: String,
        bounds: usize,
        shards: usize,
    },
    #[error("range rule of table '{0}' must have strictly increasing bounds")]
    UnorderedBounds(String),
}

/// The sharding column and its function
#[derive(Debug, Clone)]
pub struct Rule {
    /// Column name, upper-cased for case-insensitive matching
    pub column: String,
    pub function: Arc<dyn ShardingFunction>,
}

/// One logical table
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub kind: TableType,
    /// Shards holding this table, ascending
    shards: Vec<ShardId>,
    pub rule: Option<Rule>,
}

impl Table {
    /// Shards holding this table, in ascending order
    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    pub fn is_global(&self) -> bool {
        self.kind == TableType::Global
    }

    /// Pick any one shard holding the table
    pub fn random_shard(&self) -> ShardId {
        // Construction guarantees at least one shard
        self.shards
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_default()
    }

    /// Name of the sharding column, upper-cased, if the table has a rule
    pub fn rule_column(&self) -> Option<&str> {
        self.rule.as_ref().map(|r| r.column.as_str())
    }

    fn from_config(schema: &str, all: &BTreeSet<ShardId>, config: &TableConfig) -> Result<Self, ConfigError> {
        if config.shards.is_empty() {
            return Err(ConfigError::TableWithoutShards(config.name.clone()));
        }

        let mut seen = BTreeSet::new();
        for shard in &config.shards {
            if !all.contains(shard) {
                return Err(ConfigError::UnknownShard {
                    schema: schema.to_string(),
                    table: config.name.clone(),
                    shard: *shard,
                });
            }
            if !seen.insert(*shard) {
                return Err(ConfigError::DuplicateShard {
                    table: config.name.clone(),
                    shard: *shard,
                });
            }
        }

        let rule = match &config.rule {
            Some(rule) => {
                let function: Arc<dyn ShardingFunction> = match &rule.function {
                    FunctionConfig::Hash => Arc::new(HashFunction::new(config.shards.iter().copied())),
                    FunctionConfig::Range { bounds } => {
                        if bounds.len() != config.shards.len() {
                            return Err(ConfigError::BoundCount {
                                table: config.name.clone(),
                                bounds: bounds.len(),
                                shards: config.shards.len(),
                            });
                        }
                        if bounds.windows(2).any(|w| w[0] >= w[1]) {
                            return Err(ConfigError::UnorderedBounds(config.name.clone()));
                        }
                        // Bounds pair with shards in declaration order
                        let pairs = bounds.iter().copied().zip(config.shards.iter().copied()).collect();
                        Arc::new(RangeFunction::new(pairs))
                    }
                };
                Some(Rule {
                    column: rule.column.to_uppercase(),
                    function,
                })
            }
            None => None,
        };

        Ok(Self {
            name: config.name.clone(),
            kind: config.kind,
            shards: seen.into_iter().collect(),
            rule,
        })
    }
}

/// One logical database spread over shards
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    shards: Vec<ShardId>,
    /// Tables keyed by upper-cased name
    tables: HashMap<String, Table>,
}

impl Schema {
    /// Build and validate the routing metadata from configuration
    pub fn from_config(config: &SchemaConfig) -> Result<Self, ConfigError> {
        let all: BTreeSet<ShardId> = config.shards.iter().copied().collect();
        if all.is_empty() {
            return Err(ConfigError::NoShards(config.name.clone()));
        }

        let mut tables = HashMap::new();
        for table_config in &config.tables {
            let table = Table::from_config(&config.name, &all, table_config)?;
            let key = table.name.to_uppercase();
            if tables.insert(key, table).is_some() {
                return Err(ConfigError::DuplicateTable(table_config.name.clone()));
            }
        }

        Ok(Self {
            name: config.name.clone(),
            shards: all.into_iter().collect(),
            tables,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every shard of the database, ascending
    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    /// Look a table up by name, ignoring case and any schema qualifier
    pub fn table(&self, name: &str) -> Option<&Table> {
        let bare = name.rsplit('.').next().unwrap_or(name);
        let bare = bare.trim_matches(|c| c == '`' || c == '"');
        self.tables.get(&bare.to_uppercase())
    }

    /// Table names, sorted
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.values().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Pick any one shard of the database
    pub fn random_shard(&self) -> ShardId {
        self.shards
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_default()
    }
}
