// Schema configuration
// The partitioning layout of a logical database is described in a JSON
// file: which shards exist, and for every table its type, the shards that
// hold it and the rule that spreads rows over them.

use crate::schema::TableType;
use crate::sharding::ShardId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level layout of one logical database
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaConfig {
    pub name: String,
    /// Every shard backing this database
    pub shards: Vec<ShardId>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// One table's placement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: TableType,
    pub shards: Vec<ShardId>,
    #[serde(default)]
    pub rule: Option<RuleConfig>,
}

/// The sharding column and the function applied to its values
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    pub column: String,
    pub function: FunctionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FunctionConfig {
    /// seahash(value) % shard count
    Hash,
    /// One exclusive upper bound per table shard, in the table's shard order
    Range { bounds: Vec<i64> },
}

impl SchemaConfig {
    /// Load a schema configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read schema file {}", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("failed to parse schema file {}", path.display()))
    }

    /// Parse a schema configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// A small built-in layout used when no schema file is given
    ///
    /// `users` is hashed on `id` over every shard, `orders` is range
    /// partitioned on `order_id` in blocks of 1000, and `countries` is a
    /// global table replicated everywhere.
    pub fn demo(num_shards: u32) -> Self {
        let shards: Vec<ShardId> = (0..num_shards.max(1)).collect();
        let bounds = shards.iter().map(|s| (i64::from(*s) + 1) * 1000).collect();
        Self {
            name: "demo".to_string(),
            shards: shards.clone(),
            tables: vec![
                TableConfig {
                    name: "users".to_string(),
                    kind: TableType::Normal,
                    shards: shards.clone(),
                    rule: Some(RuleConfig {
                        column: "id".to_string(),
                        function: FunctionConfig::Hash,
                    }),
                },
                TableConfig {
                    name: "orders".to_string(),
                    kind: TableType::Normal,
                    shards: shards.clone(),
                    rule: Some(RuleConfig {
                        column: "order_id".to_string(),
                        function: FunctionConfig::Range { bounds },
                    }),
                },
                TableConfig {
                    name: "countries".to_string(),
                    kind: TableType::Global,
                    shards,
                    rule: None,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SHOP: &str = r#"{
        "name": "shop",
        "shards": [0, 1, 2, 3],
        "tables": [
            { "name": "users", "type": "normal", "shards": [0, 1, 2, 3],
              "rule": { "column": "id", "function": { "kind": "hash" } } },
            { "name": "orders", "shards": [0, 1],
              "rule": { "column": "order_id", "function": { "kind": "range", "bounds": [1000, 2000] } } },
            { "name": "countries", "type": "global", "shards": [0, 1, 2, 3] }
        ]
    }"#;

    #[test]
    fn test_parse_shop_layout() {
        let config = SchemaConfig::from_json(SHOP).unwrap();
        assert_eq!(config.name, "shop");
        assert_eq!(config.tables.len(), 3);

        // type defaults to normal
        assert_eq!(config.tables[1].kind, TableType::Normal);
        assert_eq!(
            config.tables[1].rule.as_ref().unwrap().function,
            FunctionConfig::Range {
                bounds: vec![1000, 2000]
            }
        );
        assert_eq!(config.tables[2].kind, TableType::Global);
        assert!(config.tables[2].rule.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SHOP.as_bytes()).unwrap();

        let config = SchemaConfig::load(file.path()).unwrap();
        assert_eq!(config, SchemaConfig::from_json(SHOP).unwrap());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let err = SchemaConfig::load(&missing).unwrap_err();
        assert!(format!("{:#}", err).contains("missing.json"));
    }

    #[test]
    fn test_unknown_function_kind_rejected() {
        let text = r#"{ "name": "x", "shards": [0],
            "tables": [{ "name": "t", "shards": [0],
                "rule": { "column": "id", "function": { "kind": "modulo" } } }] }"#;
        assert!(SchemaConfig::from_json(text).is_err());
    }
}
