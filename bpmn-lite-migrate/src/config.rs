//! Migration engine configuration. Defaults live in code and can be overridden from YAML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_max_loop_cardinality() -> u32 {
    1000
}

fn default_max_routing_depth() -> usize {
    32
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Upper bound on the cardinality of a multi-instance activity created by a migration.
    #[serde(default = "default_max_loop_cardinality")]
    pub max_loop_cardinality: u32,

    /// How many gateways may be chained while routing a landed token.
    #[serde(default = "default_max_routing_depth")]
    pub max_routing_depth: usize,

    /// Remove join executions that no remaining branch can reach.
    #[serde(default = "default_true")]
    pub discard_moot_joins: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_loop_cardinality: default_max_loop_cardinality(),
            max_routing_depth: default_max_routing_depth(),
            discard_moot_joins: true,
        }
    }
}

impl MigrationConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Parsing migration config")
    }

    /// Load from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
    }
}
