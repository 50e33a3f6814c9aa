// NoSE
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::query::planner::{ColumnFamilyCost, CostModel, EntryCountCost, FieldSizeCost, RequestCountCost};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CostModelConfig {
    RequestCount,
    EntryCount,
    FieldSize,
    ColumnFamily {
        index_cost: f64,
        partition_cost: f64,
        row_cost: f64,
        insert_cost: f64,
        delete_cost: f64,
    },
}

impl CostModelConfig {
    pub fn build(&self) -> Box<dyn CostModel> {
        match self {
            CostModelConfig::RequestCount => Box::new(RequestCountCost::new()),
            CostModelConfig::EntryCount => Box::new(EntryCountCost::new()),
            CostModelConfig::FieldSize => Box::new(FieldSizeCost::new()),
            CostModelConfig::ColumnFamily {
                index_cost,
                partition_cost,
                row_cost,
                insert_cost,
                delete_cost,
            } => Box::new(ColumnFamilyCost {
                index_cost: *index_cost,
                partition_cost: *partition_cost,
                row_cost: *row_cost,
                insert_cost: *insert_cost,
                delete_cost: *delete_cost,
            }),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let CostModelConfig::ColumnFamily {
            index_cost,
            partition_cost,
            row_cost,
            insert_cost,
            delete_cost,
        } = self
        {
            let coefficients = [
                ("index_cost", index_cost),
                ("partition_cost", partition_cost),
                ("row_cost", row_cost),
                ("insert_cost", insert_cost),
                ("delete_cost", delete_cost),
            ];
            for (name, value) in coefficients {
                if !value.is_finite() || *value < 0.0 {
                    return Err(ConfigError::InvalidValue(format!("{name} must be a finite non-negative number, got {value}")));
                }
            }
        }
        Ok(())
    }
}

impl Default for CostModelConfig {
    fn default() -> Self {
        CostModelConfig::RequestCount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Space budget in bytes; unbounded when absent
    pub max_space: Option<u64>,
    pub cost_model: CostModelConfig,
    /// Second solver pass keeping the fewest indexes at optimal cost
    pub minimize_index_count: bool,
    pub parallel: bool,
    /// Pairwise payload merge of unordered candidates
    pub combine_indexes: bool,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            max_space: None,
            cost_model: CostModelConfig::default(),
            minimize_index_count: true,
            parallel: true,
            combine_indexes: true,
        }
    }
}

impl AdvisorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cost_model.validate()
    }
}
