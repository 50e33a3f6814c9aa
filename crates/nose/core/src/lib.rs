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

//! NoSE Core Library
//!
//! Recommends a denormalized schema for a wide-column or key-value store.
//! Given a conceptual model and a weighted workload, it enumerates candidate
//! indexes, plans every statement against them, and solves an integer
//! program for the cheapest set of indexes that fits a space budget.

pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod search;
pub mod statement;
pub mod statistics;

use tracing::{info, instrument};

// Re-export commonly used types
pub use config::{AdvisorConfig, ConfigError, CostModelConfig};
pub use error::{AdvisorError, Result};
pub use model::{Entity, Field, Index, KeyPath, Model, Relationship};
pub use query::planner::{CostModel, IndexEnumerator, Plan, PlanError, QueryPlanner, UpdatePlan, UpdatePlanner};
pub use search::{Search, SearchError, SearchResult};
pub use statement::{Delete, Insert, Mutation, Operator, Query, Statement, Update, Workload};

/// Enumerates candidates for `workload` and selects the cheapest schema
#[instrument(skip_all, fields(statements = workload.statements().len()))]
pub fn advise(workload: &Workload, config: &AdvisorConfig) -> Result<SearchResult> {
    let search = Search::new(workload, config)?;
    let candidates = IndexEnumerator::new(workload.model())
        .with_combine(config.combine_indexes)
        .indexes_for_workload(workload, config.parallel)?;
    info!(candidates = candidates.len(), "Candidate indexes enumerated");
    Ok(search.search(&candidates)?)
}
