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

//! Query Planning System
//!
//! Turns a statement and a set of candidate indexes into the tree of every
//! valid execution plan, prices plans through a pluggable cost model and
//! derives the reads and writes mutations need.

pub mod cost_model;
pub mod enumerator;
pub mod plan_generator;
pub mod state;
pub mod steps;
pub mod tree;
pub mod update_planner;

// Re-export commonly used types
pub use cost_model::{ColumnFamilyCost, CostModel, EntryCountCost, FieldSizeCost, RequestCountCost, step_cost};
pub use enumerator::IndexEnumerator;
pub use plan_generator::{PlanError, QueryPlanner};
pub use state::QueryState;
pub use steps::{FilterStep, IndexLookupStep, LimitStep, MutationStep, PlanStep, RootStep, SortStep, StepKind};
pub use tree::{Plan, PlanNode, QueryPlanTree};
pub use update_planner::{UpdatePlan, UpdatePlanner};
