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

use super::steps::{FilterStep, IndexLookupStep, LimitStep, MutationStep, PlanStep, SortStep};

pub const DEFAULT_FILTER_COST: f64 = 0.001;
pub const DEFAULT_SORT_COST: f64 = 0.01;
pub const DEFAULT_LIMIT_COST: f64 = 0.001;

/// Per-step cost function family.
///
/// Backends supply the cost of reading and writing indexes; client-side
/// steps default to small constants since they move no data.
#[cfg_attr(test, mockall::automock)]
pub trait CostModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn index_lookup_cost(&self, step: &IndexLookupStep) -> f64;

    fn filter_cost(&self, _step: &FilterStep) -> f64 {
        DEFAULT_FILTER_COST
    }

    fn sort_cost(&self, _step: &SortStep) -> f64 {
        DEFAULT_SORT_COST
    }

    fn limit_cost(&self, _step: &LimitStep) -> f64 {
        DEFAULT_LIMIT_COST
    }

    fn insert_cost(&self, step: &MutationStep) -> f64;

    fn delete_cost(&self, step: &MutationStep) -> f64;
}

/// Cost of a single step under `cost_model`
pub fn step_cost(cost_model: &dyn CostModel, step: &PlanStep) -> f64 {
    match step {
        PlanStep::Root(_) => 0.0,
        PlanStep::IndexLookup(step) => cost_model.index_lookup_cost(step),
        PlanStep::Filter(step) => cost_model.filter_cost(step),
        PlanStep::Sort(step) => cost_model.sort_cost(step),
        PlanStep::Limit(step) => cost_model.limit_cost(step),
        PlanStep::Insert(step) => cost_model.insert_cost(step),
        PlanStep::Delete(step) => cost_model.delete_cost(step),
    }
}

/// Counts requests: one per partition read, one per entry written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestCountCost;

impl RequestCountCost {
    pub fn new() -> Self {
        Self
    }
}

impl CostModel for RequestCountCost {
    fn name(&self) -> &'static str {
        "request_count"
    }

    fn index_lookup_cost(&self, step: &IndexLookupStep) -> f64 {
        step.partitions
    }

    fn insert_cost(&self, step: &MutationStep) -> f64 {
        step.rows
    }

    fn delete_cost(&self, step: &MutationStep) -> f64 {
        step.rows
    }
}

/// Counts index entries touched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryCountCost;

impl EntryCountCost {
    pub fn new() -> Self {
        Self
    }
}

impl CostModel for EntryCountCost {
    fn name(&self) -> &'static str {
        "entry_count"
    }

    fn index_lookup_cost(&self, step: &IndexLookupStep) -> f64 {
        step.rows()
    }

    fn insert_cost(&self, step: &MutationStep) -> f64 {
        step.rows
    }

    fn delete_cost(&self, step: &MutationStep) -> f64 {
        step.rows
    }
}

/// Counts bytes moved
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSizeCost;

impl FieldSizeCost {
    pub fn new() -> Self {
        Self
    }
}

impl CostModel for FieldSizeCost {
    fn name(&self) -> &'static str {
        "field_size"
    }

    fn index_lookup_cost(&self, step: &IndexLookupStep) -> f64 {
        step.rows() * step.index.entry_size() as f64
    }

    fn insert_cost(&self, step: &MutationStep) -> f64 {
        step.rows * step.index.entry_size() as f64
    }

    fn delete_cost(&self, step: &MutationStep) -> f64 {
        // Deletes only address the key
        let key_size: u64 = step.index.hash_fields().iter().chain(step.index.order_fields()).map(|field| field.size()).sum();
        step.rows * key_size as f64
    }
}

/// Linear model for wide-column stores: a fixed cost per request, per
/// partition and per row read, plus per-row write costs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFamilyCost {
    pub index_cost: f64,
    pub partition_cost: f64,
    pub row_cost: f64,
    pub insert_cost: f64,
    pub delete_cost: f64,
}

impl ColumnFamilyCost {
    pub fn new() -> Self {
        Self {
            index_cost: 0.5,
            partition_cost: 0.1,
            row_cost: 0.01,
            insert_cost: 0.05,
            delete_cost: 0.05,
        }
    }
}

impl Default for ColumnFamilyCost {
    fn default() -> Self {
        Self::new()
    }
}

impl CostModel for ColumnFamilyCost {
    fn name(&self) -> &'static str {
        "column_family"
    }

    fn index_lookup_cost(&self, step: &IndexLookupStep) -> f64 {
        let rows = step.index.lookup_rows(&step.clustering_eq(), step.range_filter.is_some());
        self.index_cost + step.partitions * (self.partition_cost + rows * self.row_cost)
    }

    fn insert_cost(&self, step: &MutationStep) -> f64 {
        self.index_cost + step.rows * self.insert_cost
    }

    fn delete_cost(&self, step: &MutationStep) -> f64 {
        self.index_cost + step.rows * self.delete_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, Index, KeyPath, Model};
    use crate::query::planner::state::QueryState;
    use crate::query::planner::steps::RootStep;
    use crate::statement::Query;

    fn lookup() -> PlanStep {
        let model = Model::new([Entity::new("Foo", 100).with_id("Id", 8).with_field("Bar", 10, Some(10))]).unwrap();
        let query = Query::builder(&model, "q", "Foo").select("Foo.Id").eq("Foo.Bar").build().unwrap();
        let index = Index::new(
            [model.field("Foo.Bar").unwrap().clone()],
            [model.field("Foo.Id").unwrap().clone()],
            Vec::new(),
            KeyPath::single(model.entity("Foo").unwrap()),
        )
        .unwrap();
        let state = QueryState::new(&query);
        let root = RootStep::new(state.clone());
        IndexLookupStep::apply(&root, None, &index, &state).unwrap()
    }

    #[test]
    fn test_request_and_entry_counts() {
        let step = lookup();
        assert_eq!(step_cost(&RequestCountCost::new(), &step), 1.0);
        assert_eq!(step_cost(&EntryCountCost::new(), &step), 10.0);
        assert_eq!(step_cost(&FieldSizeCost::new(), &step), 10.0 * 18.0);
    }

    #[test]
    fn test_column_family_cost() {
        let step = lookup();
        let model = ColumnFamilyCost::new();
        // One partition of 10 rows
        let expected = 0.5 + 0.1 + 10.0 * 0.01;
        assert!((step_cost(&model, &step) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_default_client_side_costs() {
        let mut mock = MockCostModel::new();
        mock.expect_sort_cost().returning(|_| DEFAULT_SORT_COST);
        mock.expect_index_lookup_cost().times(1).returning(|step| step.partitions * 2.0);

        let step = lookup();
        assert_eq!(step_cost(&mock, &step), 2.0);
        let root = RootStep::new(step.state().unwrap().clone());
        assert_eq!(step_cost(&mock, &root), 0.0);
    }

    #[test]
    fn test_mutation_costs() {
        let PlanStep::IndexLookup(lookup) = lookup() else {
            panic!("expected lookup");
        };
        let insert = MutationStep::insert(&lookup.index, 4.0);
        let delete = MutationStep::delete(&lookup.index, 4.0);
        assert_eq!(step_cost(&RequestCountCost::new(), &insert), 4.0);
        assert_eq!(step_cost(&FieldSizeCost::new(), &insert), 4.0 * 18.0);
        assert_eq!(step_cost(&FieldSizeCost::new(), &delete), 4.0 * 18.0);
        assert!((step_cost(&ColumnFamilyCost::new(), &delete) - 0.7).abs() < 1e-9);
    }
}
