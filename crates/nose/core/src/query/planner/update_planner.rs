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
use tracing::{debug, instrument, warn};

use super::cost_model::{CostModel, step_cost};
use super::plan_generator::{PlanError, QueryPlanner};
use super::steps::{MutationStep, PlanStep};
use super::tree::{Plan, QueryPlanTree};
use crate::model::{Index, Model};
use crate::statement::{Mutation, StatementError};

/// How one mutation keeps one index up to date: the support reads followed
/// by the writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlan {
    statement: String,
    index: Index,
    query_plans: Vec<Plan>,
    update_steps: Vec<PlanStep>,
}

impl UpdatePlan {
    pub fn new(statement: impl Into<String>, index: Index, query_plans: Vec<Plan>, update_steps: Vec<PlanStep>) -> Self {
        Self {
            statement: statement.into(),
            index,
            query_plans,
            update_steps,
        }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn query_plans(&self) -> &[Plan] {
        &self.query_plans
    }

    pub fn update_steps(&self) -> &[PlanStep] {
        &self.update_steps
    }

    /// Support reads and writes in execution order
    pub fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.query_plans.iter().flat_map(|plan| plan.steps()).chain(&self.update_steps)
    }

    pub fn update_cost(&self, cost_model: &dyn CostModel) -> f64 {
        self.update_steps.iter().map(|step| step_cost(cost_model, step)).sum()
    }

    pub fn cost(&self, cost_model: &dyn CostModel) -> f64 {
        self.query_plans.iter().map(|plan| plan.cost(cost_model)).sum::<f64>() + self.update_cost(cost_model)
    }
}

/// Plans support queries of mutations and appends their writes
pub struct UpdatePlanner<'a> {
    model: &'a Model,
    planner: QueryPlanner<'a>,
}

impl<'a> UpdatePlanner<'a> {
    pub fn new(model: &'a Model, indexes: impl IntoIterator<Item = &'a Index>) -> Self {
        Self {
            model,
            planner: QueryPlanner::new(indexes),
        }
    }

    /// Plan trees of every support query `mutation` needs for `index`
    pub fn support_trees(&self, mutation: &dyn Mutation, index: &Index) -> Result<Vec<QueryPlanTree>, PlanError> {
        mutation
            .support_queries(index, self.model)?
            .iter()
            .map(|query| self.planner.find_plans_for_query(query))
            .collect()
    }

    /// Delete then insert, as the mutation requires for `index`
    pub fn update_steps(mutation: &dyn Mutation, index: &Index, rows: f64) -> Vec<PlanStep> {
        let mut steps = Vec::with_capacity(2);
        if mutation.requires_delete(index) {
            steps.push(MutationStep::delete(index, rows));
        }
        if mutation.requires_insert(index) {
            steps.push(MutationStep::insert(index, rows));
        }
        steps
    }

    /// Rows written when there is nothing to read first
    pub fn affected_rows(&self, mutation: &dyn Mutation) -> Result<f64, PlanError> {
        Ok(mutation.affected_rows(self.model).map_err(StatementError::from)?)
    }

    /// Every way of applying `mutation` to each index it modifies. Indexes
    /// whose support queries cannot be planned are skipped.
    #[instrument(skip_all, fields(statement = %mutation.label()))]
    pub fn find_plans_for_update<'i>(&self, mutation: &dyn Mutation, indexes: impl IntoIterator<Item = &'i Index>) -> Result<Vec<UpdatePlan>, PlanError> {
        let fallback_rows = self.affected_rows(mutation)?;
        let mut plans = Vec::new();

        for index in indexes.into_iter().filter(|index| mutation.modifies_index(index)) {
            let trees = match self.support_trees(mutation, index) {
                Ok(trees) => trees,
                Err(PlanError::NoPlan { query, .. }) => {
                    warn!(index = %index.key(), support = %query, "Support query cannot be planned");
                    continue;
                }
                Err(error) => return Err(error),
            };

            for support in combinations(trees.iter().map(QueryPlanTree::plans).collect()) {
                let rows = support.last().map_or(fallback_rows, Plan::cardinality);
                let steps = Self::update_steps(mutation, index, rows);
                plans.push(UpdatePlan::new(mutation.label(), index.clone(), support, steps));
            }
        }

        debug!(plans = plans.len(), "Update plans found");
        Ok(plans)
    }
}

/// Cartesian product of the plan lists
fn combinations(lists: Vec<Vec<Plan>>) -> Vec<Vec<Plan>> {
    lists.into_iter().fold(vec![Vec::new()], |partial, plans| {
        partial
            .iter()
            .flat_map(|prefix| {
                plans.iter().map(move |plan| {
                    let mut combined = prefix.clone();
                    combined.push(plan.clone());
                    combined
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, Field, KeyPath, Relationship};
    use crate::query::planner::cost_model::RequestCountCost;
    use crate::query::planner::steps::StepKind;
    use crate::statement::{Delete, Insert, Operator, Update};

    fn model() -> Model {
        Model::new([
            Entity::new("User", 1000)
                .with_id("Id", 8)
                .with_field("City", 20, Some(50))
                .with_foreign_key("Tweets", "Tweet", Relationship::Many),
            Entity::new("Tweet", 20000)
                .with_id("Id", 8)
                .with_field("Body", 140, None)
                .with_foreign_key("User", "User", Relationship::One),
        ])
        .unwrap()
    }

    fn field(model: &Model, id: &str) -> Field {
        model.field(id).unwrap().clone()
    }

    fn tweets(model: &Model) -> Index {
        Index::new(
            [field(model, "Tweet.Id")],
            Vec::new(),
            [field(model, "Tweet.Body")],
            KeyPath::single(model.entity("Tweet").unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_only_plan() {
        let model = model();
        let index = tweets(&model);
        let insert = Insert::new(&model, "post", "Tweet", &["Id", "Body"], &[]).unwrap();

        let planner = UpdatePlanner::new(&model, [&index]);
        let plans = planner.find_plans_for_update(&insert, [&index]).unwrap();
        assert_eq!(plans.len(), 1);

        let plan = &plans[0];
        assert!(plan.query_plans().is_empty());
        let kinds: Vec<StepKind> = plan.update_steps().iter().map(PlanStep::kind).collect();
        assert_eq!(kinds, vec![StepKind::Insert]);
        assert_eq!(plan.cost(&RequestCountCost::new()), 1.0);
    }

    #[test]
    fn test_update_of_key_deletes_then_inserts() {
        let model = model();
        let by_city = Index::new(
            [field(&model, "User.City")],
            [field(&model, "User.Id")],
            Vec::new(),
            KeyPath::single(model.entity("User").unwrap()),
        )
        .unwrap();
        let users = Index::new(
            [field(&model, "User.Id")],
            Vec::new(),
            [field(&model, "User.City")],
            KeyPath::single(model.entity("User").unwrap()),
        )
        .unwrap();
        let update = Update::new(&model, "move", "User", &["City"], &[("Id", Operator::Eq)]).unwrap();

        let planner = UpdatePlanner::new(&model, [&by_city, &users]);
        let plans = planner.find_plans_for_update(&update, [&by_city]).unwrap();
        assert!(!plans.is_empty());
        for plan in &plans {
            let kinds: Vec<StepKind> = plan.update_steps().iter().map(PlanStep::kind).collect();
            assert_eq!(kinds, vec![StepKind::Delete, StepKind::Insert]);
            assert_eq!(plan.query_plans().len(), 1);
            assert_eq!(plan.steps().count(), plan.query_plans()[0].steps().len() + 2);
        }
    }

    #[test]
    fn test_unplannable_support_skipped() {
        let model = model();
        let by_city = Index::new(
            [field(&model, "User.City")],
            [field(&model, "User.Id")],
            Vec::new(),
            KeyPath::single(model.entity("User").unwrap()),
        )
        .unwrap();
        let delete = Delete::new(&model, "purge", "User", &[("Id", Operator::Eq)]).unwrap();

        // Nothing can read a user's city by identity
        let planner = UpdatePlanner::new(&model, [&by_city]);
        assert!(planner.find_plans_for_update(&delete, [&by_city]).unwrap().is_empty());
    }

    #[test]
    fn test_combinations() {
        let plan = |label: &str| Plan::new(label, Vec::new());
        let product = combinations(vec![vec![plan("a"), plan("b")], vec![plan("c"), plan("d"), plan("e")]]);
        assert_eq!(product.len(), 6);
        assert!(combinations(Vec::new()).iter().all(Vec::is_empty));
    }
}
