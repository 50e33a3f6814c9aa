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

//! Index Selection
//!
//! Plans every statement of a workload against the candidate indexes and
//! solves for the cheapest schema that fits the space budget.

pub mod problem;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{AdvisorConfig, ConfigError};
use crate::model::Index;
use crate::query::planner::{CostModel, Plan, PlanError, QueryPlanTree, QueryPlanner, UpdatePlan, UpdatePlanner, step_cost};
use crate::statement::{Mutation, Query, StatementError, Workload};

// Re-export commonly used types
pub use problem::{Problem, Selection};

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("No index selection satisfies the constraints")]
    NoSolution,
    #[error("Solver failure: {0}")]
    Solver(String),
    #[error(transparent)]
    NoPlan(#[from] PlanError),
    #[error(transparent)]
    Statement(#[from] StatementError),
}

/// Selected schema with the plan chosen for every statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub indexes: BTreeSet<Index>,
    pub query_plans: BTreeMap<String, Plan>,
    pub update_plans: Vec<UpdatePlan>,
    /// Weighted cost of every chosen plan
    pub total_cost: f64,
    pub total_size: u64,
    pub cost_model: String,
}

impl SearchResult {
    pub fn plan(&self, label: &str) -> Option<&Plan> {
        self.query_plans.get(label)
    }

    pub fn update_plans_for<'s>(&'s self, label: &'s str) -> impl Iterator<Item = &'s UpdatePlan> + 's {
        self.update_plans.iter().filter(move |plan| plan.statement() == label)
    }
}

/// How one mutation maintains one candidate index inside the program
struct MaintenanceTerm<'w> {
    mutation: &'w dyn Mutation,
    weight: f64,
    index: usize,
    trees: Vec<usize>,
}

pub struct Search<'w> {
    workload: &'w Workload,
    cost_model: Box<dyn CostModel>,
    config: AdvisorConfig,
}

impl<'w> Search<'w> {
    pub fn new(workload: &'w Workload, config: &AdvisorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            workload,
            cost_model: config.cost_model.build(),
            config: config.clone(),
        })
    }

    pub fn with_cost_model(mut self, cost_model: Box<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn cost_model(&self) -> &dyn CostModel {
        self.cost_model.as_ref()
    }

    /// Picks the indexes and plans of least weighted cost among `indexes`
    #[instrument(skip_all, fields(candidates = indexes.len(), cost_model = self.cost_model.name()))]
    pub fn search(&self, indexes: &BTreeSet<Index>) -> Result<SearchResult, SearchError> {
        let candidates: Vec<Index> = indexes.iter().cloned().collect();
        let model = self.workload.model();
        let planner = QueryPlanner::new(&candidates);
        let update_planner = UpdatePlanner::new(model, &candidates);
        let mut problem = Problem::new(&candidates, self.cost_model.as_ref(), self.config.max_space);

        let mut query_trees = Vec::new();
        for (tree, weight) in self.query_trees(&planner)? {
            let label = tree.query().label().to_string();
            let id = problem.add_tree(tree, weight, None, &BTreeMap::new())?;
            query_trees.push((label, weight, id));
        }

        let mut maintenance = Vec::new();
        let mut unmaintainable = BTreeMap::new();
        for (mutation, weight) in self.workload.mutations() {
            for (position, index) in candidates.iter().enumerate().filter(|(_, index)| mutation.modifies_index(index)) {
                let trees = match update_planner.support_trees(mutation, index) {
                    Ok(trees) => trees,
                    Err(error @ PlanError::NoPlan { .. }) => {
                        warn!(index = %index.key(), statement = %mutation.label(), %error, "Index cannot be maintained");
                        problem.exclude(position);
                        unmaintainable.entry(position).or_insert(error);
                        continue;
                    }
                    Err(error) => return Err(error.into()),
                };

                let mut ids = Vec::with_capacity(trees.len());
                if trees.is_empty() {
                    let rows = update_planner.affected_rows(mutation)?;
                    problem.add_fixed_cost(position, weight * self.write_cost(mutation, index, rows));
                }
                let last = trees.len().saturating_sub(1);
                for (part, tree) in trees.into_iter().enumerate() {
                    let leaf_costs = if part == last { self.leaf_write_costs(mutation, index, &tree) } else { BTreeMap::new() };
                    ids.push(problem.add_tree(tree, weight, Some(position), &leaf_costs)?);
                }
                maintenance.push(MaintenanceTerm {
                    mutation,
                    weight,
                    index: position,
                    trees: ids,
                });
            }
        }
        debug!(queries = query_trees.len(), maintenance = maintenance.len(), "Statements planned");

        let selection = match problem.solve(self.config.minimize_index_count) {
            Err(SearchError::NoSolution) => return Err(Self::unplannable(&problem, &query_trees, &unmaintainable).unwrap_or(SearchError::NoSolution)),
            other => other?,
        };

        let mut result = self.empty_result(selection.indexes().iter().map(|position| candidates[*position].clone()));
        for (label, weight, id) in query_trees {
            let plan = problem.plan(id, &selection).ok_or_else(|| SearchError::Solver(format!("no plan selected for {label}")))?;
            result.total_cost += weight * plan.cost(self.cost_model());
            result.query_plans.insert(label, plan);
        }
        for term in maintenance.into_iter().filter(|term| selection.is_selected(term.index)) {
            let index = &candidates[term.index];
            let support = term
                .trees
                .iter()
                .map(|id| problem.plan(*id, &selection).ok_or_else(|| SearchError::Solver(format!("no support plan selected for {}", term.mutation.label()))))
                .collect::<Result<Vec<_>, _>>()?;
            let plan = self.update_plan(&update_planner, term.mutation, index, support)?;
            result.total_cost += term.weight * plan.cost(self.cost_model());
            result.update_plans.push(plan);
        }

        info!(
            indexes = result.indexes.len(),
            total_cost = result.total_cost,
            total_size = result.total_size,
            "Search complete"
        );
        Ok(result)
    }

    /// Costs a fixed schema without the solver: every statement takes its
    /// cheapest plan over `indexes`
    #[instrument(skip_all, fields(indexes = indexes.len()))]
    pub fn evaluate_schema(&self, indexes: &BTreeSet<Index>) -> Result<SearchResult, SearchError> {
        let model = self.workload.model();
        let planner = QueryPlanner::new(indexes);
        let update_planner = UpdatePlanner::new(model, indexes);
        let mut result = self.empty_result(indexes.iter().cloned());

        for (query, weight) in self.workload.queries() {
            let plan = planner.min_plan(query, self.cost_model())?;
            result.total_cost += weight * plan.cost(self.cost_model());
            result.query_plans.insert(query.label().to_string(), plan);
        }

        for (mutation, weight) in self.workload.mutations() {
            for index in indexes.iter().filter(|index| mutation.modifies_index(index)) {
                let support = update_planner
                    .support_trees(mutation, index)?
                    .iter()
                    .map(|tree| {
                        tree.min_cost_plan(self.cost_model()).ok_or_else(|| PlanError::NoPlan {
                            query: tree.query().label().to_string(),
                            tree: Box::new(tree.clone()),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let plan = self.update_plan(&update_planner, mutation, index, support)?;
                result.total_cost += weight * plan.cost(self.cost_model());
                result.update_plans.push(plan);
            }
        }

        debug!(total_cost = result.total_cost, "Schema evaluated");
        Ok(result)
    }

    /// The planning failure behind an infeasible program: a query whose
    /// every plan reads an index that cannot be maintained
    fn unplannable(problem: &Problem<'_>, query_trees: &[(String, f64, usize)], unmaintainable: &BTreeMap<usize, PlanError>) -> Option<SearchError> {
        query_trees.iter().find_map(|(_, _, id)| {
            let blocked: Vec<usize> = problem
                .tree(*id)
                .plans()
                .iter()
                .map(|plan| plan.indexes().into_iter().filter_map(|index| problem.position(index)).find(|position| unmaintainable.contains_key(position)))
                .collect::<Option<Vec<usize>>>()?;
            blocked.first().map(|position| SearchError::NoPlan(unmaintainable[position].clone()))
        })
    }

    fn query_trees(&self, planner: &QueryPlanner<'_>) -> Result<Vec<(QueryPlanTree, f64)>, PlanError> {
        let queries: Vec<(&Query, f64)> = self.workload.queries().collect();
        let plan = |(query, weight): &(&Query, f64)| planner.find_plans_for_query(query).map(|tree| (tree, *weight));
        if self.config.parallel {
            queries.par_iter().map(plan).collect()
        } else {
            queries.iter().map(plan).collect()
        }
    }

    fn write_cost(&self, mutation: &dyn Mutation, index: &Index, rows: f64) -> f64 {
        UpdatePlanner::update_steps(mutation, index, rows)
            .iter()
            .map(|step| step_cost(self.cost_model(), step))
            .sum()
    }

    /// Write cost at each leaf, sized by the rows that leaf's plan yields
    fn leaf_write_costs(&self, mutation: &dyn Mutation, index: &Index, tree: &QueryPlanTree) -> BTreeMap<usize, f64> {
        tree.leaves()
            .map(|leaf| (leaf, self.write_cost(mutation, index, tree.node(leaf).step.cardinality())))
            .collect()
    }

    fn update_plan(&self, update_planner: &UpdatePlanner<'_>, mutation: &dyn Mutation, index: &Index, support: Vec<Plan>) -> Result<UpdatePlan, PlanError> {
        let rows = match support.last() {
            Some(plan) => plan.cardinality(),
            None => update_planner.affected_rows(mutation)?,
        };
        let steps = UpdatePlanner::update_steps(mutation, index, rows);
        Ok(UpdatePlan::new(mutation.label(), index.clone(), support, steps))
    }

    fn empty_result(&self, indexes: impl IntoIterator<Item = Index>) -> SearchResult {
        let indexes: BTreeSet<Index> = indexes.into_iter().collect();
        SearchResult {
            total_size: indexes.iter().map(Index::size).sum(),
            indexes,
            query_plans: BTreeMap::new(),
            update_plans: Vec::new(),
            total_cost: 0.0,
            cost_model: self.cost_model.name().to_string(),
        }
    }
}
