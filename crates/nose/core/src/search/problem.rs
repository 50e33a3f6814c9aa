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

//! Binary integer program selecting indexes and plans.
//!
//! Every non-root node of a plan tree is a binary variable. The children of
//! a query's root sum to one, those of a support query's root sum to the
//! variable of the index it maintains, and every internal node's children
//! sum to the node itself, so a feasible assignment picks exactly one
//! root-to-leaf path per selected tree. Lookup nodes require `y`, the use of
//! their index by the tree, which in turn requires `x`, the index selection.

use good_lp::{Constraint, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable, constraint, microlp, variable};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::SearchError;
use crate::model::Index;
use crate::query::planner::{CostModel, Plan, QueryPlanTree, step_cost};

/// Slack allowed on the pinned cost during the index count pass
const COST_TOLERANCE: f64 = 1e-6;

struct TreeTerm {
    tree: QueryPlanTree,
    /// Position of the index this support tree maintains
    support_of: Option<usize>,
    /// Weighted cost charged when each node is chosen
    node_costs: Vec<f64>,
}

/// The result of solving: chosen indexes and the chosen leaf of each tree
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    indexes: BTreeSet<usize>,
    leaves: Vec<Option<usize>>,
    objective: f64,
}

impl Selection {
    pub fn indexes(&self) -> &BTreeSet<usize> {
        &self.indexes
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.indexes.contains(&index)
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }
}

struct Formulation {
    x: Vec<Variable>,
    nodes: Vec<Vec<Option<Variable>>>,
    /// Linear objective as (variable, coefficient) terms
    objective: Vec<(Variable, f64)>,
    constraints: Vec<Constraint>,
}

impl Formulation {
    fn objective_expression(&self) -> Expression {
        self.objective.iter().map(|(var, coefficient)| *coefficient * *var).sum()
    }

    fn count_expression(&self) -> Expression {
        self.x.iter().copied().map(Expression::from).sum()
    }
}

pub struct Problem<'a> {
    indexes: &'a [Index],
    positions: BTreeMap<&'a Index, usize>,
    cost_model: &'a dyn CostModel,
    max_space: Option<u64>,
    trees: Vec<TreeTerm>,
    fixed_costs: Vec<(usize, f64)>,
    excluded: BTreeSet<usize>,
}

impl<'a> Problem<'a> {
    pub fn new(indexes: &'a [Index], cost_model: &'a dyn CostModel, max_space: Option<u64>) -> Self {
        let positions = indexes.iter().enumerate().map(|(position, index)| (index, position)).collect();
        Self {
            indexes,
            positions,
            cost_model,
            max_space,
            trees: Vec::new(),
            fixed_costs: Vec::new(),
            excluded: BTreeSet::new(),
        }
    }

    pub fn position(&self, index: &Index) -> Option<usize> {
        self.positions.get(index).copied()
    }

    /// Adds a statement's plan tree. `leaf_costs` charges extra unweighted
    /// cost at chosen leaves, which carries the writes of a mutation whose
    /// row count depends on the support plan.
    pub fn add_tree(&mut self, tree: QueryPlanTree, weight: f64, support_of: Option<usize>, leaf_costs: &BTreeMap<usize, f64>) -> Result<usize, SearchError> {
        for node in tree.nodes() {
            if let Some(lookup) = node.step.as_lookup() {
                if !self.positions.contains_key(&lookup.index) {
                    return Err(SearchError::Solver(format!("plan reads unknown index {}", lookup.index.key())));
                }
            }
        }

        let node_costs = tree
            .nodes()
            .iter()
            .enumerate()
            .map(|(id, node)| weight * (step_cost(self.cost_model, &node.step) + leaf_costs.get(&id).copied().unwrap_or(0.0)))
            .collect::<Vec<f64>>();
        // A trivial tree has no variables, so its cost follows the index
        if let (true, Some(index)) = (tree.is_trivial(), support_of) {
            if node_costs[0] != 0.0 {
                self.add_fixed_cost(index, node_costs[0]);
            }
        }
        self.trees.push(TreeTerm { tree, support_of, node_costs });
        Ok(self.trees.len() - 1)
    }

    /// Cost paid whenever `index` is selected
    pub fn add_fixed_cost(&mut self, index: usize, cost: f64) {
        self.fixed_costs.push((index, cost));
    }

    /// Forbids selecting `index`
    pub fn exclude(&mut self, index: usize) {
        self.excluded.insert(index);
    }

    pub fn tree(&self, id: usize) -> &QueryPlanTree {
        &self.trees[id].tree
    }

    /// The plan of tree `id` under `selection`, if the tree is active
    pub fn plan(&self, id: usize, selection: &Selection) -> Option<Plan> {
        let tree = &self.trees[id].tree;
        selection.leaves[id].map(|leaf| Plan::new(tree.query().label(), tree.steps_to(leaf)))
    }

    fn formulate(&self) -> (ProblemVariables, Formulation) {
        let mut vars = ProblemVariables::new();
        let x: Vec<Variable> = self.indexes.iter().map(|_| vars.add(variable().binary())).collect();
        let mut objective = Vec::new();
        let mut constraints = Vec::new();
        let mut nodes = Vec::with_capacity(self.trees.len());

        for term in &self.trees {
            let tree = &term.tree;
            let node_vars: Vec<Option<Variable>> = (0..tree.len()).map(|id| (id != 0).then(|| vars.add(variable().binary()))).collect();
            let mut uses: BTreeMap<usize, Variable> = BTreeMap::new();

            for (id, node) in tree.nodes().iter().enumerate() {
                if node.children.is_empty() {
                    continue;
                }
                let children: Expression = node.children.iter().filter_map(|child| node_vars[*child]).map(Expression::from).sum();
                let total: Expression = match (node_vars[id], term.support_of) {
                    (Some(var), _) => var.into(),
                    (None, Some(index)) => x[index].into(),
                    (None, None) => Expression::from(1.0),
                };
                constraints.push(constraint::eq(children, total));
            }

            for (id, node) in tree.nodes().iter().enumerate() {
                let Some(var) = node_vars[id] else {
                    continue;
                };
                if term.node_costs[id] != 0.0 {
                    objective.push((var, term.node_costs[id]));
                }
                let Some(index) = node.step.as_lookup().and_then(|lookup| self.positions.get(&lookup.index)) else {
                    continue;
                };
                let used = *uses.entry(*index).or_insert_with(|| {
                    let used = vars.add(variable().binary());
                    constraints.push(constraint::leq(Expression::from(used), Expression::from(x[*index])));
                    used
                });
                constraints.push(constraint::leq(Expression::from(var), Expression::from(used)));
            }
            nodes.push(node_vars);
        }

        for (index, cost) in &self.fixed_costs {
            objective.push((x[*index], *cost));
        }
        for index in &self.excluded {
            constraints.push(constraint::eq(Expression::from(x[*index]), Expression::from(0.0)));
        }
        if let Some(max_space) = self.max_space {
            let space: Expression = self.indexes.iter().zip(&x).map(|(index, var)| index.size() as f64 * *var).sum();
            constraints.push(constraint::leq(space, Expression::from(max_space as f64)));
        }

        (
            vars,
            Formulation {
                x,
                nodes,
                objective,
                constraints,
            },
        )
    }

    /// Solves for minimum weighted cost, then optionally pins that cost and
    /// minimizes the number of selected indexes
    pub fn solve(&self, minimize_index_count: bool) -> Result<Selection, SearchError> {
        let (vars, formulation) = self.formulate();
        debug!(
            indexes = formulation.x.len(),
            trees = formulation.nodes.len(),
            constraints = formulation.constraints.len(),
            "Integer program formulated"
        );

        let model = vars.minimise(formulation.objective_expression()).using(microlp);
        let solution = formulation.constraints.into_iter().fold(model, |model, constraint| model.with(constraint)).solve()?;
        let optimal = evaluate(&solution, &formulation.objective);
        info!(objective = optimal, "Minimum cost found");

        if !minimize_index_count {
            return Ok(self.selection(&solution, &formulation.x, &formulation.nodes, optimal));
        }

        let (vars, formulation) = self.formulate();
        let bound = optimal * (1.0 + COST_TOLERANCE) + COST_TOLERANCE;
        let pinned = constraint::leq(formulation.objective_expression(), Expression::from(bound));
        let model = vars.minimise(formulation.count_expression()).using(microlp).with(pinned);
        let solution = formulation.constraints.into_iter().fold(model, |model, constraint| model.with(constraint)).solve()?;
        let objective = evaluate(&solution, &formulation.objective);
        let selection = self.selection(&solution, &formulation.x, &formulation.nodes, objective);
        info!(objective, indexes = selection.indexes.len(), "Index count minimized");
        Ok(selection)
    }

    fn selection(&self, solution: &impl Solution, x: &[Variable], nodes: &[Vec<Option<Variable>>], objective: f64) -> Selection {
        let chosen = |var: Variable| solution.value(var) > 0.5;
        let indexes = x.iter().enumerate().filter(|(_, var)| chosen(**var)).map(|(position, _)| position).collect();

        let leaves = self
            .trees
            .iter()
            .zip(nodes)
            .map(|(term, node_vars)| {
                let mut current = 0;
                loop {
                    let node = term.tree.node(current);
                    if node.children.is_empty() {
                        return (current != 0 || term.tree.is_trivial()).then_some(current);
                    }
                    match node.children.iter().find(|child| node_vars[**child].is_some_and(chosen)) {
                        Some(child) => current = *child,
                        None => return None,
                    }
                }
            })
            .collect();

        Selection { indexes, leaves, objective }
    }
}

fn evaluate(solution: &impl Solution, objective: &[(Variable, f64)]) -> f64 {
    objective.iter().map(|(var, coefficient)| coefficient * solution.value(*var)).sum()
}

impl From<ResolutionError> for SearchError {
    fn from(error: ResolutionError) -> Self {
        match error {
            ResolutionError::Infeasible => SearchError::NoSolution,
            other => SearchError::Solver(other.to_string()),
        }
    }
}
