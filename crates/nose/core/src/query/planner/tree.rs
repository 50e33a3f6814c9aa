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
use std::collections::BTreeSet;
use std::fmt;

use super::cost_model::{CostModel, step_cost};
use super::state::QueryState;
use super::steps::{IndexLookupStep, PlanStep, RootStep};
use crate::model::Index;
use crate::statement::Query;

/// One complete execution plan: the steps from the root to a leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    query: String,
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(query: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self { query: query.into(), steps }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn last_step(&self) -> Option<&PlanStep> {
        self.steps.last()
    }

    /// Indexes read by the plan, in lookup order
    pub fn indexes(&self) -> Vec<&Index> {
        self.steps.iter().filter_map(PlanStep::as_lookup).map(|step| &step.index).collect()
    }

    /// Estimated rows produced by the final step
    pub fn cardinality(&self) -> f64 {
        self.steps.last().map_or(1.0, PlanStep::cardinality)
    }

    pub fn cost(&self, cost_model: &dyn CostModel) -> f64 {
        self.steps.iter().map(|step| step_cost(cost_model, step)).sum()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self.steps.iter().map(PlanStep::to_string).collect();
        write!(f, "{}: {}", self.query, steps.join(" -> "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub step: PlanStep,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Every plan found for a query, as a tree of steps stored in an arena.
///
/// Node 0 is the root. Nodes are pushed in depth-first order, so the subtree
/// of the most recently added child always occupies the tail of the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlanTree {
    query: Query,
    nodes: Vec<PlanNode>,
}

impl QueryPlanTree {
    pub fn new(query: &Query) -> Self {
        let root = PlanNode {
            step: RootStep::new(QueryState::new(query)),
            parent: None,
            children: Vec::new(),
        };
        Self {
            query: query.clone(),
            nodes: vec![root],
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn root(&self) -> &PlanNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: usize) -> &PlanNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds no plan at all
    pub fn is_empty(&self) -> bool {
        self.nodes[0].children.is_empty() && !self.is_trivial()
    }

    /// Whether the query is answered before any step, leaving one empty plan
    pub fn is_trivial(&self) -> bool {
        self.nodes.len() == 1 && self.nodes[0].step.state().is_some_and(|state| state.answered(true))
    }

    pub(crate) fn push(&mut self, parent: usize, step: PlanStep) -> usize {
        let id = self.nodes.len();
        self.nodes.push(PlanNode {
            step,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Drops the most recently added child and its subtree
    pub(crate) fn remove_last(&mut self, id: usize) {
        if let Some(parent) = self.nodes[id].parent {
            let removed = self.nodes[parent].children.pop();
            debug_assert_eq!(removed, Some(id));
        }
        self.nodes.truncate(id);
    }

    /// Nodes ending a plan; the root alone when the tree is trivial
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        let first = if self.is_trivial() { 0 } else { 1 };
        (first..self.nodes.len()).filter(|id| self.nodes[*id].children.is_empty())
    }

    /// Steps from the root (excluded) down to `id`
    pub fn steps_to(&self, id: usize) -> Vec<PlanStep> {
        let mut steps = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current.filter(|node| *node != 0) {
            steps.push(self.nodes[node].step.clone());
            current = self.nodes[node].parent;
        }
        steps.reverse();
        steps
    }

    /// Nearest index lookup at or above `id`
    pub fn previous_lookup(&self, id: usize) -> Option<&IndexLookupStep> {
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(lookup) = self.nodes[node].step.as_lookup() {
                return Some(lookup);
            }
            current = self.nodes[node].parent;
        }
        None
    }

    pub fn plans(&self) -> Vec<Plan> {
        self.leaves().map(|leaf| Plan::new(self.query.label(), self.steps_to(leaf))).collect()
    }

    /// Every index some plan of this tree reads
    pub fn indexes(&self) -> BTreeSet<&Index> {
        self.nodes.iter().filter_map(|node| node.step.as_lookup()).map(|step| &step.index).collect()
    }

    pub fn min_cost_plan(&self, cost_model: &dyn CostModel) -> Option<Plan> {
        self.plans()
            .into_iter()
            .map(|plan| (plan.cost(cost_model), plan))
            .min_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, plan)| plan)
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, id: usize, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.nodes[id].step, indent = depth * 2)?;
        for child in &self.nodes[id].children {
            self.fmt_node(f, *child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for QueryPlanTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.query)?;
        self.fmt_node(f, 0, 1)
    }
}
