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

use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::cost_model::CostModel;
use super::steps::{FilterStep, IndexLookupStep, LimitStep, PlanStep, SortStep};
use super::tree::{Plan, QueryPlanTree};
use crate::model::Index;
use crate::statement::{Query, StatementError};

#[derive(Debug, Clone, Error)]
pub enum PlanError {
    #[error("No plan found for query {query}")]
    NoPlan { query: String, tree: Box<QueryPlanTree> },
    #[error(transparent)]
    Statement(#[from] StatementError),
}

/// Depth-first search over plan steps for one query at a time.
///
/// Non-indexed steps take precedence: when a filter, sort or limit applies
/// at a node, no lookup is tried there. Each plan uses an index at most once.
pub struct QueryPlanner<'a> {
    indexes: Vec<&'a Index>,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(indexes: impl IntoIterator<Item = &'a Index>) -> Self {
        let mut indexes: Vec<&'a Index> = indexes.into_iter().collect();
        indexes.sort();
        indexes.dedup();
        Self { indexes }
    }

    pub fn indexes(&self) -> &[&'a Index] {
        &self.indexes
    }

    /// Builds the tree of every plan answering `query`
    #[instrument(skip_all, fields(query = %query.label()))]
    pub fn find_plans_for_query(&self, query: &Query) -> Result<QueryPlanTree, PlanError> {
        let tree = self.build_tree(query, true);

        if tree.is_empty() {
            let diagnostic = self.build_tree(query, false);
            warn!(nodes = diagnostic.len(), "No plan found for query");
            return Err(PlanError::NoPlan {
                query: query.label().to_string(),
                tree: Box::new(diagnostic),
            });
        }

        for leaf in tree.leaves() {
            let answered = tree.node(leaf).step.state().is_some_and(|state| state.answered(true));
            assert!(answered, "plan for {} ends in an unanswered state", query.label());
        }

        debug!(plans = tree.leaves().count(), nodes = tree.len(), "Plans found for query");
        Ok(tree)
    }

    /// Cheapest plan for `query` under `cost_model`
    pub fn min_plan(&self, query: &Query, cost_model: &dyn CostModel) -> Result<Plan, PlanError> {
        let tree = self.find_plans_for_query(query)?;
        tree.min_cost_plan(cost_model).ok_or_else(|| PlanError::NoPlan {
            query: query.label().to_string(),
            tree: Box::new(tree.clone()),
        })
    }

    fn build_tree(&self, query: &Query, prune: bool) -> QueryPlanTree {
        let mut tree = QueryPlanTree::new(query);
        let mut used = Vec::new();
        self.expand(&mut tree, 0, &mut used, prune);
        tree
    }

    /// Adds the children of `node` and returns whether any plan passes
    /// through it
    fn expand(&self, tree: &mut QueryPlanTree, node: usize, used: &mut Vec<&'a Index>, prune: bool) -> bool {
        let step = tree.node(node).step.clone();
        let Some(state) = step.state() else {
            return false;
        };
        if state.answered(true) {
            return true;
        }

        let mut candidates: Vec<(PlanStep, Option<&'a Index>)> = [FilterStep::apply(&step, state), SortStep::apply(&step, state), LimitStep::apply(&step, state)]
            .into_iter()
            .flatten()
            .map(|child| (child, None))
            .collect();

        if candidates.is_empty() {
            let previous = tree.previous_lookup(node).cloned();
            let head = state.path().first().entity();
            for index in &self.indexes {
                if used.contains(index) || index.path().first().entity() != head {
                    continue;
                }
                if let Some(child) = IndexLookupStep::apply(&step, previous.as_ref(), index, state) {
                    candidates.push((child, Some(*index)));
                }
            }
        }

        let mut viable = false;
        for (child, index) in candidates {
            let id = tree.push(node, child);
            if let Some(index) = index {
                used.push(index);
            }
            let reachable = self.expand(tree, id, used, prune);
            if index.is_some() {
                used.pop();
            }

            if reachable {
                viable = true;
            } else if prune {
                tree.remove_last(id);
            }
        }
        viable
    }
}
