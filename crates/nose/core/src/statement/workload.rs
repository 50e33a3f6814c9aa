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

use super::{Mutation, Query, Statement, StatementError};
use crate::model::Model;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedStatement {
    pub statement: Statement,
    pub weight: f64,
}

/// A model together with uniquely labelled, weighted statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    model: Model,
    statements: Vec<WeightedStatement>,
}

impl Workload {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            statements: Vec::new(),
        }
    }

    pub fn add_statement(&mut self, statement: impl Into<Statement>, weight: f64) -> Result<(), StatementError> {
        let statement = statement.into();
        if self.statement(statement.label()).is_some() {
            return Err(StatementError::DuplicateLabel(statement.label().to_string()));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(StatementError::Invalid {
                label: statement.label().to_string(),
                reason: format!("weight {weight} must be a finite non-negative number"),
            });
        }

        tracing::debug!(label = %statement.label(), weight, "Statement added to workload");
        self.statements.push(WeightedStatement { statement, weight });
        Ok(())
    }

    pub fn with_statement(mut self, statement: impl Into<Statement>, weight: f64) -> Result<Self, StatementError> {
        self.add_statement(statement, weight)?;
        Ok(self)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn statements(&self) -> &[WeightedStatement] {
        &self.statements
    }

    pub fn statement(&self, label: &str) -> Option<&Statement> {
        self.statements.iter().map(|weighted| &weighted.statement).find(|statement| statement.label() == label)
    }

    pub fn weight(&self, label: &str) -> Option<f64> {
        self.statements.iter().find(|weighted| weighted.statement.label() == label).map(|weighted| weighted.weight)
    }

    pub fn queries(&self) -> impl Iterator<Item = (&Query, f64)> {
        self.statements
            .iter()
            .filter_map(|weighted| weighted.statement.as_query().map(|query| (query, weighted.weight)))
    }

    pub fn mutations(&self) -> impl Iterator<Item = (&dyn Mutation, f64)> {
        self.statements
            .iter()
            .filter_map(|weighted| weighted.statement.as_mutation().map(|mutation| (mutation, weighted.weight)))
    }
}
