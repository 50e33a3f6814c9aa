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

//! # Statements
//!
//! Structured reads and writes over the conceptual model, and the weighted
//! workload they form. Statements arrive already parsed; this module only
//! validates them against the model.

pub mod mutation;
pub mod query;
pub mod workload;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{IndexError, ModelError};

pub use mutation::{Delete, Insert, Mutation, Update};
pub use query::{Condition, Operator, Query, QueryBuilder};
pub use workload::{WeightedStatement, Workload};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatementError {
    #[error("Statement {0} selects no fields")]
    EmptySelect(String),
    #[error("Statement {label}: field {field} is not on the statement path")]
    FieldOffPath { label: String, field: String },
    #[error("Statement {0} has more than one range predicate")]
    MultipleRanges(String),
    #[error("Statement {0} has a zero limit")]
    ZeroLimit(String),
    #[error("Duplicate statement label: {0}")]
    DuplicateLabel(String),
    #[error("Statement {label}: {reason}")]
    Invalid { label: String, reason: String },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Statement {
    Query(Query),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn label(&self) -> &str {
        match self {
            Statement::Query(query) => query.label(),
            Statement::Insert(insert) => insert.label(),
            Statement::Update(update) => update.label(),
            Statement::Delete(delete) => delete.label(),
        }
    }

    pub fn as_query(&self) -> Option<&Query> {
        match self {
            Statement::Query(query) => Some(query),
            _ => None,
        }
    }

    pub fn as_mutation(&self) -> Option<&dyn Mutation> {
        match self {
            Statement::Query(_) => None,
            Statement::Insert(insert) => Some(insert),
            Statement::Update(update) => Some(update),
            Statement::Delete(delete) => Some(delete),
        }
    }
}

impl From<Query> for Statement {
    fn from(query: Query) -> Self {
        Statement::Query(query)
    }
}

impl From<Insert> for Statement {
    fn from(insert: Insert) -> Self {
        Statement::Insert(insert)
    }
}

impl From<Update> for Statement {
    fn from(update: Update) -> Self {
        Statement::Update(update)
    }
}

impl From<Delete> for Statement {
    fn from(delete: Delete) -> Self {
        Statement::Delete(delete)
    }
}
