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

use crate::config::ConfigError;
use crate::model::{IndexError, ModelError};
use crate::query::planner::PlanError;
use crate::search::SearchError;
use crate::statement::StatementError;

/// Any failure of the advisor pipeline
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Statement error: {0}")]
    Statement(#[from] StatementError),
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),
    #[error("Search error: {0}")]
    Search(#[from] SearchError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, AdvisorError>;
