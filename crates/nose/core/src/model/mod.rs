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

//! # Data Model
//!
//! Conceptual schema (entities, fields, foreign keys) and the physical
//! materialized-view indexes laid out over it.
//!
//! All types here are immutable once constructed and cheap to share between
//! planning threads.

pub mod entity;
pub mod index;
pub mod path;

use thiserror::Error;

pub use entity::{DEFAULT_ID_SIZE, Entity, Field, FieldKind, Model, Relationship};
pub use index::{Index, IndexDefinition, IndexError, RANGE_SCAN_FRACTION};
pub use path::{KeyPath, PathHop};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Entity {0} has no identity field")]
    MissingIdentity(String),
    #[error("Foreign key {key} references unknown entity {target}")]
    DanglingForeignKey { key: String, target: String },
    #[error("Invalid key path: {0}")]
    InvalidPath(String),
    #[error("No reverse key for {0}")]
    NoReverseKey(String),
}
