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

//! Write statements and the support queries they need.
//!
//! Mutating an index means writing whole entries of a denormalized view, so
//! anything the statement does not supply itself has to be read first. Those
//! reads are expressed as ordinary queries oriented from the mutated entity
//! along the index path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{Condition, Operator, Query, StatementError};
use crate::model::{Entity, Field, Index, KeyPath, Model, ModelError};
use crate::statistics;

/// Behaviour shared by inserts, updates and deletes
pub trait Mutation {
    fn label(&self) -> &str;

    /// Entity whose rows are written
    fn entity(&self) -> &str;

    fn modifies_index(&self, index: &Index) -> bool;

    fn requires_insert(&self, index: &Index) -> bool;

    fn requires_delete(&self, index: &Index) -> bool;

    /// Fields whose values the statement itself supplies
    fn given_fields(&self) -> BTreeSet<Field>;

    /// Estimated number of entity rows written
    fn affected_rows(&self, model: &Model) -> Result<f64, ModelError>;

    /// Reads needed before `index` can be brought up to date
    fn support_queries(&self, index: &Index, model: &Model) -> Result<Vec<Query>, StatementError>;
}

/// Splits an index path at `entity` into walks that start at `entity`
fn support_paths(entity: &str, index: &Index, model: &Model) -> Result<Vec<KeyPath>, ModelError> {
    let path = index.path();
    let Some(position) = path.position(entity) else {
        return Ok(Vec::new());
    };
    if path.len() == 1 {
        return Ok(vec![path.clone()]);
    }

    let mut parts = Vec::with_capacity(2);
    if position > 0 {
        parts.push(path.sub_path(0, position).reverse(model)?);
    }
    if position + 1 < path.len() {
        parts.push(path.sub_path(position, path.len() - 1));
    }
    Ok(parts)
}

fn support_label(label: &str, index: &Index, part: usize) -> String {
    format!("{label}[{}]#{part}", index.key())
}

fn resolve_fields(entity: &Entity, names: &[&str]) -> Result<BTreeSet<Field>, StatementError> {
    names.iter().map(|name| Ok(entity.field(name)?.clone())).collect()
}

fn resolve_conditions(label: &str, entity: &Entity, conditions: &[(&str, Operator)]) -> Result<BTreeSet<Condition>, StatementError> {
    let resolved: BTreeSet<Condition> = conditions
        .iter()
        .map(|(name, operator)| Ok(Condition::new(entity.field(name)?.clone(), *operator)))
        .collect::<Result<_, StatementError>>()?;
    if resolved.iter().filter(|condition| condition.is_range()).count() > 1 {
        return Err(StatementError::MultipleRanges(label.to_string()));
    }
    Ok(resolved)
}

fn condition_rows(model: &Model, entity: &str, conditions: &BTreeSet<Condition>) -> Result<f64, ModelError> {
    let count = model.entity(entity)?.count() as f64;
    let eq = conditions.iter().filter(|condition| !condition.is_range()).map(|condition| &condition.field);
    Ok(statistics::filter(count, eq, conditions.iter().any(Condition::is_range)))
}

/// Support queries driven by the statement's own conditions on the mutated
/// entity. The mutated entity's fields are fetched by the first walk only,
/// and fields bound by equality are never fetched.
fn conditional_support(
    label: &str,
    entity: &str,
    conditions: &BTreeSet<Condition>,
    needed: &BTreeSet<Field>,
    index: &Index,
    model: &Model,
) -> Result<Vec<Query>, StatementError> {
    let bound: BTreeSet<&Field> = conditions.iter().filter(|condition| !condition.is_range()).map(|condition| &condition.field).collect();
    let mut queries = Vec::new();
    for (part, path) in support_paths(entity, index, model)?.into_iter().enumerate() {
        let select: Vec<Field> = needed
            .iter()
            .filter(|field| !bound.contains(field) && path.contains_entity(field.parent()) && (part == 0 || field.parent() != entity))
            .cloned()
            .collect();
        if select.is_empty() {
            continue;
        }
        queries.push(Query::new(support_label(label, index, part), entity, path, select, conditions.iter().cloned())?);
    }
    Ok(queries)
}

fn keys(index: &Index) -> BTreeSet<Field> {
    index.hash_fields().iter().chain(index.order_fields()).cloned().collect()
}

/// Inserts one row, optionally connecting it to existing rows through
/// foreign keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Insert {
    label: String,
    entity: String,
    settings: BTreeSet<Field>,
    connections: BTreeSet<Field>,
}

impl Insert {
    pub fn new(model: &Model, label: impl Into<String>, entity: &str, settings: &[&str], connections: &[&str]) -> Result<Self, StatementError> {
        let label = label.into();
        let target = model.entity(entity)?;
        let settings = resolve_fields(target, settings)?;
        let connections = resolve_fields(target, connections)?;
        if let Some(key) = connections.iter().find(|field| !field.is_foreign_key()) {
            return Err(StatementError::Invalid {
                label,
                reason: format!("{key} is not a foreign key"),
            });
        }

        Ok(Self {
            label,
            entity: entity.to_string(),
            settings,
            connections,
        })
    }

    pub fn settings(&self) -> &BTreeSet<Field> {
        &self.settings
    }

    pub fn connections(&self) -> &BTreeSet<Field> {
        &self.connections
    }
}

impl Mutation for Insert {
    fn label(&self) -> &str {
        &self.label
    }

    fn entity(&self) -> &str {
        &self.entity
    }

    fn modifies_index(&self, index: &Index) -> bool {
        index.path().contains_entity(&self.entity)
    }

    fn requires_insert(&self, index: &Index) -> bool {
        self.modifies_index(index)
    }

    fn requires_delete(&self, _index: &Index) -> bool {
        false
    }

    fn given_fields(&self) -> BTreeSet<Field> {
        self.settings.union(&self.connections).cloned().collect()
    }

    fn affected_rows(&self, _model: &Model) -> Result<f64, ModelError> {
        Ok(1.0)
    }

    /// Walks start at each connected neighbour, whose identity is known from
    /// the connecting key. A walk is skipped when the identity is all it
    /// would fetch.
    fn support_queries(&self, index: &Index, model: &Model) -> Result<Vec<Query>, StatementError> {
        if !self.modifies_index(index) {
            return Ok(Vec::new());
        }

        let mut queries = Vec::new();
        for (part, path) in support_paths(&self.entity, index, model)?.into_iter().enumerate() {
            if path.len() < 2 {
                continue;
            }
            let connected = path.hops()[1].via().is_some_and(|key| self.connections.contains(key));
            if !connected {
                continue;
            }

            let neighbour = path.sub_path(1, path.len() - 1);
            let given = neighbour.first().identity().to_vec();
            let select: Vec<Field> = index
                .all_fields()
                .into_iter()
                .filter(|field| field.parent() != self.entity && neighbour.contains_entity(field.parent()) && !given.contains(field))
                .collect();
            if select.is_empty() {
                continue;
            }

            let entity = neighbour.first().entity().to_string();
            let query = Query::new(support_label(&self.label, index, part), entity, neighbour, select, Vec::new())?.with_given(given)?;
            queries.push(query);
        }
        Ok(queries)
    }
}

/// Changes field values of every row matching the conditions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Update {
    label: String,
    entity: String,
    settings: BTreeSet<Field>,
    conditions: BTreeSet<Condition>,
}

impl Update {
    pub fn new(model: &Model, label: impl Into<String>, entity: &str, settings: &[&str], conditions: &[(&str, Operator)]) -> Result<Self, StatementError> {
        let label = label.into();
        let target = model.entity(entity)?;
        let settings = resolve_fields(target, settings)?;
        if settings.is_empty() {
            return Err(StatementError::Invalid {
                label,
                reason: "no fields updated".to_string(),
            });
        }
        let conditions = resolve_conditions(&label, target, conditions)?;

        Ok(Self {
            label,
            entity: entity.to_string(),
            settings,
            conditions,
        })
    }

    pub fn settings(&self) -> &BTreeSet<Field> {
        &self.settings
    }

    pub fn conditions(&self) -> &BTreeSet<Condition> {
        &self.conditions
    }

    fn eq_given(&self) -> BTreeSet<Field> {
        self.conditions.iter().filter(|condition| !condition.is_range()).map(|condition| condition.field.clone()).collect()
    }
}

impl Mutation for Update {
    fn label(&self) -> &str {
        &self.label
    }

    fn entity(&self) -> &str {
        &self.entity
    }

    fn modifies_index(&self, index: &Index) -> bool {
        self.settings.iter().any(|field| index.contains_field(field))
    }

    fn requires_insert(&self, index: &Index) -> bool {
        self.modifies_index(index)
    }

    /// Entries move when part of their key changes
    fn requires_delete(&self, index: &Index) -> bool {
        self.settings.iter().any(|field| index.hash_fields().contains(field) || index.order_fields().contains(field))
    }

    fn given_fields(&self) -> BTreeSet<Field> {
        self.settings.iter().cloned().chain(self.eq_given()).collect()
    }

    fn affected_rows(&self, model: &Model) -> Result<f64, ModelError> {
        condition_rows(model, &self.entity, &self.conditions)
    }

    fn support_queries(&self, index: &Index, model: &Model) -> Result<Vec<Query>, StatementError> {
        if !self.modifies_index(index) {
            return Ok(Vec::new());
        }

        let keys = keys(index);
        let eq_given = self.eq_given();
        // A moved entry is rewritten in full; otherwise only its key is needed
        let needed: BTreeSet<Field> = if self.requires_delete(index) {
            let replaced: BTreeSet<Field> = self.settings.difference(&keys).cloned().collect();
            index.all_fields().into_iter().filter(|field| !replaced.contains(field) && !eq_given.contains(field)).collect()
        } else {
            keys.difference(&eq_given).cloned().collect()
        };

        conditional_support(&self.label, &self.entity, &self.conditions, &needed, index, model)
    }
}

/// Removes every row matching the conditions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delete {
    label: String,
    entity: String,
    conditions: BTreeSet<Condition>,
}

impl Delete {
    pub fn new(model: &Model, label: impl Into<String>, entity: &str, conditions: &[(&str, Operator)]) -> Result<Self, StatementError> {
        let label = label.into();
        let target = model.entity(entity)?;
        let conditions = resolve_conditions(&label, target, conditions)?;
        Ok(Self {
            label,
            entity: entity.to_string(),
            conditions,
        })
    }

    pub fn conditions(&self) -> &BTreeSet<Condition> {
        &self.conditions
    }
}

impl Mutation for Delete {
    fn label(&self) -> &str {
        &self.label
    }

    fn entity(&self) -> &str {
        &self.entity
    }

    fn modifies_index(&self, index: &Index) -> bool {
        index.path().contains_entity(&self.entity)
    }

    fn requires_insert(&self, _index: &Index) -> bool {
        false
    }

    fn requires_delete(&self, index: &Index) -> bool {
        self.modifies_index(index)
    }

    fn given_fields(&self) -> BTreeSet<Field> {
        self.conditions.iter().filter(|condition| !condition.is_range()).map(|condition| condition.field.clone()).collect()
    }

    fn affected_rows(&self, model: &Model) -> Result<f64, ModelError> {
        condition_rows(model, &self.entity, &self.conditions)
    }

    fn support_queries(&self, index: &Index, model: &Model) -> Result<Vec<Query>, StatementError> {
        if !self.modifies_index(index) {
            return Ok(Vec::new());
        }
        let given = self.given_fields();
        let needed: BTreeSet<Field> = keys(index).difference(&given).cloned().collect();
        conditional_support(&self.label, &self.entity, &self.conditions, &needed, index, model)
    }
}
