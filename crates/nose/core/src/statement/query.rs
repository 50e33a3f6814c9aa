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

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::StatementError;
use crate::model::{Field, Index, IndexError, KeyPath, Model};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn is_range(&self) -> bool {
        !matches!(self, Operator::Eq)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

/// A parameterized predicate `field <op> ?`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub operator: Operator,
}

impl Condition {
    pub fn new(field: Field, operator: Operator) -> Self {
        Self { field, operator }
    }

    pub fn eq(field: Field) -> Self {
        Self::new(field, Operator::Eq)
    }

    pub fn is_range(&self) -> bool {
        self.operator.is_range()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ?", self.field, self.operator.symbol())
    }
}

/// A read statement over a key path.
///
/// The path is oriented: planning starts at its first entity. Every field a
/// query mentions must belong to an entity on the path and at most one
/// condition may be a range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Query {
    label: String,
    entity: String,
    path: KeyPath,
    select: BTreeSet<Field>,
    conditions: BTreeSet<Condition>,
    order: Vec<Field>,
    limit: Option<u64>,
    given: BTreeSet<Field>,
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Fields {
            label: String,
            entity: String,
            path: KeyPath,
            select: BTreeSet<Field>,
            conditions: BTreeSet<Condition>,
            #[serde(default)]
            order: Vec<Field>,
            #[serde(default)]
            limit: Option<u64>,
            #[serde(default)]
            given: BTreeSet<Field>,
        }

        let fields = Fields::deserialize(deserializer)?;
        let query = Self {
            label: fields.label,
            entity: fields.entity,
            path: fields.path,
            select: fields.select,
            conditions: fields.conditions,
            order: fields.order,
            limit: fields.limit,
            given: fields.given,
        };
        query.validate().map_err(serde::de::Error::custom)?;
        Ok(query)
    }
}

impl Query {
    pub fn new(
        label: impl Into<String>,
        entity: impl Into<String>,
        path: KeyPath,
        select: impl IntoIterator<Item = Field>,
        conditions: impl IntoIterator<Item = Condition>,
    ) -> Result<Self, StatementError> {
        let query = Self {
            label: label.into(),
            entity: entity.into(),
            path,
            select: select.into_iter().collect(),
            conditions: conditions.into_iter().collect(),
            order: Vec::new(),
            limit: None,
            given: BTreeSet::new(),
        };
        query.validate()?;
        Ok(query)
    }

    pub fn builder<'a>(model: &'a Model, label: impl Into<String>, from: impl Into<String>) -> QueryBuilder<'a> {
        QueryBuilder::new(model, label, from)
    }

    pub fn with_order(mut self, order: impl IntoIterator<Item = Field>) -> Result<Self, StatementError> {
        self.order = Vec::new();
        for field in order {
            if !self.order.contains(&field) {
                self.order.push(field);
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_limit(mut self, limit: u64) -> Result<Self, StatementError> {
        self.limit = Some(limit);
        self.validate()?;
        Ok(self)
    }

    /// Fields whose values are supplied by the caller, as for support queries
    pub fn with_given(mut self, given: impl IntoIterator<Item = Field>) -> Result<Self, StatementError> {
        self.given = given.into_iter().collect();
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), StatementError> {
        if self.select.is_empty() {
            return Err(StatementError::EmptySelect(self.label.clone()));
        }
        if !self.path.contains_entity(&self.entity) {
            return Err(StatementError::Invalid {
                label: self.label.clone(),
                reason: format!("entity {} is not on path {}", self.entity, self.path),
            });
        }

        let mentioned = self
            .select
            .iter()
            .chain(self.conditions.iter().map(|condition| &condition.field))
            .chain(&self.order)
            .chain(&self.given);
        for field in mentioned {
            if !self.path.contains_entity(field.parent()) {
                return Err(StatementError::FieldOffPath {
                    label: self.label.clone(),
                    field: field.id(),
                });
            }
        }

        if self.conditions.iter().filter(|condition| condition.is_range()).count() > 1 {
            return Err(StatementError::MultipleRanges(self.label.clone()));
        }
        if self.limit == Some(0) {
            return Err(StatementError::ZeroLimit(self.label.clone()));
        }
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    pub fn select(&self) -> &BTreeSet<Field> {
        &self.select
    }

    pub fn conditions(&self) -> &BTreeSet<Condition> {
        &self.conditions
    }

    pub fn order(&self) -> &[Field] {
        &self.order
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn given(&self) -> &BTreeSet<Field> {
        &self.given
    }

    pub fn eq_fields(&self) -> BTreeSet<Field> {
        self.conditions.iter().filter(|condition| !condition.is_range()).map(|condition| condition.field.clone()).collect()
    }

    pub fn range_field(&self) -> Option<&Field> {
        self.conditions.iter().find(|condition| condition.is_range()).map(|condition| &condition.field)
    }

    /// Fields with a known value before execution: given fields and
    /// equality parameters
    pub fn given_fields(&self) -> BTreeSet<Field> {
        self.given.iter().cloned().chain(self.eq_fields()).collect()
    }

    /// Every field the query reads, selects or filters on
    pub fn all_fields(&self) -> BTreeSet<Field> {
        self.select
            .iter()
            .chain(self.conditions.iter().map(|condition| &condition.field))
            .chain(&self.order)
            .cloned()
            .collect()
    }

    /// The index answering this query with a single lookup
    pub fn materialize_view(&self) -> Result<Index, IndexError> {
        let first = self.path.first();
        let eq = self.eq_fields();

        let mut hash: BTreeSet<Field> = eq.iter().filter(|field| field.parent() == first.entity()).cloned().collect();
        if hash.is_empty() {
            hash = first.identity().iter().cloned().collect();
        }

        // Equality on other entities, then ordering, then the range
        let mut order: Vec<Field> = eq.iter().filter(|field| field.parent() != first.entity()).cloned().collect();
        order.extend(self.order.iter().cloned());
        if let Some(range) = self.range_field() {
            order.push(range.clone());
        }
        for hop in self.path.hops() {
            order.extend(hop.identity().iter().cloned());
        }

        Index::new(hash, order, self.select.iter().cloned(), self.path.clone())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let select: Vec<String> = self.select.iter().map(Field::id).collect();
        write!(f, "{}: SELECT {} FROM {}", self.label, select.join(", "), self.path)?;
        if !self.conditions.is_empty() {
            let conditions: Vec<String> = self.conditions.iter().map(Condition::to_string).collect();
            write!(f, " WHERE {}", conditions.join(" AND "))?;
        }
        if !self.order.is_empty() {
            let order: Vec<String> = self.order.iter().map(Field::id).collect();
            write!(f, " ORDER BY {}", order.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

/// Builds a [`Query`] from field identifiers resolved against a model.
///
/// Joins follow foreign keys starting at the `from` entity. Once built, the
/// path is oriented so that it starts at an end of the join chain carrying
/// equality predicates.
pub struct QueryBuilder<'a> {
    model: &'a Model,
    label: String,
    from: String,
    keys: Vec<String>,
    select: Vec<String>,
    conditions: Vec<(String, Operator)>,
    order: Vec<String>,
    limit: Option<u64>,
    given: Vec<String>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(model: &'a Model, label: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            model,
            label: label.into(),
            from: from.into(),
            keys: Vec::new(),
            select: Vec::new(),
            conditions: Vec::new(),
            order: Vec::new(),
            limit: None,
            given: Vec::new(),
        }
    }

    /// Follows a foreign key of the entity reached so far
    pub fn join(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn select(mut self, field: impl Into<String>) -> Self {
        self.select.push(field.into());
        self
    }

    pub fn eq(mut self, field: impl Into<String>) -> Self {
        self.conditions.push((field.into(), Operator::Eq));
        self
    }

    pub fn range(mut self, field: impl Into<String>, operator: Operator) -> Self {
        self.conditions.push((field.into(), operator));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order.push(field.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn given(mut self, field: impl Into<String>) -> Self {
        self.given.push(field.into());
        self
    }

    fn resolve(&self, ids: &[String]) -> Result<Vec<Field>, StatementError> {
        ids.iter().map(|id| Ok(self.model.field(id)?.clone())).collect()
    }

    pub fn build(self) -> Result<Query, StatementError> {
        let keys: Vec<&str> = self.keys.iter().map(String::as_str).collect();
        let mut path = KeyPath::through(self.model, &self.from, &keys)?;

        let select = self.resolve(&self.select)?;
        let order = self.resolve(&self.order)?;
        let given = self.resolve(&self.given)?;
        let mut conditions = Vec::with_capacity(self.conditions.len());
        for (id, operator) in &self.conditions {
            conditions.push(Condition::new(self.model.field(id)?.clone(), *operator));
        }

        let has_eq = |entity: &str| conditions.iter().any(|condition| !condition.is_range() && condition.field.parent() == entity);
        if path.len() > 1 && !has_eq(path.first().entity()) && has_eq(path.last().entity()) {
            path = path.reverse(self.model)?;
        }

        let mut query = Query::new(self.label, self.from, path, select, conditions)?;
        if !order.is_empty() {
            query = query.with_order(order)?;
        }
        if let Some(limit) = self.limit {
            query = query.with_limit(limit)?;
        }
        if !given.is_empty() {
            query = query.with_given(given)?;
        }
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, Relationship};

    fn model() -> Model {
        Model::new([
            Entity::new("User", 1000)
                .with_id("Id", 8)
                .with_field("Name", 20, None)
                .with_field("City", 20, Some(50))
                .with_foreign_key("Tweets", "Tweet", Relationship::Many),
            Entity::new("Tweet", 20000)
                .with_id("Id", 8)
                .with_field("Body", 140, None)
                .with_field("Timestamp", 8, None)
                .with_foreign_key("User", "User", Relationship::One),
        ])
        .unwrap()
    }

    #[test]
    fn test_builder_resolves_fields() {
        let model = model();
        let query = Query::builder(&model, "by_id", "User").select("User.Name").eq("User.Id").build().unwrap();

        assert_eq!(query.path().len(), 1);
        assert_eq!(query.eq_fields().len(), 1);
        assert!(query.range_field().is_none());
        assert_eq!(query.to_string(), "by_id: SELECT User.Name FROM User WHERE User.Id = ?");
    }

    #[test]
    fn test_path_oriented_towards_equality() {
        let model = model();
        let query = Query::builder(&model, "timeline", "Tweet")
            .join("User")
            .select("Tweet.Body")
            .eq("User.City")
            .build()
            .unwrap();

        assert_eq!(query.path().entities().collect::<Vec<_>>(), vec!["User", "Tweet"]);
        assert_eq!(query.entity(), "Tweet");
        assert_eq!(query.path().hops()[1].via().unwrap().id(), "User.Tweets");
    }

    #[test]
    fn test_validation() {
        let model = model();

        let empty = Query::builder(&model, "q", "User").eq("User.Id").build();
        assert!(matches!(empty, Err(StatementError::EmptySelect(_))));

        let off_path = Query::builder(&model, "q", "User").select("Tweet.Body").build();
        assert!(matches!(off_path, Err(StatementError::FieldOffPath { .. })));

        let ranges = Query::builder(&model, "q", "User")
            .select("User.Name")
            .range("User.Name", Operator::Gt)
            .range("User.City", Operator::Lt)
            .build();
        assert!(matches!(ranges, Err(StatementError::MultipleRanges(_))));

        let zero = Query::builder(&model, "q", "User").select("User.Name").limit(0).build();
        assert!(matches!(zero, Err(StatementError::ZeroLimit(_))));

        let unknown = Query::builder(&model, "q", "User").select("User.Missing").build();
        assert!(matches!(unknown, Err(StatementError::Model(_))));
    }

    #[test]
    fn test_materialize_view() {
        let model = model();
        let query = Query::builder(&model, "timeline", "Tweet")
            .join("User")
            .select("Tweet.Body")
            .eq("User.City")
            .order_by("Tweet.Timestamp")
            .build()
            .unwrap();

        let view = query.materialize_view().unwrap();
        let hash: Vec<String> = view.hash_fields().iter().map(Field::id).collect();
        let order: Vec<String> = view.order_fields().iter().map(Field::id).collect();
        let extra: Vec<String> = view.extra().iter().map(Field::id).collect();

        assert_eq!(hash, vec!["User.City"]);
        assert_eq!(order, vec!["Tweet.Timestamp", "User.Id", "Tweet.Id"]);
        assert_eq!(extra, vec!["Tweet.Body"]);
        assert_eq!(view.path(), query.path());
    }

    #[test]
    fn test_materialize_view_without_equality() {
        let model = model();
        let query = Query::builder(&model, "all", "User").select("User.Name").order_by("User.Name").build().unwrap();
        let view = query.materialize_view().unwrap();
        assert!(view.is_identity_keyed());
        assert!(view.order_fields().iter().any(|field| field.id() == "User.Name"));
    }
}
