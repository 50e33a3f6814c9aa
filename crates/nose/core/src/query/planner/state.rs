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

use crate::model::{Field, KeyPath};
use crate::statement::Query;

/// What is still unresolved while planning one query.
///
/// Every step transition clones the state and removes what it resolves, so
/// sibling branches of the plan tree never share a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryState {
    pub(super) query: String,
    pub(super) fields: BTreeSet<Field>,
    pub(super) eq: BTreeSet<Field>,
    pub(super) range: Option<Field>,
    pub(super) order_by: Vec<Field>,
    pub(super) path: KeyPath,
    pub(super) cardinality: f64,
    pub(super) given: BTreeSet<Field>,
    pub(super) limit: Option<u64>,
}

impl QueryState {
    pub fn new(query: &Query) -> Self {
        let eq = query.eq_fields();
        let given = query.given_fields();
        Self {
            query: query.label().to_string(),
            fields: query.select().iter().filter(|field| !query.given().contains(*field)).cloned().collect(),
            order_by: query.order().iter().filter(|field| !eq.contains(*field)).cloned().collect(),
            range: query.range_field().cloned(),
            eq,
            path: query.path().clone(),
            cardinality: 1.0,
            given,
            limit: query.limit(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Selected fields not yet fetched
    pub fn fields(&self) -> &BTreeSet<Field> {
        &self.fields
    }

    pub fn eq(&self) -> &BTreeSet<Field> {
        &self.eq
    }

    pub fn range(&self) -> Option<&Field> {
        self.range.as_ref()
    }

    pub fn order_by(&self) -> &[Field] {
        &self.order_by
    }

    /// Remaining path; its first entity is where the next lookup starts
    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    pub fn cardinality(&self) -> f64 {
        self.cardinality
    }

    /// Fields with values known up front: given fields and equality parameters
    pub fn given(&self) -> &BTreeSet<Field> {
        &self.given
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Every field still needed by a predicate, the projection or the ordering
    pub fn needed_fields(&self) -> BTreeSet<Field> {
        self.fields.iter().chain(&self.eq).chain(&self.range).chain(&self.order_by).cloned().collect()
    }

    /// Whether nothing remains to be resolved. With `check_limit` the
    /// estimated cardinality must also respect the limit.
    pub fn answered(&self, check_limit: bool) -> bool {
        let resolved = self.fields.is_empty() && self.eq.is_empty() && self.range.is_none() && self.order_by.is_empty();
        if !resolved || !check_limit {
            return resolved;
        }
        self.limit.is_none_or(|limit| self.cardinality <= limit as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, Model};

    fn model() -> Model {
        Model::new([Entity::new("Foo", 100).with_id("Id", 8).with_field("Bar", 10, Some(10))]).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let model = model();
        let query = Query::builder(&model, "q", "Foo")
            .select("Foo.Bar")
            .eq("Foo.Bar")
            .order_by("Foo.Bar")
            .order_by("Foo.Id")
            .build()
            .unwrap();
        let state = QueryState::new(&query);

        assert_eq!(state.fields().len(), 1);
        assert_eq!(state.order_by().iter().map(Field::id).collect::<Vec<_>>(), vec!["Foo.Id"]);
        assert_eq!(state.cardinality(), 1.0);
        assert!(!state.answered(false));
    }

    #[test]
    fn test_answered_respects_limit() {
        let model = model();
        let query = Query::builder(&model, "q", "Foo").select("Foo.Bar").limit(5).build().unwrap();
        let mut state = QueryState::new(&query);
        state.fields.clear();
        state.cardinality = 10.0;

        assert!(state.answered(false));
        assert!(!state.answered(true));
        state.cardinality = 5.0;
        assert!(state.answered(true));
    }
}
