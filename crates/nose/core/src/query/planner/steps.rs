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

//! Plan steps and their state transitions.
//!
//! Each `apply` takes the parent step and the state to transform and either
//! returns the new step or `None` when the step does not apply there.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::state::QueryState;
use crate::model::{Field, Index};
use crate::statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepKind {
    Root,
    IndexLookup,
    Filter,
    Sort,
    Limit,
    Insert,
    Delete,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Root => "root",
            StepKind::IndexLookup => "index_lookup",
            StepKind::Filter => "filter",
            StepKind::Sort => "sort",
            StepKind::Limit => "limit",
            StepKind::Insert => "insert",
            StepKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    Root(RootStep),
    IndexLookup(IndexLookupStep),
    Filter(FilterStep),
    Sort(SortStep),
    Limit(LimitStep),
    Insert(MutationStep),
    Delete(MutationStep),
}

impl PlanStep {
    pub fn kind(&self) -> StepKind {
        match self {
            PlanStep::Root(_) => StepKind::Root,
            PlanStep::IndexLookup(_) => StepKind::IndexLookup,
            PlanStep::Filter(_) => StepKind::Filter,
            PlanStep::Sort(_) => StepKind::Sort,
            PlanStep::Limit(_) => StepKind::Limit,
            PlanStep::Insert(_) => StepKind::Insert,
            PlanStep::Delete(_) => StepKind::Delete,
        }
    }

    /// Query state after this step; mutation steps carry none
    pub fn state(&self) -> Option<&QueryState> {
        match self {
            PlanStep::Root(step) => Some(&step.state),
            PlanStep::IndexLookup(step) => Some(&step.state),
            PlanStep::Filter(step) => Some(&step.state),
            PlanStep::Sort(step) => Some(&step.state),
            PlanStep::Limit(step) => Some(&step.state),
            PlanStep::Insert(_) | PlanStep::Delete(_) => None,
        }
    }

    /// Fields fetched by this step and every step before it
    pub fn fields(&self) -> &BTreeSet<Field> {
        match self {
            PlanStep::Root(step) => &step.fields,
            PlanStep::IndexLookup(step) => &step.fields,
            PlanStep::Filter(step) => &step.fields,
            PlanStep::Sort(step) => &step.fields,
            PlanStep::Limit(step) => &step.fields,
            PlanStep::Insert(step) | PlanStep::Delete(step) => &step.fields,
        }
    }

    pub fn cardinality(&self) -> f64 {
        match self {
            PlanStep::Insert(step) | PlanStep::Delete(step) => step.rows,
            _ => self.state().map_or(1.0, QueryState::cardinality),
        }
    }

    pub fn index(&self) -> Option<&Index> {
        match self {
            PlanStep::IndexLookup(step) => Some(&step.index),
            PlanStep::Insert(step) | PlanStep::Delete(step) => Some(&step.index),
            _ => None,
        }
    }

    pub fn as_lookup(&self) -> Option<&IndexLookupStep> {
        match self {
            PlanStep::IndexLookup(step) => Some(step),
            _ => None,
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::Root(_) => write!(f, "root"),
            PlanStep::IndexLookup(step) => {
                let scan = if step.scan { " scan" } else { "" };
                write!(f, "lookup{scan} {} ({} partitions, {:.1} rows)", step.index.key(), step.partitions, step.state.cardinality)
            }
            PlanStep::Filter(step) => {
                let fields: Vec<String> = step.eq.iter().chain(&step.range).map(Field::id).collect();
                write!(f, "filter [{}] ({:.1} rows)", fields.join(", "), step.state.cardinality)
            }
            PlanStep::Sort(step) => {
                let fields: Vec<String> = step.sort_fields.iter().map(Field::id).collect();
                write!(f, "sort [{}]", fields.join(", "))
            }
            PlanStep::Limit(step) => write!(f, "limit {}", step.limit),
            PlanStep::Insert(step) => write!(f, "insert {} ({:.1} rows)", step.index.key(), step.rows),
            PlanStep::Delete(step) => write!(f, "delete {} ({:.1} rows)", step.index.key(), step.rows),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootStep {
    pub state: QueryState,
    pub fields: BTreeSet<Field>,
}

impl RootStep {
    pub fn new(state: QueryState) -> PlanStep {
        PlanStep::Root(Self {
            state,
            fields: BTreeSet::new(),
        })
    }
}

/// A read from one index, possibly chained from a previous lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexLookupStep {
    pub index: Index,
    /// Equality predicates answered by the index key
    pub eq_filter: BTreeSet<Field>,
    pub range_filter: Option<Field>,
    /// Order-by fields satisfied by the clustering key
    pub order_by: Vec<Field>,
    /// Number of partitions read
    pub partitions: f64,
    /// Whether every partition is read
    pub scan: bool,
    pub state: QueryState,
    pub fields: BTreeSet<Field>,
}

impl IndexLookupStep {
    pub fn apply(parent: &PlanStep, previous: Option<&IndexLookupStep>, index: &Index, state: &QueryState) -> Option<PlanStep> {
        if !state.path.starts_with(index.path()) {
            return None;
        }

        let head = state.path.first();
        let fetched = parent.fields();
        let available = |field: &Field| {
            fetched.contains(field)
                || state.given.contains(field)
                || (field.is_primary_key() && head.identity().len() == 1 && fetched.iter().any(|key| key.references(field.parent())))
        };
        let hash_available = index.hash_fields().iter().all(available);

        let scan = match previous {
            // Joins continue one hop at a time through identities
            Some(_) if !index.is_identity_keyed() || !hash_available => return None,
            Some(_) => false,
            None if hash_available => false,
            None if state.given.iter().any(|field| field.parent() == head.entity()) => return None,
            None => true,
        };

        // Entities left behind by this lookup are never reachable again
        let covered = index.path().len();
        let passed: Vec<&str> = index.path().entities().take(covered - 1).collect();
        let stranded = state
            .needed_fields()
            .into_iter()
            .any(|field| passed.contains(&field.parent()) && !index.contains_field(&field));
        if stranded {
            return None;
        }

        let mut eq_filter: BTreeSet<Field> = if scan {
            BTreeSet::new()
        } else {
            index.hash_fields().intersection(&state.eq).cloned().collect()
        };
        let prefix = index.order_fields().iter().take_while(|field| state.eq.contains(*field)).count();
        eq_filter.extend(index.order_fields()[..prefix].iter().cloned());
        let range_filter = state.range.clone().filter(|range| index.order_fields().get(prefix) == Some(range));

        let mut remaining_order = state.order_by.clone();
        let mut order_by = Vec::new();
        if orders_results(scan, previous, state.cardinality) {
            let common = remaining_order.iter().zip(&index.order_fields()[prefix..]).take_while(|(wanted, key)| wanted == key).count();
            order_by = remaining_order.drain(..common).collect();
        }

        let index_fields = index.all_fields();
        let mut new_state = state.clone();
        new_state.fields.retain(|field| !index_fields.contains(field));
        new_state.eq.retain(|field| !eq_filter.contains(field));
        if range_filter.is_some() {
            new_state.range = None;
        }
        new_state.order_by = remaining_order;
        new_state.path = state.path.sub_path(covered - 1, state.path.len() - 1);

        let (start, partitions, estimate_eq) = match previous {
            None if scan => (head.count() as f64, index.hash_count() as f64, eq_filter.clone()),
            None => (head.count() as f64, 1.0, eq_filter.union(index.hash_fields()).cloned().collect()),
            // Hash identities were already counted by the previous lookup
            Some(_) => (state.cardinality, state.cardinality, eq_filter.difference(index.hash_fields()).cloned().collect()),
        };
        new_state.cardinality = statistics::estimate(start, index.path(), &estimate_eq, range_filter.as_ref());

        let progress = new_state.fields != state.fields
            || new_state.eq != state.eq
            || new_state.range != state.range
            || new_state.order_by != state.order_by
            || new_state.path.len() < state.path.len();
        if !progress {
            return None;
        }

        Some(PlanStep::IndexLookup(Self {
            index: index.clone(),
            eq_filter,
            range_filter,
            order_by,
            partitions,
            scan,
            state: new_state,
            fields: fetched.union(&index_fields).cloned().collect(),
        }))
    }

    /// Equality predicates answered by clustering fields
    pub fn clustering_eq(&self) -> BTreeSet<Field> {
        self.eq_filter.iter().filter(|field| self.index.order_fields().contains(*field)).cloned().collect()
    }

    pub fn rows(&self) -> f64 {
        self.state.cardinality
    }
}

/// Whether the clustering order of a lookup is the order of its whole
/// result. That holds when every row comes from one partition: a keyed first
/// lookup, or a chained lookup entered from a single row. The hash key need
/// not be an identity.
fn orders_results(scan: bool, previous: Option<&IndexLookupStep>, cardinality: f64) -> bool {
    match previous {
        _ if scan => false,
        None => true,
        Some(_) => cardinality <= 1.0,
    }
}

/// Client-side filtering on fetched fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    pub eq: BTreeSet<Field>,
    pub range: Option<Field>,
    /// Rows before filtering
    pub input_rows: f64,
    pub state: QueryState,
    pub fields: BTreeSet<Field>,
}

impl FilterStep {
    pub fn apply(parent: &PlanStep, state: &QueryState) -> Option<PlanStep> {
        let fetched = parent.fields();
        let has = |field: &Field| fetched.contains(field) || (field.is_primary_key() && fetched.iter().any(|key| key.references(field.parent())));

        let eq: BTreeSet<Field> = state.eq.iter().filter(|field| has(field)).cloned().collect();
        let range = state.range.clone().filter(|field| has(field));
        if eq.is_empty() && range.is_none() {
            return None;
        }

        let mut new_state = state.clone();
        new_state.eq.retain(|field| !eq.contains(field));
        if range.is_some() {
            new_state.range = None;
        }
        new_state.cardinality = statistics::filter(state.cardinality, &eq, range.is_some());

        Some(PlanStep::Filter(Self {
            eq,
            range,
            input_rows: state.cardinality,
            state: new_state,
            fields: fetched.clone(),
        }))
    }
}

/// External sort once everything else is resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortStep {
    pub sort_fields: Vec<Field>,
    pub state: QueryState,
    pub fields: BTreeSet<Field>,
}

impl SortStep {
    pub fn apply(parent: &PlanStep, state: &QueryState) -> Option<PlanStep> {
        let terminal = state.fields.is_empty() && state.eq.is_empty() && state.range.is_none();
        if !terminal || state.order_by.is_empty() {
            return None;
        }
        let fetched = parent.fields();
        if !state.order_by.iter().all(|field| fetched.contains(field)) {
            return None;
        }

        let mut new_state = state.clone();
        let sort_fields = std::mem::take(&mut new_state.order_by);
        Some(PlanStep::Sort(Self {
            sort_fields,
            state: new_state,
            fields: fetched.clone(),
        }))
    }

    pub fn rows(&self) -> f64 {
        self.state.cardinality
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitStep {
    pub limit: u64,
    pub state: QueryState,
    pub fields: BTreeSet<Field>,
}

impl LimitStep {
    pub fn apply(parent: &PlanStep, state: &QueryState) -> Option<PlanStep> {
        let limit = state.limit?;
        if !state.answered(false) || state.cardinality <= limit as f64 {
            return None;
        }

        let mut new_state = state.clone();
        new_state.cardinality = limit as f64;
        Some(PlanStep::Limit(Self {
            limit,
            state: new_state,
            fields: parent.fields().clone(),
        }))
    }
}

/// Insertion into or deletion from an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationStep {
    pub index: Index,
    /// Entries written
    pub rows: f64,
    pub fields: BTreeSet<Field>,
}

impl MutationStep {
    pub fn insert(index: &Index, rows: f64) -> PlanStep {
        PlanStep::Insert(Self::new(index, rows))
    }

    pub fn delete(index: &Index, rows: f64) -> PlanStep {
        PlanStep::Delete(Self::new(index, rows))
    }

    fn new(index: &Index, rows: f64) -> Self {
        Self {
            index: index.clone(),
            rows: rows.max(1.0),
            fields: index.all_fields(),
        }
    }
}
