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

//! Candidate index enumeration.
//!
//! Candidates are generated per query over every contiguous piece of its
//! path in both directions, then extended with the indexes that support
//! queries of mutations would need.

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, trace};

use crate::model::{Field, Index, KeyPath, Model};
use crate::statement::{Query, StatementError, Workload};

pub struct IndexEnumerator<'a> {
    model: &'a Model,
    combine: bool,
}

impl<'a> IndexEnumerator<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self { model, combine: true }
    }

    /// Whether candidates sharing a key and path get merged payloads
    pub fn with_combine(mut self, combine: bool) -> Self {
        self.combine = combine;
        self
    }

    pub fn indexes_for_query(&self, query: &Query) -> BTreeSet<Index> {
        let mut indexes = BTreeSet::new();
        match query.materialize_view() {
            Ok(view) => {
                indexes.insert(view);
            }
            Err(error) => trace!(query = %query.label(), %error, "No materialized view"),
        }

        let path = query.path();
        for start in 0..path.len() {
            for end in start..path.len() {
                let forward = path.sub_path(start, end);
                if end > start {
                    match forward.reverse(self.model) {
                        Ok(backward) => self.indexes_for_path(query, &backward, &mut indexes),
                        Err(error) => trace!(query = %query.label(), %error, "Path not reversible"),
                    }
                }
                self.indexes_for_path(query, &forward, &mut indexes);
            }
        }

        trace!(query = %query.label(), candidates = indexes.len(), "Enumerated query indexes");
        indexes
    }

    fn indexes_for_path(&self, query: &Query, path: &KeyPath, indexes: &mut BTreeSet<Index>) {
        let first = path.first();
        let on_path = |field: &&Field| path.contains_entity(field.parent());

        let bound: Vec<Field> = query.given_fields().into_iter().filter(|field| field.parent() == first.entity()).collect();
        let hash_choices = hash_choices(&bound, first.identity());
        let order_choices = order_choices(query, path);

        let mut payload: BTreeSet<Field> = query.select().iter().filter(on_path).cloned().collect();
        payload.extend(query.conditions().iter().map(|condition| &condition.field).filter(|field| field.parent() == first.entity()).cloned());
        let extra_choices = [BTreeSet::new(), payload];

        for hash in &hash_choices {
            for order in &order_choices {
                for extra in &extra_choices {
                    match Index::new(hash.iter().cloned(), order.iter().cloned(), extra.iter().cloned(), path.clone()) {
                        Ok(index) => {
                            indexes.insert(index);
                        }
                        Err(error) => trace!(%error, path = %path, "Discarding candidate index"),
                    }
                }
            }
        }
    }

    fn indexes_for_queries(&self, queries: &[&Query], parallel: bool) -> BTreeSet<Index> {
        if parallel {
            queries
                .par_iter()
                .map(|query| self.indexes_for_query(query))
                .reduce(BTreeSet::new, |mut all, indexes| {
                    all.extend(indexes);
                    all
                })
        } else {
            queries.iter().flat_map(|query| self.indexes_for_query(query)).collect()
        }
    }

    /// Candidates for every query of the workload plus the indexes their
    /// mutations need for support queries
    #[instrument(skip_all, fields(statements = workload.statements().len()))]
    pub fn indexes_for_workload(&self, workload: &Workload, parallel: bool) -> Result<BTreeSet<Index>, StatementError> {
        let queries: Vec<&Query> = workload.queries().map(|(query, _)| query).collect();
        let mut indexes = self.indexes_for_queries(&queries, parallel);
        info!(candidates = indexes.len(), "Enumerated query indexes");

        let frontier = indexes.clone();
        self.add_support_indexes(workload, &mut indexes, frontier, parallel)?;

        if self.combine {
            let combined: BTreeSet<Index> = combine_indexes(&indexes).into_iter().filter(|index| !indexes.contains(index)).collect();
            debug!(combined = combined.len(), "Combined index payloads");
            indexes.extend(combined.iter().cloned());
            self.add_support_indexes(workload, &mut indexes, combined, parallel)?;
        }

        info!(candidates = indexes.len(), "Enumerated workload indexes");
        Ok(indexes)
    }

    /// Adds support indexes until no mutation needs a new one
    fn add_support_indexes(&self, workload: &Workload, indexes: &mut BTreeSet<Index>, mut frontier: BTreeSet<Index>, parallel: bool) -> Result<(), StatementError> {
        let mut round = 0;
        while !frontier.is_empty() {
            round += 1;
            let mut support = Vec::new();
            for (mutation, _) in workload.mutations() {
                for index in &frontier {
                    support.extend(mutation.support_queries(index, self.model)?);
                }
            }

            let queries: Vec<&Query> = support.iter().collect();
            let found = self.indexes_for_queries(&queries, parallel);
            frontier = found.into_iter().filter(|index| !indexes.contains(index)).collect();
            debug!(round, support_queries = support.len(), added = frontier.len(), "Support index round");
            indexes.extend(frontier.iter().cloned());
        }
        Ok(())
    }
}

/// Non-empty subsets of the bound fields, and the identity
fn hash_choices(bound: &[Field], identity: &[Field]) -> Vec<BTreeSet<Field>> {
    let mut choices: BTreeSet<BTreeSet<Field>> = BTreeSet::new();
    choices.insert(identity.iter().cloned().collect());

    let mut subsets: Vec<BTreeSet<Field>> = vec![BTreeSet::new()];
    for field in bound {
        let extended: Vec<BTreeSet<Field>> = subsets
            .iter()
            .map(|subset| {
                let mut subset = subset.clone();
                subset.insert(field.clone());
                subset
            })
            .collect();
        subsets.extend(extended);
    }
    choices.extend(subsets.into_iter().filter(|subset| !subset.is_empty()));
    choices.into_iter().collect()
}

/// Clustering keys: equality fields on entities past the first, then each
/// prefix of the range and ordering fields, then the terminal identity
fn order_choices(query: &Query, path: &KeyPath) -> Vec<Vec<Field>> {
    let first = path.first().entity();
    let eq_rest: Vec<Field> = query
        .eq_fields()
        .into_iter()
        .filter(|field| field.parent() != first && path.contains_entity(field.parent()))
        .collect();

    let ordering: Vec<Field> = query.order().iter().take_while(|field| path.contains_entity(field.parent())).cloned().collect();
    let mut sequences = vec![ordering.clone()];
    if let Some(range) = query.range_field().filter(|field| path.contains_entity(field.parent())) {
        let mut ranged = vec![range.clone()];
        ranged.extend(ordering.iter().filter(|field| *field != range).cloned());
        sequences.push(ranged);
    }

    let mut choices: BTreeSet<Vec<Field>> = BTreeSet::new();
    for sequence in &sequences {
        for length in 0..=sequence.len() {
            let mut order = eq_rest.clone();
            order.extend(sequence[..length].iter().cloned());
            order.extend(path.last().identity().iter().cloned());
            choices.insert(order);
        }
    }
    choices.into_iter().collect()
}

/// Merges payloads of unordered candidates sharing a key and path, two at a
/// time
fn combine_indexes(indexes: &BTreeSet<Index>) -> BTreeSet<Index> {
    let mut groups: BTreeMap<(BTreeSet<Field>, KeyPath), BTreeSet<BTreeSet<Field>>> = BTreeMap::new();
    for index in indexes.iter().filter(|index| index.order_fields().is_empty()) {
        groups
            .entry((index.hash_fields().clone(), index.path().clone()))
            .or_default()
            .insert(index.extra().clone());
    }

    let mut combined = BTreeSet::new();
    for ((hash, path), extras) in groups {
        let extras: Vec<BTreeSet<Field>> = extras.into_iter().collect();
        for (position, first) in extras.iter().enumerate() {
            for second in &extras[position + 1..] {
                let extra = first.union(second).cloned();
                if let Ok(index) = Index::new(hash.iter().cloned(), Vec::new(), extra, path.clone()) {
                    combined.insert(index);
                }
            }
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, Relationship};
    use crate::statement::{Insert, Operator};

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

    fn timeline(model: &Model) -> Query {
        Query::builder(model, "timeline", "Tweet")
            .join("User")
            .select("Tweet.Body")
            .eq("User.City")
            .range("Tweet.Timestamp", Operator::Gt)
            .order_by("Tweet.Timestamp")
            .build()
            .unwrap()
    }

    #[test]
    fn test_query_candidates_include_view() {
        let model = model();
        let query = timeline(&model);
        let indexes = IndexEnumerator::new(&model).indexes_for_query(&query);

        assert!(indexes.contains(&query.materialize_view().unwrap()));
        // Single entity pieces in both positions and the joined path both ways
        let paths: BTreeSet<String> = indexes.iter().map(|index| index.path().to_string()).collect();
        assert!(paths.contains("User"));
        assert!(paths.contains("Tweet"));
        assert!(paths.contains("User.Tweet"));
        assert!(paths.contains("Tweet.User"));
    }

    #[test]
    fn test_candidates_are_valid() {
        let model = model();
        let indexes = IndexEnumerator::new(&model).indexes_for_query(&timeline(&model));
        for index in &indexes {
            let terminal = index.path().last().identity();
            assert!(terminal.iter().all(|field| index.hash_fields().contains(field) || index.order_fields().contains(field)));
            assert_eq!(index.hash_fields().iter().next().unwrap().parent(), index.path().first().entity());
        }
    }

    #[test]
    fn test_hash_choices() {
        let model = model();
        let user = model.entity("User").unwrap();
        let bound = vec![user.field("City").unwrap().clone(), user.field("Name").unwrap().clone()];
        let choices = hash_choices(&bound, &user.id_fields());
        // {Id}, {City}, {Name}, {City, Name}
        assert_eq!(choices.len(), 4);
    }

    #[test]
    fn test_hash_choices_cover_every_bound_field() {
        let wide = Entity::new("Wide", 100)
            .with_id("Id", 8)
            .with_field("A", 4, Some(2))
            .with_field("B", 4, Some(2))
            .with_field("C", 4, Some(2))
            .with_field("D", 4, Some(2))
            .with_field("E", 4, Some(2));
        let bound: Vec<Field> = ["A", "B", "C", "D", "E"].iter().map(|name| wide.field(name).unwrap().clone()).collect();

        let choices = hash_choices(&bound, &wide.id_fields());
        // Every non-empty subset of five fields, plus the identity
        assert_eq!(choices.len(), 32);
        let all: BTreeSet<Field> = bound.iter().cloned().collect();
        assert!(choices.contains(&all));
        assert!(choices.iter().any(|choice| choice.len() == 1 && choice.contains(&bound[4])));
    }

    #[test]
    fn test_combine_pairs() {
        let model = model();
        let user = model.entity("User").unwrap();
        let path = KeyPath::single(user);
        let id = user.field("Id").unwrap().clone();
        let name = user.field("Name").unwrap().clone();
        let city = user.field("City").unwrap().clone();
        let indexes: BTreeSet<Index> = [
            Index::new([id.clone()], Vec::new(), [name.clone()], path.clone()).unwrap(),
            Index::new([id.clone()], Vec::new(), [city.clone()], path.clone()).unwrap(),
        ]
        .into_iter()
        .collect();

        let combined = combine_indexes(&indexes);
        assert_eq!(combined.len(), 1);
        let merged = combined.iter().next().unwrap();
        assert!(merged.extra().contains(&name) && merged.extra().contains(&city));
    }

    #[test]
    fn test_workload_adds_support_indexes() {
        let model = model();
        let query = timeline(&model);
        let insert = Insert::new(&model, "post", "Tweet", &["Id", "Body", "Timestamp"], &["User"]).unwrap();
        let workload = Workload::new(model.clone()).with_statement(query.clone(), 1.0).unwrap().with_statement(insert, 1.0).unwrap();

        let enumerator = IndexEnumerator::new(&model);
        let query_only = enumerator.indexes_for_query(&query);
        let all = enumerator.indexes_for_workload(&workload, false).unwrap();
        assert!(all.is_superset(&query_only));

        // Inserting a tweet reads the author's city by identity
        let user = model.entity("User").unwrap();
        let by_id = all
            .iter()
            .any(|index| index.path() == &KeyPath::single(user) && index.is_identity_keyed() && index.contains_field(user.field("City").unwrap()));
        assert!(by_id);

        let parallel = enumerator.indexes_for_workload(&workload, true).unwrap();
        assert_eq!(parallel, all);
    }
}
