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

use std::collections::BTreeSet;

use crate::model::{Field, KeyPath, Relationship};

/// Selectivity applied for a single range predicate
pub const RANGE_SELECTIVITY: f64 = 0.1;

/// Applies equality and range selectivity to a cardinality.
///
/// Each equality field divides by its cardinality, a range predicate keeps a
/// fixed fraction. The result never drops below one row.
pub fn filter<'a>(cardinality: f64, eq_filter: impl IntoIterator<Item = &'a Field>, range: bool) -> f64 {
    let mut filtered = if range { cardinality * RANGE_SELECTIVITY } else { cardinality };
    for field in eq_filter {
        filtered /= field.cardinality() as f64;
    }
    filtered.max(1.0)
}

/// Expected number of distinct values when drawing `draws` times with
/// replacement from `population` values
pub fn sample(population: f64, draws: f64) -> f64 {
    if population <= 1.0 {
        return 1.0;
    }
    population * (1.0 - (1.0 - 1.0 / population).powf(draws))
}

/// Estimates the rows reached after walking `path` from `start` rows of its
/// first entity while applying the bound predicates of every entity passed.
pub fn estimate(start: f64, path: &KeyPath, eq_filter: &BTreeSet<Field>, range_filter: Option<&Field>) -> f64 {
    let mut cardinality = start.max(1.0);
    let mut previous: Option<u64> = None;

    for hop in path.hops() {
        if let (Some(previous_count), Some(key)) = (previous, hop.via()) {
            cardinality = match key.relationship() {
                Some(Relationship::Many) => cardinality * hop.count() as f64 / previous_count as f64,
                _ => sample(hop.count() as f64, cardinality),
            };
        }

        let entity_eq = eq_filter.iter().filter(|field| field.parent() == hop.entity());
        let entity_range = range_filter.is_some_and(|field| field.parent() == hop.entity());
        cardinality = filter(cardinality, entity_eq, entity_range);
        previous = Some(hop.count());
    }

    cardinality.max(1.0)
}
