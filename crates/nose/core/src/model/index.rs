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

//! Materialized-view indexes.
//!
//! An index is keyed by a set of hash (partition) fields, clustered by an
//! ordered list of order fields and carries a payload of extra fields, all
//! laid out along a key path. Derived sizes are computed once by the
//! constructor; there is no way to change an index after it is built.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

use super::{Field, KeyPath};

/// Fraction of a partition read by a range scan in the per-index estimate
pub const RANGE_SCAN_FRACTION: f64 = 1.0 / 3.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("Invalid index: no hash fields")]
    EmptyHash,
    #[error("Invalid index: hash fields span entities {0:?}")]
    CrossEntityHash(Vec<String>),
    #[error("Invalid index: hash fields on {hash_entity} but path starts at {path_entity}")]
    HashOffPath { hash_entity: String, path_entity: String },
    #[error("Invalid index: identity of {entity} missing from key, lacks {missing:?}")]
    MissingIdentity { entity: String, missing: Vec<String> },
}

/// Serialized shape of an index; reconstruction re-runs validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub hash_fields: BTreeSet<Field>,
    pub order_fields: Vec<Field>,
    pub extra: BTreeSet<Field>,
    pub path: KeyPath,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "IndexDefinition", into = "IndexDefinition")]
pub struct Index {
    hash_fields: BTreeSet<Field>,
    order_fields: Vec<Field>,
    extra: BTreeSet<Field>,
    path: KeyPath,
    key: String,
    entry_size: u64,
    size: u64,
    hash_count: u64,
    entries: u64,
}

impl Index {
    pub fn new(
        hash_fields: impl IntoIterator<Item = Field>,
        order_fields: impl IntoIterator<Item = Field>,
        extra: impl IntoIterator<Item = Field>,
        path: KeyPath,
    ) -> Result<Self, IndexError> {
        let hash_fields: BTreeSet<Field> = hash_fields.into_iter().collect();

        // Keep the first occurrence of every order field not already hashed
        let mut order: Vec<Field> = Vec::new();
        for field in order_fields {
            if !hash_fields.contains(&field) && !order.contains(&field) {
                order.push(field);
            }
        }
        let extra: BTreeSet<Field> = extra.into_iter().filter(|field| !hash_fields.contains(field) && !order.contains(field)).collect();

        Self::validate(&hash_fields, &order, &path)?;

        let entry_size = hash_fields.iter().chain(&order).chain(&extra).map(Field::size).sum::<u64>();
        let hash_count = hash_fields.iter().fold(1u64, |count, field| count.saturating_mul(field.cardinality()));
        let size = hash_count.saturating_mul(entry_size);
        let entries = path.last().count().max(hash_count);
        let key = Self::structural_key(&hash_fields, &order, &extra, &path);

        Ok(Self {
            hash_fields,
            order_fields: order,
            extra,
            path,
            key,
            entry_size,
            size,
            hash_count,
            entries,
        })
    }

    fn validate(hash_fields: &BTreeSet<Field>, order: &[Field], path: &KeyPath) -> Result<(), IndexError> {
        let hash_entities: BTreeSet<&str> = hash_fields.iter().map(Field::parent).collect();
        let hash_entity = match hash_entities.len() {
            0 => return Err(IndexError::EmptyHash),
            1 => hash_entities.into_iter().next().unwrap_or_default(),
            _ => return Err(IndexError::CrossEntityHash(hash_entities.into_iter().map(str::to_string).collect())),
        };

        if hash_entity != path.first().entity() {
            return Err(IndexError::HashOffPath {
                hash_entity: hash_entity.to_string(),
                path_entity: path.first().entity().to_string(),
            });
        }

        // Without the terminal identity rows of the index could not be told apart
        let missing: Vec<String> = path
            .last()
            .identity()
            .iter()
            .filter(|field| !hash_fields.contains(*field) && !order.contains(*field))
            .map(Field::id)
            .collect();
        if !missing.is_empty() {
            return Err(IndexError::MissingIdentity {
                entity: path.last().entity().to_string(),
                missing,
            });
        }

        Ok(())
    }

    fn structural_key(hash_fields: &BTreeSet<Field>, order: &[Field], extra: &BTreeSet<Field>, path: &KeyPath) -> String {
        let vias: Vec<String> = path.hops().iter().map(|hop| hop.via().map(Field::id).unwrap_or_else(|| hop.entity().to_string())).collect();
        let description = format!(
            "{}|{}|{}|{}",
            join_ids(hash_fields, ","),
            join_ids(order, ","),
            join_ids(extra, ","),
            vias.join(",")
        );
        format!("i{:08x}", crc32fast::hash(description.as_bytes()))
    }

    pub fn hash_fields(&self) -> &BTreeSet<Field> {
        &self.hash_fields
    }

    pub fn order_fields(&self) -> &[Field] {
        &self.order_fields
    }

    pub fn extra(&self) -> &BTreeSet<Field> {
        &self.extra
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bytes per entry, each distinct field counted once
    pub fn entry_size(&self) -> u64 {
        self.entry_size
    }

    /// Total estimated bytes: number of partitions times entry size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of distinct partitions
    pub fn hash_count(&self) -> u64 {
        self.hash_count
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn per_hash_count(&self) -> f64 {
        (self.entries as f64 / self.hash_count as f64).max(1.0)
    }

    pub fn all_fields(&self) -> BTreeSet<Field> {
        self.hash_fields.iter().chain(&self.order_fields).chain(&self.extra).cloned().collect()
    }

    pub fn contains_field(&self, field: &Field) -> bool {
        self.hash_fields.contains(field) || self.order_fields.contains(field) || self.extra.contains(field)
    }

    /// Whether the key of this index is exactly the identity of its first entity
    pub fn is_identity_keyed(&self) -> bool {
        self.hash_fields.iter().eq(self.path.first().identity().iter())
    }

    /// Quick estimate of rows read from one partition, ignoring the plan the
    /// lookup belongs to.
    pub fn lookup_rows(&self, clustering_eq: &BTreeSet<Field>, range: bool) -> f64 {
        let mut rows = self.per_hash_count();
        for field in self.order_fields.iter().filter(|field| clustering_eq.contains(*field)) {
            rows /= field.cardinality() as f64;
        }
        if range {
            rows *= RANGE_SCAN_FRACTION;
        }
        rows.max(1.0)
    }
}

fn join_ids<'a>(fields: impl IntoIterator<Item = &'a Field>, separator: &str) -> String {
    fields.into_iter().map(Field::id).collect::<Vec<_>>().join(separator)
}

impl TryFrom<IndexDefinition> for Index {
    type Error = IndexError;

    fn try_from(definition: IndexDefinition) -> Result<Self, Self::Error> {
        Index::new(definition.hash_fields, definition.order_fields, definition.extra, definition.path)
    }
}

impl From<Index> for IndexDefinition {
    fn from(index: Index) -> Self {
        Self {
            hash_fields: index.hash_fields,
            order_fields: index.order_fields,
            extra: index.extra,
            path: index.path,
        }
    }
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.hash_fields == other.hash_fields && self.order_fields == other.order_fields && self.extra == other.extra && self.path == other.path
    }
}

impl Eq for Index {}

impl Hash for Index {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_fields.hash(state);
        self.order_fields.hash(state);
        self.extra.hash(state);
        self.path.hash(state);
    }
}

impl PartialOrd for Index {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Index {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.hash_fields.cmp(&other.hash_fields))
            .then_with(|| self.order_fields.cmp(&other.order_fields))
            .then_with(|| self.extra.cmp(&other.extra))
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}][{}] -> [{}] $ {}",
            self.key,
            join_ids(&self.hash_fields, ", "),
            join_ids(&self.order_fields, ", "),
            join_ids(&self.extra, ", "),
            self.path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, Model, Relationship};

    fn model() -> Model {
        Model::new([
            Entity::new("Foo", 100)
                .with_id("Id", 8)
                .with_field("Bar", 10, Some(10))
                .with_field("Baz", 4, Some(20))
                .with_foreign_key("Qux", "Qux", Relationship::One),
            Entity::new("Qux", 10).with_id("Id", 8).with_foreign_key("Foos", "Foo", Relationship::Many),
        ])
        .unwrap()
    }

    fn field(model: &Model, id: &str) -> Field {
        model.field(id).unwrap().clone()
    }

    #[test]
    fn test_sizes() {
        let model = model();
        let path = KeyPath::single(model.entity("Foo").unwrap());
        let index = Index::new([field(&model, "Foo.Bar")], [field(&model, "Foo.Id")], [field(&model, "Foo.Baz")], path).unwrap();

        assert_eq!(index.entry_size(), 10 + 8 + 4);
        assert_eq!(index.hash_count(), 10);
        assert_eq!(index.size(), 10 * 22);
        assert_eq!(index.per_hash_count(), 10.0);
    }

    #[test]
    fn test_no_double_counting() {
        let model = model();
        let path = KeyPath::single(model.entity("Foo").unwrap());
        let bar = field(&model, "Foo.Bar");
        let id = field(&model, "Foo.Id");
        let index = Index::new([bar.clone()], [id.clone(), bar.clone(), id.clone()], [bar, id], path).unwrap();

        assert_eq!(index.order_fields().len(), 1);
        assert!(index.extra().is_empty());
        assert_eq!(index.entry_size(), 18);
    }

    #[test]
    fn test_invalid_indexes() {
        let model = model();
        let foo = KeyPath::single(model.entity("Foo").unwrap());

        let empty = Index::new(Vec::new(), [field(&model, "Foo.Id")], Vec::new(), foo.clone());
        assert_eq!(empty.unwrap_err(), IndexError::EmptyHash);

        let cross = Index::new([field(&model, "Foo.Bar"), field(&model, "Qux.Id")], [field(&model, "Foo.Id")], Vec::new(), foo.clone());
        assert!(matches!(cross, Err(IndexError::CrossEntityHash(_))));

        let missing = Index::new([field(&model, "Foo.Bar")], Vec::new(), [field(&model, "Foo.Id")], foo);
        assert!(matches!(missing, Err(IndexError::MissingIdentity { .. })));

        let joined = KeyPath::through(&model, "Foo", &["Qux"]).unwrap();
        let off_path = Index::new([field(&model, "Qux.Id")], Vec::new(), Vec::new(), joined.clone());
        assert!(matches!(off_path, Err(IndexError::HashOffPath { .. })));

        // The terminal identity is Qux.Id, not Foo.Id
        let terminal = Index::new([field(&model, "Foo.Bar")], [field(&model, "Foo.Id")], Vec::new(), joined);
        assert!(matches!(terminal, Err(IndexError::MissingIdentity { entity, .. }) if entity == "Qux"));
    }

    #[test]
    fn test_structural_identity() {
        let model = model();
        let path = KeyPath::single(model.entity("Foo").unwrap());
        let a = Index::new([field(&model, "Foo.Id")], Vec::new(), [field(&model, "Foo.Bar")], path.clone()).unwrap();
        let b = Index::new([field(&model, "Foo.Id")], Vec::new(), [field(&model, "Foo.Bar")], path.clone()).unwrap();
        let c = Index::new([field(&model, "Foo.Id")], Vec::new(), [field(&model, "Foo.Baz")], path).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_ne!(a, c);
        assert!(a.is_identity_keyed());

        let set: BTreeSet<Index> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_lookup_rows_range_fraction() {
        let model = model();
        let path = KeyPath::single(model.entity("Foo").unwrap());
        let index = Index::new([field(&model, "Foo.Bar")], [field(&model, "Foo.Baz"), field(&model, "Foo.Id")], Vec::new(), path).unwrap();

        assert_eq!(index.lookup_rows(&BTreeSet::new(), false), 10.0);
        assert!((index.lookup_rows(&BTreeSet::new(), true) - 10.0 / 3.0).abs() < 1e-9);

        let clustering: BTreeSet<Field> = [field(&model, "Foo.Baz")].into_iter().collect();
        assert_eq!(index.lookup_rows(&clustering, false), 1.0);
    }

    #[test]
    fn test_display() {
        let model = model();
        let path = KeyPath::single(model.entity("Foo").unwrap());
        let index = Index::new([field(&model, "Foo.Id")], Vec::new(), [field(&model, "Foo.Bar")], path).unwrap();
        assert!(index.to_string().ends_with("[Foo.Id][] -> [Foo.Bar] $ Foo"));
    }
}
