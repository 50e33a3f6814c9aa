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
use std::collections::BTreeMap;
use std::fmt;

use super::ModelError;

/// Default byte size of an identity field when none is given
pub const DEFAULT_ID_SIZE: u64 = 16;

/// Multiplicity of a foreign key as seen from its owning entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relationship {
    /// Each row of the owner references exactly one target row
    One,
    /// Each row of the owner is referenced by many target rows
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldKind {
    Scalar,
    ForeignKey { target: String, relationship: Relationship },
}

/// A single attribute of an entity.
///
/// Fields order and compare by owning entity first and then by name, so sets of
/// fields iterate deterministically. Cardinality is resolved when the field is
/// attached to an entity and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Field {
    parent: String,
    name: String,
    size: u64,
    cardinality: u64,
    primary_key: bool,
    kind: FieldKind,
}

impl Field {
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified `Entity.Field` identifier
    pub fn id(&self) -> String {
        format!("{}.{}", self.parent, self.name)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn cardinality(&self) -> u64 {
        self.cardinality
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, FieldKind::ForeignKey { .. })
    }

    /// Target entity of a foreign key
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ForeignKey { target, .. } => Some(target),
            FieldKind::Scalar => None,
        }
    }

    pub fn relationship(&self) -> Option<Relationship> {
        match &self.kind {
            FieldKind::ForeignKey { relationship, .. } => Some(*relationship),
            FieldKind::Scalar => None,
        }
    }

    /// Whether this is a foreign key whose values are identities of `entity`
    pub fn references(&self, entity: &str) -> bool {
        self.target() == Some(entity)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.parent, self.name)
    }
}

/// A conceptual entity with its fields and estimated row count
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    name: String,
    fields: BTreeMap<String, Field>,
    count: u64,
}

impl Entity {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            count: count.max(1),
        }
    }

    /// Adds an identity field. Identity cardinality is always the entity count.
    pub fn with_id(self, name: impl Into<String>, size: u64) -> Self {
        let count = self.count;
        self.attach(name.into(), size, count, true, FieldKind::Scalar)
    }

    /// Adds a plain attribute; cardinality falls back to the entity count
    pub fn with_field(self, name: impl Into<String>, size: u64, cardinality: Option<u64>) -> Self {
        let cardinality = cardinality.unwrap_or(self.count);
        self.attach(name.into(), size, cardinality, false, FieldKind::Scalar)
    }

    /// Adds a foreign key. Size and cardinality are resolved against the
    /// target entity when the model is assembled.
    pub fn with_foreign_key(self, name: impl Into<String>, target: impl Into<String>, relationship: Relationship) -> Self {
        let count = self.count;
        let kind = FieldKind::ForeignKey {
            target: target.into(),
            relationship,
        };
        self.attach(name.into(), DEFAULT_ID_SIZE, count, false, kind)
    }

    fn attach(mut self, name: String, size: u64, cardinality: u64, primary_key: bool, kind: FieldKind) -> Self {
        let field = Field {
            parent: self.name.clone(),
            name: name.clone(),
            size,
            cardinality: cardinality.max(1),
            primary_key,
            kind,
        };
        self.fields.insert(name, field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Result<&Field, ModelError> {
        self.fields.get(name).ok_or_else(|| ModelError::UnknownField(format!("{}.{}", self.name, name)))
    }

    /// Primary key fields, in name order
    pub fn id_fields(&self) -> Vec<Field> {
        self.fields.values().filter(|field| field.primary_key).cloned().collect()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|field| field.is_foreign_key())
    }

    /// First foreign key of this entity pointing at `target`
    pub fn foreign_key_to(&self, target: &str) -> Option<&Field> {
        self.foreign_keys().find(|field| field.references(target))
    }

    fn resolve_foreign_key(&mut self, name: &str, size: u64, cardinality: u64) {
        if let Some(field) = self.fields.get_mut(name) {
            field.size = size;
            field.cardinality = cardinality.max(1);
        }
    }
}

/// The conceptual schema: a closed set of entities whose foreign keys all
/// resolve. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Model {
    entities: BTreeMap<String, Entity>,
}

/// Loaded models go through `Model::new`, so identities and foreign keys
/// are checked and resolved again
impl<'de> Deserialize<'de> for Model {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Entities {
            entities: BTreeMap<String, Entity>,
        }

        let Entities { entities } = Entities::deserialize(deserializer)?;
        Model::new(entities.into_values()).map_err(serde::de::Error::custom)
    }
}

impl Model {
    pub fn new(entities: impl IntoIterator<Item = Entity>) -> Result<Self, ModelError> {
        let mut entities: BTreeMap<String, Entity> = entities.into_iter().map(|entity| (entity.name.clone(), entity)).collect();

        for entity in entities.values() {
            if entity.id_fields().is_empty() {
                return Err(ModelError::MissingIdentity(entity.name.clone()));
            }
        }

        // Foreign keys take the identity size and row count of their target
        let mut resolutions = Vec::new();
        for entity in entities.values() {
            for key in entity.foreign_keys() {
                let target_name = key.target().unwrap_or_default();
                let target = entities.get(target_name).ok_or_else(|| ModelError::DanglingForeignKey {
                    key: key.id(),
                    target: target_name.to_string(),
                })?;
                let id_size = target.id_fields().iter().map(Field::size).sum();
                resolutions.push((entity.name.clone(), key.name.clone(), id_size, target.count));
            }
        }
        for (entity, key, size, cardinality) in resolutions {
            if let Some(entity) = entities.get_mut(&entity) {
                entity.resolve_foreign_key(&key, size, cardinality);
            }
        }

        Ok(Self { entities })
    }

    pub fn entity(&self, name: &str) -> Result<&Entity, ModelError> {
        self.entities.get(name).ok_or_else(|| ModelError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Resolves an `Entity.Field` identifier
    pub fn field(&self, id: &str) -> Result<&Field, ModelError> {
        let (entity, field) = id.split_once('.').ok_or_else(|| ModelError::UnknownField(id.to_string()))?;
        self.entity(entity)?.field(field)
    }

    /// The foreign key traversing `key` in the opposite direction
    pub fn reverse_key(&self, key: &Field) -> Result<&Field, ModelError> {
        let target = key.target().ok_or_else(|| ModelError::InvalidPath(format!("{key} is not a foreign key")))?;
        self.entity(target)?
            .foreign_key_to(key.parent())
            .ok_or_else(|| ModelError::NoReverseKey(key.id()))
    }
}
