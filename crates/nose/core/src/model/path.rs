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
use std::fmt;

use super::{Entity, Field, Model, ModelError};

/// One entity visited by a key path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathHop {
    entity: String,
    count: u64,
    identity: Vec<Field>,
    /// Foreign key on the previous hop leading here; `None` on the first hop
    via: Option<Field>,
}

impl PathHop {
    fn new(entity: &Entity, via: Option<Field>) -> Self {
        Self {
            entity: entity.name().to_string(),
            count: entity.count(),
            identity: entity.id_fields(),
            via,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn identity(&self) -> &[Field] {
        &self.identity
    }

    pub fn via(&self) -> Option<&Field> {
        self.via.as_ref()
    }
}

/// An ordered walk over entities connected by foreign keys.
///
/// Both indexes and statements carry one. The first hop is entered by its
/// identity, every later hop through the foreign key of its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct KeyPath {
    hops: Vec<PathHop>,
}

impl<'de> Deserialize<'de> for KeyPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Hops {
            hops: Vec<PathHop>,
        }

        let Hops { hops } = Hops::deserialize(deserializer)?;
        KeyPath::validate(&hops).map_err(serde::de::Error::custom)?;
        Ok(Self { hops })
    }
}

impl KeyPath {
    /// A path needs at least one hop, and every later hop must be entered
    /// through a key from its predecessor to it
    fn validate(hops: &[PathHop]) -> Result<(), ModelError> {
        let Some(first) = hops.first() else {
            return Err(ModelError::InvalidPath("path has no hops".to_string()));
        };
        if let Some(via) = &first.via {
            return Err(ModelError::InvalidPath(format!("first hop {} entered through {via}", first.entity)));
        }

        for pair in hops.windows(2) {
            let (previous, hop) = (&pair[0], &pair[1]);
            let linked = hop.via.as_ref().is_some_and(|via| via.parent() == previous.entity && via.target() == Some(hop.entity.as_str()));
            if !linked {
                return Err(ModelError::InvalidPath(format!("no key from {} to {}", previous.entity, hop.entity)));
            }
        }
        Ok(())
    }

    /// A path over a single entity
    pub fn single(entity: &Entity) -> Self {
        Self {
            hops: vec![PathHop::new(entity, None)],
        }
    }

    /// Walks from `start` through the named foreign keys, each resolved on
    /// the entity reached so far
    pub fn through(model: &Model, start: &str, keys: &[&str]) -> Result<Self, ModelError> {
        let mut current = model.entity(start)?;
        let mut hops = vec![PathHop::new(current, None)];

        for key in keys {
            let field = current.field(key)?;
            let target = field.target().ok_or_else(|| ModelError::InvalidPath(format!("{field} is not a foreign key")))?;
            let next = model.entity(target)?;
            hops.push(PathHop::new(next, Some(field.clone())));
            current = next;
        }

        Ok(Self { hops })
    }

    pub fn hops(&self) -> &[PathHop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn first(&self) -> &PathHop {
        &self.hops[0]
    }

    pub fn last(&self) -> &PathHop {
        &self.hops[self.hops.len() - 1]
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.hops.iter().map(|hop| hop.entity.as_str())
    }

    pub fn contains_entity(&self, entity: &str) -> bool {
        self.hops.iter().any(|hop| hop.entity == entity)
    }

    pub fn position(&self, entity: &str) -> Option<usize> {
        self.hops.iter().position(|hop| hop.entity == entity)
    }

    /// Whether `prefix` walks the same entities through the same keys as the
    /// beginning of this path
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        if prefix.len() > self.len() || prefix.first().entity != self.first().entity {
            return false;
        }
        self.hops[1..prefix.len()].iter().zip(&prefix.hops[1..]).all(|(ours, theirs)| ours == theirs)
    }

    /// The hops between positions `start` and `end` inclusive, re-entered at
    /// `start` by identity
    pub fn sub_path(&self, start: usize, end: usize) -> Self {
        let mut hops = self.hops[start..=end].to_vec();
        hops[0].via = None;
        Self { hops }
    }

    /// The same walk in the opposite direction
    pub fn reverse(&self, model: &Model) -> Result<Self, ModelError> {
        let mut hops = Vec::with_capacity(self.hops.len());
        let mut previous: Option<&PathHop> = None;

        for hop in self.hops.iter().rev() {
            let via = match previous {
                // The key that led into `previous` now leads back out of it
                Some(previous) => {
                    let key = previous.via.as_ref().ok_or_else(|| ModelError::InvalidPath(format!("missing key into {}", previous.entity)))?;
                    Some(model.reverse_key(key)?.clone())
                }
                None => None,
            };
            hops.push(PathHop {
                entity: hop.entity.clone(),
                count: hop.count,
                identity: hop.identity.clone(),
                via,
            });
            previous = Some(hop);
        }

        Ok(Self { hops })
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entities: Vec<&str> = self.entities().collect();
        write!(f, "{}", entities.join("."))
    }
}
