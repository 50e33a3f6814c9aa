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

//! Statistics
//!
//! Cardinality and selectivity estimation used by the planner. Every estimate
//! is derived from entity counts and field cardinalities declared in the
//! model; nothing here looks at data.

pub mod cardinality;

pub use cardinality::{RANGE_SELECTIVITY, estimate, filter, sample};
