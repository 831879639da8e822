// Copyright 2025 strata Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The on-heap caching tier for strata.
//!
//! The tier wraps a sharded backing map with pluggable, sample-based eviction
//! and single-flight loading: concurrent misses for one key collapse into a
//! single load, with all other callers blocking until it settles. Capacity is
//! bounded either by entry count or by a byte budget shared through a
//! [`strata_common::pool::Pool`].

/// Builder-style configuration surface for the on-heap tier.
pub mod builder;
/// Cache entry records and the in-flight load fault.
pub mod entry;
/// The sharded backing map.
pub mod map;
/// Per-tier operation counters.
pub mod metrics;
/// The eviction policy strategy family.
pub mod policy;
/// The on-heap tier and the tier contract.
pub mod tier;
/// Composition of tiers into an ordered stack.
pub mod tiering;

/// The commonly used exports.
pub mod prelude;
