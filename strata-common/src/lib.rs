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

//! Shared components for the strata cache crates.

/// Strict assertion macros.
pub mod assert;
/// Marker traits for cache keys, values and hash builders.
pub mod code;
/// The error type shared by all strata crates.
pub mod error;
/// Cache entry life-cycle events and the listener trait.
pub mod event;
/// The byte-budget pool and its per-participant accessors.
pub mod pool;
/// Scoped functional programming extensions.
pub mod scope;
/// Retained-size measurement of cached object graphs.
pub mod size_of;
