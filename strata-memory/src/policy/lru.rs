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

use strata_common::code::{Key, Value};

use super::EvictionPolicy;
use crate::entry::Entry;

/// Least-recently-used eviction.
///
/// The victim is the sampled entry with the oldest access sequence. Reads and
/// writes both count as an access.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lru;

impl<K, V> EvictionPolicy<K, V> for Lru
where
    K: Key,
    V: Value,
{
    fn name(&self) -> &'static str {
        "lru"
    }

    fn prefer(&self, a: &Entry<K, V>, b: &Entry<K, V>) -> bool {
        a.last_access() < b.last_access()
    }
}
