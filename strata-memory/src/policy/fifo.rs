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

/// First-in-first-out eviction.
///
/// The victim is the earliest-inserted sampled entry, regardless of access
/// pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl<K, V> EvictionPolicy<K, V> for Fifo
where
    K: Key,
    V: Value,
{
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn prefer(&self, a: &Entry<K, V>, b: &Entry<K, V>) -> bool {
        a.inserted_at() < b.inserted_at()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::policy::test_utils::entry;

    #[test]
    fn test_fifo_ignores_accesses() {
        let a = entry(1, 1, &[100, 101, 102]);
        let b = entry(2, 2, &[]);
        let sample = vec![a.clone(), b];

        // `a` was heavily accessed but inserted first, so it is still the victim.
        let victim = EvictionPolicy::select(&Fifo, &sample, None).unwrap();
        assert!(Arc::ptr_eq(victim, &a));
    }
}
