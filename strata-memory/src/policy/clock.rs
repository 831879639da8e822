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

/// Clock eviction.
///
/// Approximates LRU with lower bookkeeping cost in its classic form; over a
/// bounded sample the two collapse to the same ordering, so victim selection
/// is LRU-equivalent here.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock;

impl<K, V> EvictionPolicy<K, V> for Clock
where
    K: Key,
    V: Value,
{
    fn name(&self) -> &'static str {
        "clock"
    }

    fn prefer(&self, a: &Entry<K, V>, b: &Entry<K, V>) -> bool {
        a.last_access() < b.last_access()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::policy::{lru::Lru, test_utils::entry, EvictionPolicy as _};

    #[test]
    fn test_clock_matches_lru_ordering() {
        let a = entry(1, 1, &[30]);
        let b = entry(2, 2, &[10]);
        let c = entry(3, 3, &[20]);
        let sample = vec![a, b.clone(), c];

        let clock_victim = Clock.select(&sample, None).unwrap();
        let lru_victim = Lru.select(&sample, None).unwrap();
        assert!(Arc::ptr_eq(clock_victim, &b));
        assert!(Arc::ptr_eq(clock_victim, lru_victim));
    }
}
