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

use std::sync::Arc;

use strata_common::code::{Key, Value};

use crate::entry::Entry;

/// Clock eviction policy.
pub mod clock;
/// FIFO eviction policy.
pub mod fifo;
/// LFU eviction policy.
pub mod lfu;
/// LRU eviction policy.
pub mod lru;

/// Entries inspected per victim selection when the policy does not override it.
pub const DEFAULT_SAMPLE_SIZE: usize = 30;

/// Strategy that selects an eviction victim from a sample of entries.
///
/// Selection over a bounded random sample trades exactness for O(sample) cost
/// instead of ranking the whole map. Policies are stateless comparators; the
/// per-entry bookkeeping they rank by lives on [`Entry`].
pub trait EvictionPolicy<K, V>: Send + Sync + 'static
where
    K: Key,
    V: Value,
{
    /// Policy name, for diagnostics.
    fn name(&self) -> &'static str;

    /// How many entries the backing map should sample per selection.
    fn sample_size(&self) -> usize {
        DEFAULT_SAMPLE_SIZE
    }

    /// Returns true when `a` should be evicted in preference to `b`.
    fn prefer(&self, a: &Entry<K, V>, b: &Entry<K, V>) -> bool;

    /// Select the victim from `sample`, excluding the entry the current
    /// operation just added.
    ///
    /// Equal-ranking entries resolve to the first one encountered during the
    /// scan. That tie-break is a deliberate choice, not an accident of
    /// iteration: `prefer` is strict, so later equals never displace an
    /// earlier pick.
    ///
    /// When every sampled entry is the just-added one (a map of size one, or a
    /// zero capacity), the just-added entry itself is returned instead of no
    /// victim.
    fn select<'a>(
        &self,
        sample: &'a [Arc<Entry<K, V>>],
        just_added: Option<&Arc<Entry<K, V>>>,
    ) -> Option<&'a Arc<Entry<K, V>>> {
        let mut best: Option<&'a Arc<Entry<K, V>>> = None;
        for entry in sample {
            if let Some(added) = just_added {
                if Arc::ptr_eq(added, entry) {
                    continue;
                }
            }
            match best {
                None => best = Some(entry),
                Some(current) if self.prefer(entry, current) => best = Some(entry),
                Some(_) => {}
            }
        }
        best.or_else(|| {
            let added = just_added?;
            sample.iter().find(|entry| Arc::ptr_eq(added, entry))
        })
    }
}

#[cfg(test)]
mod select_tests {
    use super::*;
    use crate::policy::{lru::Lru, test_utils::entry};

    #[test]
    fn test_select_empty_sample() {
        let sample: Vec<Arc<Entry<u64, u64>>> = vec![];
        assert!(Lru.select(&sample, None).is_none());
    }

    #[test]
    fn test_select_falls_back_to_just_added() {
        let only = entry(1, 1, &[]);
        let sample = vec![only.clone()];
        let victim = Lru.select(&sample, Some(&only)).unwrap();
        assert!(Arc::ptr_eq(victim, &only));
    }
}
