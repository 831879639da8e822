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

use strata_common::{
    code::{Key, Value},
    error::{Error, ErrorKind, Result},
};

use crate::tier::{CachingTier, Loader};

/// An ordered stack of caching tiers.
///
/// A lookup tries each tier in order; a miss on one tier falls through to the
/// next, bottoming out at the caller's loader. Each tier's own single-flight
/// install promotes values from lower tiers upward on the way back, so a hot
/// key migrates toward the top of the stack on access.
pub struct TieredCache<K, V>
where
    K: Key + Clone,
    V: Value + Clone,
{
    tiers: Vec<Arc<dyn CachingTier<K, V>>>,
}

impl<K, V> std::fmt::Debug for TieredCache<K, V>
where
    K: Key + Clone,
    V: Value + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache").field("tiers", &self.tiers.len()).finish()
    }
}

impl<K, V> TieredCache<K, V>
where
    K: Key + Clone,
    V: Value + Clone,
{
    /// Compose tiers ordered from fastest to slowest.
    pub fn new(tiers: Vec<Arc<dyn CachingTier<K, V>>>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::new(ErrorKind::Config, "a tiered cache needs at least one tier"));
        }
        Ok(Self { tiers })
    }

    /// Look up `key` through the tier stack, running `loader` when every tier
    /// misses.
    pub fn get_or_load(&self, key: &K, loader: Loader<'_, V>) -> Result<Option<V>> {
        Self::descend(&self.tiers, key, loader)
    }

    fn descend(tiers: &[Arc<dyn CachingTier<K, V>>], key: &K, loader: Loader<'_, V>) -> Result<Option<V>> {
        match tiers.split_first() {
            None => loader(),
            Some((tier, rest)) => {
                tier.get_or_load(key, Box::new(move || Self::descend(rest, key, loader)), true)
            }
        }
    }

    /// Insert into the topmost tier.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        self.tiers[0].insert(key, value)
    }

    /// Remove `key` from every tier, returning the topmost removed value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut removed = None;
        for tier in self.tiers.iter() {
            let value = tier.remove(key);
            removed = removed.or(value);
        }
        removed
    }

    /// Whether any tier holds a materialized value for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.tiers.iter().any(|tier| tier.contains(key))
    }

    /// Drop all entries from every tier.
    pub fn clear(&self) {
        for tier in self.tiers.iter() {
            tier.clear();
        }
    }
}
