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
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::{Error, ErrorKind, Result},
    event::EventListener,
    pool::Pool,
    size_of::{Measurable, SizeOfConfig},
};

use crate::{
    map::{Admission, BackingMap},
    metrics::Metrics,
    policy::{lru::Lru, EvictionPolicy},
    tier::OnHeapTier,
};

/// Builder for an [`OnHeapTier`].
///
/// The sizing mode is either count-based (`with_max_entries`) or pool-based
/// (`with_pool`); configuring both is a config error, configuring neither
/// leaves the tier unbounded.
pub struct CacheBuilder<K, V, S = DefaultHashBuilder>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    shards: usize,
    max_entries: Option<usize>,
    pool: Option<Pool>,
    policy: Box<dyn EvictionPolicy<K, V>>,
    size_of: SizeOfConfig,
    hash_builder: S,
    listeners: Vec<Arc<dyn EventListener<Key = K, Value = V>>>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
{
    /// Start a builder with the default shard count, LRU eviction and the
    /// default hash builder.
    pub fn new() -> Self {
        Self {
            shards: 8,
            max_entries: None,
            pool: None,
            policy: Box::new(Lru),
            size_of: SizeOfConfig::default(),
            hash_builder: DefaultHashBuilder::default(),
            listeners: Vec::new(),
        }
    }
}

impl<K, V> Default for CacheBuilder<K, V>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> CacheBuilder<K, V, S>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    /// Set the shard count of the backing map.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Bound the tier by entry count.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Bound the tier by the byte budget of `pool`.
    pub fn with_pool(mut self, pool: Pool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the eviction policy.
    pub fn with_policy(mut self, policy: impl EvictionPolicy<K, V>) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Configure the size-of engine used for pool accounting.
    pub fn with_size_of(mut self, size_of: SizeOfConfig) -> Self {
        self.size_of = size_of;
        self
    }

    /// Register a listener invoked whenever an entry leaves the tier.
    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener<Key = K, Value = V>>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Use a custom hash builder.
    pub fn with_hash_builder<S2>(self, hash_builder: S2) -> CacheBuilder<K, V, S2>
    where
        S2: HashBuilder,
    {
        CacheBuilder {
            shards: self.shards,
            max_entries: self.max_entries,
            pool: self.pool,
            policy: self.policy,
            size_of: self.size_of,
            hash_builder,
            listeners: self.listeners,
        }
    }

    /// Build the tier.
    pub fn build(self) -> Result<OnHeapTier<K, V, S>> {
        let CacheBuilder {
            shards,
            max_entries,
            pool,
            policy,
            size_of,
            hash_builder,
            listeners,
        } = self;

        let (admission, pool) = match (max_entries, pool) {
            (Some(_), Some(_)) => {
                return Err(Error::new(
                    ErrorKind::Config,
                    "count-based and pool-based sizing are mutually exclusive",
                ))
            }
            (Some(max_entries), None) => (Admission::count(max_entries), None),
            (None, Some(pool)) => (Admission::pooled(), Some(pool)),
            (None, None) => (Admission::count(usize::MAX), None),
        };

        let metrics = Arc::new(Metrics::default());
        let map = Arc::new(BackingMap::with_hash_builder(
            shards,
            admission,
            policy,
            hash_builder,
            metrics,
        )?);

        if let Some(pool) = pool {
            let accessor = pool.create_accessor(map.clone(), size_of);
            map.install_accessor(accessor);
        }
        for listener in listeners {
            map.add_listener(listener);
        }

        Ok(OnHeapTier::new(map))
    }
}

#[cfg(test)]
mod tests {
    use strata_common::pool::FromLargestParticipant;

    use super::*;
    use crate::{policy::fifo::Fifo, tier::CachingTier as _};

    #[test]
    fn test_build_defaults() {
        let tier = CacheBuilder::<u64, u64>::new().build().unwrap();
        tier.insert(1, 1).unwrap();
        assert_eq!(tier.get(&1), Some(1));
        assert_eq!(tier.policy().name(), "lru");
    }

    #[test]
    fn test_both_sizing_modes_is_a_config_error() {
        let err = CacheBuilder::<u64, u64>::new()
            .with_max_entries(10)
            .with_pool(Pool::unbounded())
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_zero_shards_is_a_config_error() {
        let err = CacheBuilder::<u64, u64>::new().with_shards(0).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_count_bound_tier() {
        let tier = CacheBuilder::<u64, u64>::new()
            .with_shards(1)
            .with_max_entries(2)
            .with_policy(Fifo)
            .build()
            .unwrap();

        tier.insert(1, 1).unwrap();
        tier.insert(2, 2).unwrap();
        tier.insert(3, 3).unwrap();
        assert_eq!(tier.len(), 2);
        assert!(!tier.contains(&1));
    }

    #[test]
    fn test_pool_bound_tier() {
        let pool = Pool::bounded(64, Arc::new(FromLargestParticipant));
        let tier = CacheBuilder::<u64, u64>::new()
            .with_shards(1)
            .with_pool(pool.clone())
            .build()
            .unwrap();

        for key in 0..8 {
            tier.insert(key, key).unwrap();
        }
        // 16 bytes per entry, four fit in the budget.
        assert_eq!(tier.len(), 4);
        assert_eq!(tier.size_in_bytes(), 64);
        assert_eq!(pool.used(), 64);

        drop(tier);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_custom_hash_builder() {
        let tier = CacheBuilder::<u64, u64>::new()
            .with_hash_builder(std::hash::RandomState::new())
            .with_max_entries(4)
            .build()
            .unwrap();
        tier.insert(1, 1).unwrap();
        assert_eq!(tier.get(&1), Some(1));
    }
}
