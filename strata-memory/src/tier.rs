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

use std::{
    sync::{atomic::Ordering, Arc},
    thread,
};

use strata_common::{
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::{Error, ErrorKind, Result},
    event::EventListener,
    size_of::Measurable,
};

use crate::{
    entry::Fault,
    map::{BackingMap, FaultGate},
    metrics::MetricsSnapshot,
    policy::EvictionPolicy,
};

/// The computation run on a cache miss. Invoked at most once per concurrent
/// miss storm for a given key; returning `None` leaves the key absent.
pub type Loader<'a, V> = Box<dyn FnOnce() -> Result<Option<V>> + 'a>;

/// The contract one storage layer of the cache stack exposes to the rest of
/// the stack.
///
/// Lower layers (off-heap, disk) are external collaborators implementing the
/// same trait; they compose with [`crate::tiering::TieredCache`] rather than
/// extending this one.
pub trait CachingTier<K, V>: Send + Sync + 'static
where
    K: Key + Clone,
    V: Value + Clone,
{
    /// Look up `key`, running `loader` on a miss.
    ///
    /// Concurrent misses for the same key collapse into one `loader` run; the
    /// other callers block until it completes and observe the same outcome.
    /// With `update_stats` unset the lookup leaves the hit/miss counters
    /// untouched.
    fn get_or_load(&self, key: &K, loader: Loader<'_, V>, update_stats: bool) -> Result<Option<V>>;

    /// Look up `key` without loading.
    fn get(&self, key: &K) -> Option<V>;

    /// Insert a value, returning the value it replaced.
    fn insert(&self, key: K, value: V) -> Result<Option<V>>;

    /// Remove `key`, returning the materialized value it held.
    fn remove(&self, key: &K) -> Option<V>;

    /// Drop all entries unconditionally.
    fn clear(&self);

    /// Whether `key` holds a materialized value.
    fn contains(&self, key: &K) -> bool;

    /// The number of materialized entries.
    fn len(&self) -> usize;

    /// Whether the tier holds no materialized entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes committed to the pool for this tier.
    fn size_in_bytes(&self) -> usize;

    /// Re-measure an entry after an in-place value mutation.
    fn recalculate_size(&self, key: &K);

    /// Register a listener invoked whenever an entry leaves the tier.
    fn add_listener(&self, listener: Arc<dyn EventListener<Key = K, Value = V>>);

    /// The active eviction policy.
    fn policy(&self) -> Arc<Box<dyn EvictionPolicy<K, V>>>;

    /// Swap the eviction policy at runtime.
    fn set_policy(&self, policy: Box<dyn EvictionPolicy<K, V>>);
}

/// The on-heap caching tier.
///
/// Wraps a [`BackingMap`] and adds the single-flight load protocol: a miss
/// installs a fault owned by the calling thread, concurrent callers for the
/// same key block on it, and the owner swaps the fault for the materialized
/// value (or removes it) when the load settles.
///
/// Per-key state machine: absent, then faulting, then present on a non-empty
/// load or absent again on an empty or failed one.
pub struct OnHeapTier<K, V, S = DefaultHashBuilder>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    map: Arc<BackingMap<K, V, S>>,
}

impl<K, V, S> std::fmt::Debug for OnHeapTier<K, V, S>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnHeapTier").finish_non_exhaustive()
    }
}

impl<K, V, S> OnHeapTier<K, V, S>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    pub(crate) fn new(map: Arc<BackingMap<K, V, S>>) -> Self {
        Self { map }
    }

    /// Look up `key`, running `fetch` on a miss, wrapping its error type.
    pub fn get_or_fetch<F, E>(&self, key: &K, fetch: F) -> Result<Option<V>>
    where
        F: FnOnce() -> std::result::Result<Option<V>, E>,
        E: Into<anyhow::Error>,
    {
        self.get_or_load(
            key,
            Box::new(move || {
                fetch().map_err(|e| Error::new(ErrorKind::External, "loader failed").with_source(e))
            }),
            true,
        )
    }

    /// Copy the tier's operation counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.map.metrics().snapshot()
    }
}

impl<K, V, S> CachingTier<K, V> for OnHeapTier<K, V, S>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    fn get_or_load(&self, key: &K, loader: Loader<'_, V>, update_stats: bool) -> Result<Option<V>> {
        let metrics = self.map.metrics();
        let fault = Arc::new(Fault::new());

        match self.map.fault_gate(key.clone(), &fault) {
            FaultGate::Present(value) => {
                if update_stats {
                    metrics.hit.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Some(value))
            }
            FaultGate::Pending(pending) => {
                // A load for this key is already in flight. The owning thread
                // computes inline on re-entry instead of waiting on itself.
                if pending.owner() == thread::current().id() {
                    return loader();
                }
                if update_stats {
                    metrics.queue.fetch_add(1, Ordering::Relaxed);
                }
                pending.wait()
            }
            FaultGate::Installed => {
                if update_stats {
                    metrics.miss.fetch_add(1, Ordering::Relaxed);
                    metrics.load.fetch_add(1, Ordering::Relaxed);
                }

                // Run the load outside any lock, then settle the slot before
                // waking the waiters so they observe the final map state.
                let outcome = match loader() {
                    Ok(Some(value)) => match self.map.install_value(key, &fault, value.clone()) {
                        Ok(_) => Ok(Some(value)),
                        Err(e) => {
                            self.map.discard_fault(key, &fault);
                            Err(e)
                        }
                    },
                    Ok(None) => {
                        self.map.discard_fault(key, &fault);
                        Ok(None)
                    }
                    Err(e) => {
                        self.map.discard_fault(key, &fault);
                        Err(e)
                    }
                };
                fault.complete(outcome.clone());
                outcome
            }
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        let metrics = self.map.metrics();
        match self.map.get(key, true) {
            Some(value) => {
                metrics.hit.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                metrics.miss.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        self.map.put(key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key)
    }

    fn clear(&self) {
        self.map.clear();
    }

    fn contains(&self, key: &K) -> bool {
        self.map.contains(key)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn size_in_bytes(&self) -> usize {
        self.map.size_in_bytes()
    }

    fn recalculate_size(&self, key: &K) {
        self.map.recalculate_size(key);
    }

    fn add_listener(&self, listener: Arc<dyn EventListener<Key = K, Value = V>>) {
        self.map.add_listener(listener);
    }

    fn policy(&self) -> Arc<Box<dyn EvictionPolicy<K, V>>> {
        self.map.policy()
    }

    fn set_policy(&self, policy: Box<dyn EvictionPolicy<K, V>>) {
        self.map.set_policy(policy);
    }
}

impl<K, V, S> Drop for OnHeapTier<K, V, S>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    fn drop(&mut self) {
        self.map.dispose();
    }
}
