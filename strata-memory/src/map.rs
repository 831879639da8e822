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
    hash::Hash,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use arc_swap::ArcSwap;
use equivalent::Equivalent;
use hashbrown::hash_table::{Entry as TableEntry, HashTable};
use parking_lot::RwLock;
use rand::Rng;
use strata_common::{
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::{Error, ErrorKind, Result},
    event::{Event, EventListener},
    pool::{PoolAccessor, PoolParticipant},
    scope::Scope,
    size_of::Measurable,
    strict_assert,
};

use crate::{
    entry::{Entry, Fault, Slot},
    metrics::Metrics,
    policy::EvictionPolicy,
};

/// How often an insert retries admission after evicting a victim before it
/// gives up with a capacity error.
pub(crate) const EVICTION_RETRIES: usize = 5;

/// How the backing map decides when to evict.
pub enum Admission {
    /// Bound by entry count. Zero evicts every insert immediately.
    Count {
        /// The maximum number of materialized entries.
        max_entries: usize,
    },
    /// Bound by a pool byte budget through a registered accessor.
    ///
    /// The accessor is installed right after construction; the map must exist
    /// first so it can be registered as the pool participant.
    Pooled {
        /// The participant's ledger into the pool.
        accessor: OnceLock<PoolAccessor>,
    },
}

impl Admission {
    /// Count-based admission.
    pub fn count(max_entries: usize) -> Self {
        Self::Count { max_entries }
    }

    /// Pool-based admission. The accessor is installed separately.
    pub fn pooled() -> Self {
        Self::Pooled {
            accessor: OnceLock::new(),
        }
    }
}

/// Outcome of installing a fault for a missing key.
pub(crate) enum FaultGate<V> {
    /// The caller's fault now occupies the slot; the caller runs the load.
    Installed,
    /// Another thread's load is in flight; the caller waits on it.
    Pending(Arc<Fault<V>>),
    /// The key is materialized.
    Present(V),
}

struct Segment<K, V> {
    table: HashTable<Arc<Entry<K, V>>>,
}

impl<K, V> Segment<K, V>
where
    K: Key,
    V: Value,
{
    fn find<Q>(&self, hash: u64, key: &Q) -> Option<&Arc<Entry<K, V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.table.find(hash, |e| key.equivalent(e.key()))
    }

    fn insert(&mut self, entry: Arc<Entry<K, V>>) -> Option<Arc<Entry<K, V>>> {
        entry.set_in_map(true);
        match self
            .table
            .entry(entry.hash(), |e| e.key() == entry.key(), |e| e.hash())
        {
            TableEntry::Occupied(mut o) => {
                let mut entry = entry;
                std::mem::swap(o.get_mut(), &mut entry);
                entry.set_in_map(false);
                Some(entry)
            }
            TableEntry::Vacant(v) => {
                v.insert(entry);
                None
            }
        }
    }

    fn remove<Q>(&mut self, hash: u64, key: &Q) -> Option<Arc<Entry<K, V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        match self.table.entry(hash, |e| key.equivalent(e.key()), |e| e.hash()) {
            TableEntry::Occupied(o) => {
                let (entry, _) = o.remove();
                entry.set_in_map(false);
                Some(entry)
            }
            TableEntry::Vacant(_) => None,
        }
    }

    /// Remove `target` iff it still occupies its slot. Guards against stale
    /// sampled references racing a concurrent remove or replace.
    fn remove_if_same(&mut self, target: &Arc<Entry<K, V>>) -> bool {
        match self
            .table
            .entry(target.hash(), |e| e.key() == target.key(), |e| e.hash())
        {
            TableEntry::Occupied(o) if Arc::ptr_eq(o.get(), target) => {
                let (entry, _) = o.remove();
                entry.set_in_map(false);
                true
            }
            _ => false,
        }
    }

    /// Swap a pending fault for its materialized value iff the slot still
    /// holds that exact fault.
    fn swap_fault(&mut self, fault: &Arc<Fault<V>>, replacement: Arc<Entry<K, V>>) -> bool {
        match self
            .table
            .entry(replacement.hash(), |e| e.key() == replacement.key(), |e| e.hash())
        {
            TableEntry::Occupied(mut o) => {
                let same = o.get().fault().is_some_and(|pending| Arc::ptr_eq(pending, fault));
                if !same {
                    return false;
                }
                replacement.set_in_map(true);
                let old = std::mem::replace(o.get_mut(), replacement);
                old.set_in_map(false);
                true
            }
            TableEntry::Vacant(_) => false,
        }
    }

    /// Remove the entry for `key` iff its slot holds this exact fault.
    fn remove_fault(&mut self, hash: u64, key: &K, fault: &Arc<Fault<V>>) -> bool {
        match self.table.entry(hash, |e| e.key() == key, |e| e.hash()) {
            TableEntry::Occupied(o) => {
                let same = o.get().fault().is_some_and(|pending| Arc::ptr_eq(pending, fault));
                if !same {
                    return false;
                }
                let (entry, _) = o.remove();
                entry.set_in_map(false);
                true
            }
            TableEntry::Vacant(_) => false,
        }
    }
}

/// The sharded key-to-entry store backing the on-heap tier.
///
/// Mutations take per-segment locks only; cross-segment totals are atomics, so
/// unrelated keys never serialize on each other.
pub struct BackingMap<K, V, S = DefaultHashBuilder>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    segments: Vec<RwLock<Segment<K, V>>>,
    hash_builder: S,

    admission: Admission,
    policy: ArcSwap<Box<dyn EvictionPolicy<K, V>>>,

    /// Materialized entries only; pending faults are not counted.
    len: AtomicUsize,
    /// Logical clock driving insertion and access sequences.
    clock: AtomicU64,

    listeners: RwLock<Vec<Arc<dyn EventListener<Key = K, Value = V>>>>,
    metrics: Arc<Metrics>,
}

impl<K, V> BackingMap<K, V>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
{
    /// Create a map with the default hash builder.
    pub fn new(
        shards: usize,
        admission: Admission,
        policy: Box<dyn EvictionPolicy<K, V>>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        Self::with_hash_builder(shards, admission, policy, DefaultHashBuilder::default(), metrics)
    }
}

impl<K, V, S> BackingMap<K, V, S>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    /// Create a map with a custom hash builder.
    pub fn with_hash_builder(
        shards: usize,
        admission: Admission,
        policy: Box<dyn EvictionPolicy<K, V>>,
        hash_builder: S,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        if shards == 0 {
            return Err(Error::new(ErrorKind::Config, "shards must be greater than zero"));
        }
        let segments = (0..shards)
            .map(|_| {
                RwLock::new(Segment {
                    table: HashTable::new(),
                })
            })
            .collect();
        Ok(Self {
            segments,
            hash_builder,
            admission,
            policy: ArcSwap::new(Arc::new(policy)),
            len: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            metrics,
        })
    }

    pub(crate) fn install_accessor(&self, accessor: PoolAccessor) {
        if let Admission::Pooled { accessor: slot } = &self.admission {
            let _ = slot.set(accessor);
        }
    }

    fn shard(&self, hash: u64) -> usize {
        hash as usize % self.segments.len()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn accessor(&self) -> Option<&PoolAccessor> {
        match &self.admission {
            Admission::Pooled { accessor } => accessor.get(),
            Admission::Count { .. } => None,
        }
    }

    /// Look up a materialized value.
    ///
    /// With `touch` set, the entry's policy metadata is bumped, reads counting
    /// as accesses.
    pub fn get<Q>(&self, key: &Q, touch: bool) -> Option<V>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        let sequence = if touch { self.tick() } else { 0 };
        self.segments[self.shard(hash)].read().with(|seg| {
            let entry = seg.find(hash, key)?;
            let value = entry.value()?.clone();
            if touch {
                entry.touch(sequence);
            }
            Some(value)
        })
    }

    /// Whether a materialized value exists for `key`. Pending faults do not
    /// count as present.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        self.segments[self.shard(hash)]
            .read()
            .with(|seg| seg.find(hash, key).is_some_and(|entry| entry.value().is_some()))
    }

    /// The number of materialized entries.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    /// Whether the map holds no materialized entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes committed to the pool for this map. Count-based maps carry no
    /// size engine and report zero.
    pub fn size_in_bytes(&self) -> usize {
        self.accessor().map(|accessor| accessor.size()).unwrap_or(0)
    }

    /// Snapshot the keys of the materialized entries.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        for segment in self.segments.iter() {
            segment.read().with(|seg| {
                for entry in seg.table.iter() {
                    if entry.value().is_some() {
                        keys.push(entry.key().clone());
                    }
                }
            });
        }
        keys
    }

    /// Insert a value, returning the value it replaced.
    ///
    /// In pooled mode the insert is admitted against the byte budget first,
    /// evicting victims and retrying a bounded number of times; once the
    /// retries are exhausted the insert fails with a capacity error and the
    /// map is unchanged.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>> {
        let bytes = self.admit(&key, &value)?;
        let hash = self.hash_builder.hash_one(&key);
        let sequence = self.tick();
        let entry = Arc::new(Entry::new(key, Slot::Value(value), hash, bytes, sequence));

        let old = self.segments[self.shard(hash)]
            .write()
            .with(|mut seg| seg.insert(entry.clone()));

        let mut replaced = None;
        match old {
            None => {
                self.len.fetch_add(1, Ordering::SeqCst);
                self.metrics.insert.fetch_add(1, Ordering::Relaxed);
            }
            Some(old) => match old.value() {
                Some(value) => {
                    self.release_bytes(&old);
                    self.metrics.replace.fetch_add(1, Ordering::Relaxed);
                    self.notify(Event::Replace, old.key(), value);
                    replaced = Some(value.clone());
                }
                None => {
                    // Displaced a pending fault. Its owner still completes the
                    // waiters; only the slot is gone.
                    self.len.fetch_add(1, Ordering::SeqCst);
                    self.metrics.insert.fetch_add(1, Ordering::Relaxed);
                }
            },
        }

        self.enforce_count(&entry);
        Ok(replaced)
    }

    /// Insert a value unless the key already holds one, returning the existing
    /// value if so. A slot with an in-flight load is left untouched.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        enum Outcome<V> {
            Inserted,
            Existing(V),
            Loading,
        }

        let bytes = self.admit(&key, &value)?;
        let hash = self.hash_builder.hash_one(&key);
        let sequence = self.tick();
        let entry = Arc::new(Entry::new(key, Slot::Value(value), hash, bytes, sequence));

        let outcome = self.segments[self.shard(hash)].write().with(|mut seg| {
            match seg
                .table
                .entry(hash, |e| e.key() == entry.key(), |e| e.hash())
            {
                TableEntry::Occupied(o) => match o.get().value() {
                    Some(existing) => Outcome::Existing(existing.clone()),
                    None => Outcome::Loading,
                },
                TableEntry::Vacant(v) => {
                    entry.set_in_map(true);
                    v.insert(entry.clone());
                    Outcome::Inserted
                }
            }
        });

        match outcome {
            Outcome::Inserted => {
                self.len.fetch_add(1, Ordering::SeqCst);
                self.metrics.insert.fetch_add(1, Ordering::Relaxed);
                self.enforce_count(&entry);
                Ok(None)
            }
            Outcome::Existing(existing) => {
                self.release_bytes(&entry);
                Ok(Some(existing))
            }
            Outcome::Loading => {
                self.release_bytes(&entry);
                Ok(None)
            }
        }
    }

    /// Replace the value for a key only if it currently holds a materialized
    /// value, returning the value it replaced. A slot with an in-flight load
    /// is left untouched.
    ///
    /// The accounting delta is forced through the accessor: replace-in-place
    /// must not fail, even when the pool is over budget.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        let hash = self.hash_builder.hash_one(&key);
        let sequence = self.tick();
        let old = self.segments[self.shard(hash)].write().with(|mut seg| {
            let current = seg.find(hash, &key)?;
            current.value()?;
            let bytes = self
                .accessor()
                .and_then(|accessor| accessor.replace(current.bytes(), &key, &value, None, true))
                .unwrap_or(0);
            let entry = Arc::new(Entry::new(key, Slot::Value(value), hash, bytes, sequence));
            seg.insert(entry)
        })?;

        let value = old.value()?;
        self.metrics.replace.fetch_add(1, Ordering::Relaxed);
        self.notify(Event::Replace, old.key(), value);
        Some(value.clone())
    }

    /// Remove a key, returning the materialized value it held. A pending fault
    /// is discarded silently; its owner still completes the waiters.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        let removed = self.segments[self.shard(hash)]
            .write()
            .with(|mut seg| seg.remove(hash, key))?;

        let value = removed.value()?;
        self.len.fetch_sub(1, Ordering::SeqCst);
        self.release_bytes(&removed);
        self.metrics.remove.fetch_add(1, Ordering::Relaxed);
        self.notify(Event::Remove, removed.key(), value);
        Some(value.clone())
    }

    /// Drop every entry unconditionally.
    pub fn clear(&self) {
        let mut garbage = Vec::new();
        for segment in self.segments.iter() {
            segment.write().with(|mut seg| {
                for entry in seg.table.drain() {
                    entry.set_in_map(false);
                    garbage.push(entry);
                }
            });
        }

        // Deallocate and notify out of the lock critical sections.
        let mut removed = 0;
        for entry in garbage {
            if let Some(value) = entry.value() {
                removed += 1;
                self.len.fetch_sub(1, Ordering::SeqCst);
                self.release_bytes(&entry);
                self.notify(Event::Clear, entry.key(), value);
            }
        }
        self.metrics.remove.fetch_add(removed, Ordering::Relaxed);
    }

    /// Re-measure an entry after an in-place value mutation and reconcile the
    /// pool accounting. A no-op on count-based maps.
    pub fn recalculate_size<Q>(&self, key: &Q)
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let Some(accessor) = self.accessor() else {
            return;
        };
        let hash = self.hash_builder.hash_one(key);
        let entry = self.segments[self.shard(hash)]
            .read()
            .with(|seg| seg.find(hash, key).cloned());
        let Some(entry) = entry else {
            return;
        };
        let Some(value) = entry.value() else {
            return;
        };
        // Forced: the mutation already happened, the ledger has to follow.
        if let Some(bytes) = accessor.replace(entry.bytes(), entry.key(), value, None, true) {
            entry.set_bytes(bytes);
        }
    }

    /// Collect up to `n` materialized entries, scanning segments from a random
    /// offset with wrap-around.
    ///
    /// When `n` covers the whole map every entry is visited; larger maps are
    /// under-sampled by design, matching the bounded-sample eviction cost
    /// model.
    pub fn sample(&self, n: usize) -> Vec<Arc<Entry<K, V>>> {
        let mut out = Vec::new();
        if n == 0 {
            return out;
        }
        let mut rng = rand::rng();
        let shards = self.segments.len();
        let start = rng.random_range(0..shards);
        for i in 0..shards {
            let segment = self.segments[(start + i) % shards].read();
            let len = segment.table.len();
            if len == 0 {
                continue;
            }
            let skip = rng.random_range(0..len);
            for entry in segment.table.iter().skip(skip) {
                if entry.value().is_some() {
                    out.push(entry.clone());
                    if out.len() >= n {
                        return out;
                    }
                }
            }
            for entry in segment.table.iter().take(skip) {
                if entry.value().is_some() {
                    out.push(entry.clone());
                    if out.len() >= n {
                        return out;
                    }
                }
            }
        }
        out
    }

    /// The active eviction policy.
    pub fn policy(&self) -> Arc<Box<dyn EvictionPolicy<K, V>>> {
        self.policy.load_full()
    }

    /// Swap the eviction policy at runtime.
    pub fn set_policy(&self, policy: Box<dyn EvictionPolicy<K, V>>) {
        self.policy.store(Arc::new(policy));
    }

    /// Register a listener for entries leaving the map.
    pub fn add_listener(&self, listener: Arc<dyn EventListener<Key = K, Value = V>>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Clear the map and unregister from the pool.
    pub fn dispose(&self) {
        self.clear();
        if let Some(accessor) = self.accessor() {
            accessor.unregister();
        }
    }

    /// Install a fault for `key` unless the key is materialized or already
    /// loading. Fault entries carry no accounted bytes and are invisible to
    /// sampling.
    pub(crate) fn fault_gate(&self, key: K, fault: &Arc<Fault<V>>) -> FaultGate<V> {
        let hash = self.hash_builder.hash_one(&key);
        let sequence = self.tick();
        self.segments[self.shard(hash)].write().with(|mut seg| {
            match seg.table.entry(hash, |e| e.key() == &key, |e| e.hash()) {
                TableEntry::Occupied(o) => match o.get().value() {
                    Some(value) => {
                        o.get().touch(sequence);
                        FaultGate::Present(value.clone())
                    }
                    None => match o.get().fault() {
                        Some(pending) => FaultGate::Pending(pending.clone()),
                        None => unreachable!(),
                    },
                },
                TableEntry::Vacant(v) => {
                    let entry = Arc::new(Entry::new(key, Slot::Fault(fault.clone()), hash, 0, sequence));
                    entry.set_in_map(true);
                    v.insert(entry);
                    FaultGate::Installed
                }
            }
        })
    }

    /// Swap `fault` for its materialized value.
    ///
    /// Returns false when the fault no longer occupies the slot (removed or
    /// displaced); the caller still publishes the value to the waiters.
    pub(crate) fn install_value(&self, key: &K, fault: &Arc<Fault<V>>, value: V) -> Result<bool> {
        let bytes = self.admit(key, &value)?;
        let hash = self.hash_builder.hash_one(key);
        let sequence = self.tick();
        let entry = Arc::new(Entry::new(key.clone(), Slot::Value(value), hash, bytes, sequence));

        let swapped = self.segments[self.shard(hash)]
            .write()
            .with(|mut seg| seg.swap_fault(fault, entry.clone()));

        if swapped {
            strict_assert!(entry.is_in_map());
            self.len.fetch_add(1, Ordering::SeqCst);
            self.metrics.insert.fetch_add(1, Ordering::Relaxed);
            self.enforce_count(&entry);
            Ok(true)
        } else {
            self.release_bytes(&entry);
            Ok(false)
        }
    }

    /// Drop `fault` from the map after a failed or empty load.
    pub(crate) fn discard_fault(&self, key: &K, fault: &Arc<Fault<V>>) {
        let hash = self.hash_builder.hash_one(key);
        self.segments[self.shard(hash)]
            .write()
            .with(|mut seg| seg.remove_fault(hash, key, fault));
    }

    /// Admit `key`/`value` against the pool budget, evicting and retrying a
    /// bounded number of times. Count-based maps admit everything here and
    /// enforce their limit after insertion.
    fn admit(&self, key: &K, value: &V) -> Result<usize> {
        let Some(accessor) = self.accessor() else {
            return Ok(0);
        };
        for attempt in 0..=EVICTION_RETRIES {
            if let Some(bytes) = accessor.add(key, value, None, false) {
                return Ok(bytes);
            }
            if attempt == EVICTION_RETRIES || self.evict_one(None).is_none() {
                break;
            }
        }
        tracing::warn!(
            used = accessor.pool_used(),
            "insert rejected by pool admission after eviction retries"
        );
        Err(Error::capacity(
            accessor.pool_capacity().unwrap_or(usize::MAX),
            accessor.pool_used(),
        ))
    }

    fn enforce_count(&self, just_added: &Arc<Entry<K, V>>) {
        let Admission::Count { max_entries } = &self.admission else {
            return;
        };
        for _ in 0..=EVICTION_RETRIES {
            if self.len.load(Ordering::SeqCst) <= *max_entries {
                break;
            }
            if self.evict_one(Some(just_added)).is_none() {
                break;
            }
        }
    }

    /// Evict one victim chosen by the policy over a fresh sample.
    ///
    /// The entry the current operation just added is excluded unless it is the
    /// only candidate.
    fn evict_one(&self, just_added: Option<&Arc<Entry<K, V>>>) -> Option<Arc<Entry<K, V>>> {
        let policy = self.policy.load();
        let sample = self.sample(policy.sample_size());
        let victim = policy.select(&sample, just_added)?.clone();

        let removed = self.segments[self.shard(victim.hash())]
            .write()
            .with(|mut seg| seg.remove_if_same(&victim));
        if !removed {
            return None;
        }
        strict_assert!(!victim.is_in_map());

        self.len.fetch_sub(1, Ordering::SeqCst);
        self.release_bytes(&victim);
        self.metrics.evict.fetch_add(1, Ordering::Relaxed);
        if let Some(value) = victim.value() {
            tracing::trace!(hash = victim.hash(), policy = policy.name(), "evicted entry");
            self.notify(Event::Evict, victim.key(), value);
        }
        Some(victim)
    }

    fn release_bytes(&self, entry: &Arc<Entry<K, V>>) {
        if let Some(accessor) = self.accessor() {
            accessor.delete(entry.bytes());
        }
    }

    fn notify(&self, event: Event, key: &K, value: &V) {
        for listener in self.listeners.read().iter() {
            listener.on_leave(event, key, value);
        }
    }
}

impl<K, V, S> PoolParticipant for BackingMap<K, V, S>
where
    K: Key + Measurable + Clone,
    V: Value + Measurable + Clone,
    S: HashBuilder,
{
    fn evict(&self, bytes: usize) -> usize {
        let mut freed = 0;
        while freed < bytes {
            match self.evict_one(None) {
                Some(victim) => freed += victim.bytes(),
                None => break,
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use strata_common::{
        pool::{FromLargestParticipant, Pool},
        size_of::SizeOfConfig,
    };

    use super::*;
    use crate::policy::{fifo::Fifo, lru::Lru};

    fn count_map(max_entries: usize, policy: Box<dyn EvictionPolicy<u64, u64>>) -> BackingMap<u64, u64> {
        BackingMap::new(1, Admission::count(max_entries), policy, Arc::new(Metrics::default())).unwrap()
    }

    fn pooled_map(capacity: usize) -> (Arc<BackingMap<u64, u64>>, Pool) {
        let pool = Pool::bounded(capacity, Arc::new(FromLargestParticipant));
        let map = Arc::new(
            BackingMap::new(
                1,
                Admission::pooled(),
                Box::new(Lru),
                Arc::new(Metrics::default()),
            )
            .unwrap(),
        );
        let accessor = pool.create_accessor(map.clone(), SizeOfConfig::default());
        map.install_accessor(accessor);
        (map, pool)
    }

    #[test]
    fn test_put_get_remove() {
        let map = count_map(16, Box::new(Lru));

        assert_eq!(map.put(1, 100).unwrap(), None);
        assert_eq!(map.get(&1, true), Some(100));
        assert!(map.contains(&1));
        assert_eq!(map.len(), 1);

        assert_eq!(map.put(1, 200).unwrap(), Some(100));
        assert_eq!(map.get(&1, true), Some(200));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove(&1), Some(200));
        assert!(!map.contains(&1));
        assert!(map.is_empty());
        assert_eq!(map.remove(&1), None);
    }

    #[test]
    fn test_put_if_absent() {
        let map = count_map(16, Box::new(Lru));

        assert_eq!(map.put_if_absent(1, 100).unwrap(), None);
        assert_eq!(map.put_if_absent(1, 200).unwrap(), Some(100));
        assert_eq!(map.get(&1, false), Some(100));
    }

    #[test]
    fn test_replace_only_when_present() {
        let map = count_map(16, Box::new(Lru));

        assert_eq!(map.replace(1, 100), None);
        assert!(!map.contains(&1));

        map.put(1, 100).unwrap();
        assert_eq!(map.replace(1, 200), Some(100));
        assert_eq!(map.get(&1, false), Some(200));
        assert_eq!(map.len(), 1);
        assert_eq!(map.metrics().snapshot().replace, 1);
    }

    #[test]
    fn test_replace_bypasses_admission_on_full_pool() {
        let pool = Pool::bounded(48, Arc::new(FromLargestParticipant));
        let map = Arc::new(
            BackingMap::<u64, String>::new(
                1,
                Admission::pooled(),
                Box::new(Lru),
                Arc::new(Metrics::default()),
            )
            .unwrap(),
        );
        let accessor = pool.create_accessor(map.clone(), SizeOfConfig::default());
        map.install_accessor(accessor);

        map.put(1, String::new()).unwrap();
        let before = pool.used();

        // Growing the value in place must not fail, even though the new size
        // exceeds the pool budget outright.
        let replaced = map.replace(1, "x".repeat(100));
        assert_eq!(replaced, Some(String::new()));
        assert!(pool.used() > 48);
        assert!(pool.used() >= before + 100);
        assert_eq!(pool.used(), map.size_in_bytes());
    }

    #[test]
    fn test_fifo_count_eviction() {
        let map = count_map(2, Box::new(Fifo));

        map.put(1, 1).unwrap();
        map.put(2, 2).unwrap();
        map.put(3, 3).unwrap();

        assert!(!map.contains(&1));
        assert!(map.contains(&2));
        assert!(map.contains(&3));
        assert_eq!(map.len(), 2);
        assert_eq!(map.metrics().snapshot().evict, 1);
    }

    #[test]
    fn test_eviction_excludes_just_added() {
        use crate::policy::lfu::Lfu;

        let map = count_map(1, Box::new(Lfu::default()));

        map.put(1, 1).unwrap();
        map.get(&1, true);
        map.get(&1, true);
        map.put(2, 2).unwrap();

        // Entry 2 has fewer hits and would be the LFU victim, but the entry
        // just added by the triggering put is never chosen.
        assert!(map.contains(&2));
        assert!(!map.contains(&1));
    }

    #[test]
    fn test_zero_capacity_evicts_incoming() {
        let map = count_map(0, Box::new(Lru));

        map.put(1, 1).unwrap();
        assert!(!map.contains(&1));
        assert!(map.is_empty());
        assert_eq!(map.metrics().snapshot().evict, 1);
    }

    #[test]
    fn test_clear_notifies_listeners() {
        use std::sync::Mutex as StdMutex;

        struct Recorder {
            events: StdMutex<Vec<(Event, u64)>>,
        }

        impl EventListener for Recorder {
            type Key = u64;
            type Value = u64;

            fn on_leave(&self, event: Event, key: &u64, _: &u64) {
                self.events.lock().unwrap().push((event, *key));
            }
        }

        let map = count_map(2, Box::new(Fifo));
        let recorder = Arc::new(Recorder {
            events: StdMutex::new(Vec::new()),
        });
        map.add_listener(recorder.clone());

        map.put(1, 1).unwrap();
        map.put(2, 2).unwrap();
        map.put(3, 3).unwrap();
        map.remove(&2);
        map.clear();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events[0], (Event::Evict, 1));
        assert_eq!(events[1], (Event::Remove, 2));
        assert_eq!(events[2], (Event::Clear, 3));
    }

    #[test]
    fn test_pooled_eviction_under_pressure() {
        // u64 key + u64 value = 16 bytes per entry, three fit.
        let (map, pool) = pooled_map(48);

        map.put(1, 1).unwrap();
        map.put(2, 2).unwrap();
        map.put(3, 3).unwrap();
        assert_eq!(pool.used(), 48);
        assert_eq!(map.len(), 3);

        map.put(4, 4).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(pool.used(), 48);
        assert!(map.contains(&4));
    }

    #[test]
    fn test_pooled_rejection_surfaces_capacity_error() {
        // One entry can never fit, and there is nothing to evict.
        let (map, _pool) = pooled_map(10);

        let err = map.put(1, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert!(map.is_empty());
        assert_eq!(map.size_in_bytes(), 0);
    }

    #[test]
    fn test_pool_accounting_invariant() {
        let (map, pool) = pooled_map(1024);

        for key in 0..16 {
            map.put(key, key).unwrap();
        }
        assert_eq!(map.size_in_bytes(), 16 * 16);
        assert_eq!(pool.used(), 16 * 16);

        for key in 0..8 {
            map.remove(&key);
        }
        assert_eq!(map.size_in_bytes(), 8 * 16);
        assert_eq!(pool.used(), 8 * 16);

        map.clear();
        assert_eq!(map.size_in_bytes(), 0);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_recalculate_size_reconciles_growth() {
        use parking_lot::Mutex;

        let pool = Pool::bounded(4096, Arc::new(FromLargestParticipant));
        let map = Arc::new(
            BackingMap::<u64, Arc<Mutex<String>>>::new(
                1,
                Admission::pooled(),
                Box::new(Lru),
                Arc::new(Metrics::default()),
            )
            .unwrap(),
        );
        let accessor = pool.create_accessor(map.clone(), SizeOfConfig::default());
        map.install_accessor(accessor);

        map.put(1, Arc::new(Mutex::new(String::new()))).unwrap();
        let before = map.size_in_bytes();

        let value = map.get(&1, false).unwrap();
        value.lock().push_str(&"x".repeat(100));

        map.recalculate_size(&1);
        assert!(map.size_in_bytes() >= before + 100);
        assert_eq!(map.size_in_bytes(), pool.used());
    }

    #[test]
    fn test_participant_evict_frees_bytes() {
        let (map, pool) = pooled_map(1024);
        for key in 0..8 {
            map.put(key, key).unwrap();
        }

        let freed = PoolParticipant::evict(map.as_ref(), 32);
        assert!(freed >= 32);
        assert_eq!(map.len(), 8 - freed / 16);
        assert_eq!(pool.used(), map.size_in_bytes());
    }

    #[test]
    fn test_sample_covers_small_maps() {
        let map = count_map(16, Box::new(Lru));
        for key in 0..4 {
            map.put(key, key).unwrap();
        }
        for _ in 0..32 {
            let sample = map.sample(30);
            assert_eq!(sample.len(), 4);
        }
    }

    #[test]
    fn test_set_policy_swaps_at_runtime() {
        let map = count_map(16, Box::new(Lru));
        assert_eq!(map.policy().name(), "lru");
        map.set_policy(Box::new(Fifo));
        assert_eq!(map.policy().name(), "fifo");
    }
}
