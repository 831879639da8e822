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

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;

use crate::{
    size_of::{Measurable, SizeOfConfig, SizeOfEngine},
    strict_assert,
};

/// A caching tier structure that participates in a pool's byte budget.
///
/// Participants are asked to free space when the pool is over budget.
pub trait PoolParticipant: Send + Sync + 'static {
    /// Try to free roughly `bytes` from this participant.
    ///
    /// Returns the bytes actually freed; zero means no further progress is
    /// possible.
    fn evict(&self, bytes: usize) -> usize;
}

/// A participant eligible for pool-driven eviction, with its current footprint.
pub struct Candidate {
    /// The participant to evict from.
    pub participant: Arc<dyn PoolParticipant>,
    /// The participant's accessor footprint when the candidate list was built.
    pub size: usize,
}

/// Strategy that frees bytes across a pool's participants.
pub trait PoolEvictor: Send + Sync + 'static {
    /// Free at least `bytes` across `candidates`.
    ///
    /// Returns false when the target could not be reached.
    fn free(&self, candidates: &mut Vec<Candidate>, bytes: usize) -> bool;
}

/// Evicts from the participant with the largest footprint first.
#[derive(Debug, Default)]
pub struct FromLargestParticipant;

impl PoolEvictor for FromLargestParticipant {
    fn free(&self, candidates: &mut Vec<Candidate>, bytes: usize) -> bool {
        let mut remaining = bytes;
        while remaining > 0 {
            let Some(index) = candidates
                .iter()
                .enumerate()
                .max_by_key(|(_, candidate)| candidate.size)
                .map(|(index, _)| index)
            else {
                return false;
            };
            let freed = candidates[index].participant.evict(remaining);
            if freed == 0 {
                candidates.swap_remove(index);
                continue;
            }
            candidates[index].size = candidates[index].size.saturating_sub(freed);
            remaining = remaining.saturating_sub(freed);
        }
        true
    }
}

struct Registration {
    id: u64,
    participant: Weak<dyn PoolParticipant>,
    size: Arc<AtomicUsize>,
}

struct PoolInner {
    /// None for an unbounded pool.
    capacity: Option<usize>,
    used: AtomicUsize,
    registrations: Mutex<Vec<Registration>>,
    evictor: Arc<dyn PoolEvictor>,
    ids: AtomicU64,
}

impl PoolInner {
    fn try_reserve(&self, bytes: usize, capacity: usize) -> bool {
        let mut used = self.used.load(Ordering::SeqCst);
        loop {
            if used + bytes > capacity {
                return false;
            }
            match self
                .used
                .compare_exchange(used, used + bytes, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(current) => used = current,
            }
        }
    }

    fn reserve(&self, bytes: usize, force: bool) -> bool {
        let Some(capacity) = self.capacity else {
            self.used.fetch_add(bytes, Ordering::SeqCst);
            return true;
        };
        if force {
            self.used.fetch_add(bytes, Ordering::SeqCst);
            return true;
        }
        if self.try_reserve(bytes, capacity) {
            return true;
        }

        let needed = (self.used.load(Ordering::SeqCst) + bytes).saturating_sub(capacity);
        let mut candidates = self.candidates();
        let _ = self.evictor.free(&mut candidates, needed);

        self.try_reserve(bytes, capacity)
    }

    fn release(&self, bytes: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                strict_assert!(used >= bytes);
                Some(used.saturating_sub(bytes))
            });
    }

    fn fits(&self, bytes: usize) -> bool {
        match self.capacity {
            None => true,
            Some(capacity) => self.used.load(Ordering::SeqCst) + bytes <= capacity,
        }
    }

    /// Snapshot the live registrations. The guard is released before the
    /// evictor runs so participants can mutate their accessors freely.
    fn candidates(&self) -> Vec<Candidate> {
        let mut registrations = self.registrations.lock();
        registrations.retain(|registration| registration.participant.strong_count() > 0);
        registrations
            .iter()
            .filter_map(|registration| {
                registration.participant.upgrade().map(|participant| Candidate {
                    participant,
                    size: registration.size.load(Ordering::SeqCst),
                })
            })
            .collect()
    }
}

/// The shared byte-budget authority backing one or more caching tiers.
///
/// The pool is the long-lived owner of the accounting; tiers hold
/// [`PoolAccessor`]s and are registered as participants for the lifetime of
/// the accessor.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool with a byte budget and an eviction strategy.
    pub fn bounded(capacity: usize, evictor: Arc<dyn PoolEvictor>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity: Some(capacity),
                used: AtomicUsize::new(0),
                registrations: Mutex::new(Vec::new()),
                evictor,
                ids: AtomicU64::new(0),
            }),
        }
    }

    /// Create a pool without a budget.
    ///
    /// Accessors of an unbounded pool are no-ops: they admit everything and
    /// report zero bytes. Used when no memory limiting is configured.
    pub fn unbounded() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity: None,
                used: AtomicUsize::new(0),
                registrations: Mutex::new(Vec::new()),
                evictor: Arc::new(FromLargestParticipant),
                ids: AtomicU64::new(0),
            }),
        }
    }

    /// The pool byte budget, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    /// Bytes currently committed across all accessors.
    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::SeqCst)
    }

    /// Create an accessor bound to `participant` and register the participant
    /// for pool-driven eviction.
    pub fn create_accessor(&self, participant: Arc<dyn PoolParticipant>, config: SizeOfConfig) -> PoolAccessor {
        let id = self.inner.ids.fetch_add(1, Ordering::Relaxed);
        let size = Arc::new(AtomicUsize::new(0));
        let unbounded = self.inner.capacity.is_none();
        if !unbounded {
            self.inner.registrations.lock().push(Registration {
                id,
                participant: Arc::downgrade(&participant),
                size: size.clone(),
            });
        }
        PoolAccessor {
            pool: self.inner.clone(),
            engine: SizeOfEngine::new(config),
            size,
            id,
            unbounded,
        }
    }
}

/// A participant's private ledger into a [`Pool`]'s accounting.
///
/// All mutations are tied one-to-one to backing map mutations: `add` on
/// insert, `delete` on remove or evict, `replace` on in-place updates.
pub struct PoolAccessor {
    pool: Arc<PoolInner>,
    engine: SizeOfEngine,
    size: Arc<AtomicUsize>,
    id: u64,
    unbounded: bool,
}

impl PoolAccessor {
    /// Measure the triple and commit its size.
    ///
    /// With `force` unset, admission is subject to the pool budget: the pool
    /// first asks its evictor to free space, and if the reservation still
    /// fails, `None` is returned with no accounting change. A forced add
    /// always commits, even past the budget.
    pub fn add(
        &self,
        key: &dyn Measurable,
        value: &dyn Measurable,
        container: Option<&dyn Measurable>,
        force: bool,
    ) -> Option<usize> {
        if self.unbounded {
            return Some(0);
        }
        let bytes = self.measure(key, value, container);
        if !self.pool.reserve(bytes, force) {
            return None;
        }
        self.size.fetch_add(bytes, Ordering::SeqCst);
        Some(bytes)
    }

    /// Release `bytes` previously committed through this accessor.
    pub fn delete(&self, bytes: usize) {
        if self.unbounded {
            return;
        }
        strict_assert!(self.size.load(Ordering::SeqCst) >= bytes);
        let _ = self
            .size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |size| {
                Some(size.saturating_sub(bytes))
            });
        self.pool.release(bytes);
    }

    /// Re-measure the triple and apply the delta against `current`.
    ///
    /// Positive deltas go through the same admission control as
    /// [`PoolAccessor::add`]; negative deltas always succeed. Returns the new
    /// size on success.
    pub fn replace(
        &self,
        current: usize,
        key: &dyn Measurable,
        value: &dyn Measurable,
        container: Option<&dyn Measurable>,
        force: bool,
    ) -> Option<usize> {
        if self.unbounded {
            return Some(0);
        }
        let bytes = self.measure(key, value, container);
        if bytes >= current {
            let delta = bytes - current;
            if !self.pool.reserve(delta, force) {
                return None;
            }
            self.size.fetch_add(delta, Ordering::SeqCst);
        } else {
            let delta = current - bytes;
            let _ = self
                .size
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |size| {
                    Some(size.saturating_sub(delta))
                });
            self.pool.release(delta);
        }
        Some(bytes)
    }

    /// Pure admission predicate. No side effects.
    pub fn can_add_without_evicting(
        &self,
        key: &dyn Measurable,
        value: &dyn Measurable,
        container: Option<&dyn Measurable>,
    ) -> bool {
        if self.unbounded {
            return true;
        }
        let bytes = self.measure(key, value, container);
        self.pool.fits(bytes)
    }

    /// Aggregate bytes committed by this participant.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// The byte budget of the owning pool, if bounded.
    pub fn pool_capacity(&self) -> Option<usize> {
        self.pool.capacity
    }

    /// Bytes currently committed across the owning pool.
    pub fn pool_used(&self) -> usize {
        self.pool.used.load(Ordering::SeqCst)
    }

    /// Unregister the participant and release its residual accounting.
    ///
    /// Called on tier disposal; the pool outlives its accessors.
    pub fn unregister(&self) {
        if self.unbounded {
            return;
        }
        self.pool
            .registrations
            .lock()
            .retain(|registration| registration.id != self.id);
        let residual = self.size.swap(0, Ordering::SeqCst);
        self.pool.release(residual);
    }

    fn measure(
        &self,
        key: &dyn Measurable,
        value: &dyn Measurable,
        container: Option<&dyn Measurable>,
    ) -> usize {
        let size = self.engine.size_of(key, value, container);
        if !size.exact {
            tracing::warn!(bytes = size.bytes, "size-of traversal aborted, using partial size");
        }
        size.bytes
    }
}

impl Drop for PoolAccessor {
    fn drop(&mut self) {
        self.unregister();
    }
}
