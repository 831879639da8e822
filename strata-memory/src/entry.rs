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
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
};

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use strata_common::{error::Result, strict_assert};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Flags: u64 {
        const IN_MAP = 0b00000001;
    }
}

/// What a key slot currently holds: a materialized value, or a pending load.
pub(crate) enum Slot<V> {
    /// A materialized value.
    Value(V),
    /// An in-flight load. Replaced by the materialized value (or removed) when
    /// the load completes; never visible to callers.
    Fault(Arc<Fault<V>>),
}

/// A cached entry with the bookkeeping its eviction policy requires.
///
/// Ordering metadata is driven by the owning map's logical access clock, not
/// wall time, so policy decisions are deterministic under test.
pub struct Entry<K, V> {
    key: K,
    slot: Slot<V>,
    hash: u64,

    /// Bytes committed to the pool accessor for this entry. Mutable because
    /// `recalculate_size` reconciles it after in-place value mutations.
    bytes: AtomicUsize,

    inserted_at: u64,
    last_access: AtomicU64,
    hits: AtomicU64,

    flags: AtomicU64,
}

impl<K, V> Debug for Entry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("hash", &self.hash).finish()
    }
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(key: K, slot: Slot<V>, hash: u64, bytes: usize, sequence: u64) -> Self {
        Self {
            key,
            slot,
            hash,
            bytes: AtomicUsize::new(bytes),
            inserted_at: sequence,
            last_access: AtomicU64::new(sequence),
            hits: AtomicU64::new(0),
            flags: AtomicU64::new(0),
        }
    }

    /// The entry key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The key hash under the owning map's hash builder.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The materialized value, if the slot is not a pending load.
    pub fn value(&self) -> Option<&V> {
        match &self.slot {
            Slot::Value(value) => Some(value),
            Slot::Fault(_) => None,
        }
    }

    pub(crate) fn fault(&self) -> Option<&Arc<Fault<V>>> {
        match &self.slot {
            Slot::Value(_) => None,
            Slot::Fault(fault) => Some(fault),
        }
    }

    /// Bytes accounted for this entry.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    pub(crate) fn set_bytes(&self, bytes: usize) {
        self.bytes.store(bytes, Ordering::Release);
    }

    /// The logical sequence at which this entry was inserted.
    pub fn inserted_at(&self) -> u64 {
        self.inserted_at
    }

    /// The logical sequence of the most recent access, reads and writes both
    /// counting as an access.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Acquire)
    }

    /// Observed hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self, sequence: u64) {
        self.last_access.store(sequence, Ordering::Release);
        self.hits.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn set_in_map(&self, val: bool) {
        match val {
            true => self.flags.fetch_or(Flags::IN_MAP.bits(), Ordering::Release),
            false => self.flags.fetch_and(!Flags::IN_MAP.bits(), Ordering::Release),
        };
    }

    pub(crate) fn is_in_map(&self) -> bool {
        self.flags.load(Ordering::Acquire) & Flags::IN_MAP.bits() == Flags::IN_MAP.bits()
    }
}

enum FaultState<V> {
    Pending,
    Complete(Result<Option<V>>),
}

/// An in-flight load for a single key.
///
/// Exactly one thread owns the fault and runs the load; all other callers for
/// the key block on it until completion. The owner never waits on its own
/// fault: the caching tier detects ownership by thread identity and computes
/// inline instead.
pub(crate) struct Fault<V> {
    owner: ThreadId,
    state: Mutex<FaultState<V>>,
    condvar: Condvar,
}

impl<V> Fault<V> {
    pub(crate) fn new() -> Self {
        Self {
            owner: thread::current().id(),
            state: Mutex::new(FaultState::Pending),
            condvar: Condvar::new(),
        }
    }

    /// The thread that created this fault.
    pub(crate) fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Publish the load outcome and wake every waiter.
    pub(crate) fn complete(&self, result: Result<Option<V>>) {
        let mut state = self.state.lock();
        strict_assert!(matches!(*state, FaultState::Pending));
        *state = FaultState::Complete(result);
        self.condvar.notify_all();
    }
}

impl<V> Fault<V>
where
    V: Clone,
{
    /// Block until the owning thread completes the load.
    pub(crate) fn wait(&self) -> Result<Option<V>> {
        let mut state = self.state.lock();
        while matches!(*state, FaultState::Pending) {
            self.condvar.wait(&mut state);
        }
        match &*state {
            FaultState::Complete(result) => result.clone(),
            FaultState::Pending => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_entry_metadata() {
        let entry = Entry::new(1u64, Slot::Value(2u64), 42, 16, 7);
        assert_eq!(entry.inserted_at(), 7);
        assert_eq!(entry.last_access(), 7);
        assert_eq!(entry.hits(), 0);

        entry.touch(9);
        assert_eq!(entry.last_access(), 9);
        assert_eq!(entry.hits(), 1);
        assert_eq!(entry.inserted_at(), 7);

        assert!(!entry.is_in_map());
        entry.set_in_map(true);
        assert!(entry.is_in_map());
    }

    #[test]
    fn test_fault_wakes_all_waiters() {
        let fault = Arc::new(Fault::<u64>::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let fault = fault.clone();
                thread::spawn(move || fault.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        fault.complete(Ok(Some(42)));

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap().unwrap(), Some(42));
        }
    }

    #[test]
    fn test_fault_propagates_failure_to_all_waiters() {
        use strata_common::error::{Error, ErrorKind};

        let fault = Arc::new(Fault::<u64>::new());

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let fault = fault.clone();
                thread::spawn(move || fault.wait())
            })
            .collect();

        fault.complete(Err(Error::new(ErrorKind::External, "loader failed")));

        for waiter in waiters {
            let err = waiter.join().unwrap().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::External);
        }
    }
}
