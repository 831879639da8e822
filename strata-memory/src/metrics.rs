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

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-tier operation counters.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Get hits.
    pub hit: AtomicU64,
    /// Get misses.
    pub miss: AtomicU64,
    /// Loads executed after a miss.
    pub load: AtomicU64,
    /// Deduped waiters queued behind an in-flight load.
    pub queue: AtomicU64,
    /// Successful inserts without replaces.
    pub insert: AtomicU64,
    /// Successful replaces.
    pub replace: AtomicU64,
    /// Successful removes.
    pub remove: AtomicU64,
    /// Evictions under capacity pressure.
    pub evict: AtomicU64,
}

/// A point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Get hits.
    pub hit: u64,
    /// Get misses.
    pub miss: u64,
    /// Loads executed after a miss.
    pub load: u64,
    /// Deduped waiters queued behind an in-flight load.
    pub queue: u64,
    /// Successful inserts without replaces.
    pub insert: u64,
    /// Successful replaces.
    pub replace: u64,
    /// Successful removes.
    pub remove: u64,
    /// Evictions under capacity pressure.
    pub evict: u64,
}

impl Metrics {
    /// Copy the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            load: self.load.load(Ordering::Relaxed),
            queue: self.queue.load(Ordering::Relaxed),
            insert: self.insert.load(Ordering::Relaxed),
            replace: self.replace.load(Ordering::Relaxed),
            remove: self.remove.load(Ordering::Relaxed),
            evict: self.evict.load(Ordering::Relaxed),
        }
    }
}
