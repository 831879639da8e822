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
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use strata_memory::prelude::*;

fn pooled_tier(pool: &Pool) -> OnHeapTier<u64, u64> {
    CacheBuilder::<u64, u64>::new()
        .with_shards(1)
        .with_pool(pool.clone())
        .build()
        .unwrap()
}

#[test_log::test]
fn test_pool_shared_across_tiers() {
    // 16 bytes per u64/u64 entry, three fit.
    let pool = Pool::bounded(48, Arc::new(FromLargestParticipant));
    let a = pooled_tier(&pool);
    let b = pooled_tier(&pool);

    for key in 0..3 {
        a.insert(key, key).unwrap();
    }
    assert_eq!(pool.used(), 48);

    // Admitting into `b` squeezes the larger participant `a`.
    b.insert(100, 100).unwrap();
    assert_eq!(pool.used(), 48);
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 1);
    assert!(b.contains(&100));
}

#[test_log::test]
fn test_tier_disposal_releases_budget() {
    let pool = Pool::bounded(64, Arc::new(FromLargestParticipant));
    let a = pooled_tier(&pool);
    let b = pooled_tier(&pool);

    a.insert(1, 1).unwrap();
    b.insert(2, 2).unwrap();
    assert_eq!(pool.used(), 32);

    drop(a);
    assert_eq!(pool.used(), 16);

    // The freed budget is available to the surviving tier.
    b.insert(3, 3).unwrap();
    b.insert(4, 4).unwrap();
    assert_eq!(b.len(), 3);
    assert_eq!(pool.used(), 48);
}

#[test_log::test]
fn test_single_flight_on_pooled_tier() {
    const THREADS: usize = 8;

    let pool = Pool::bounded(1024, Arc::new(FromLargestParticipant));
    let tier = Arc::new(pooled_tier(&pool));
    let invocations = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let tier = tier.clone();
            let invocations = invocations.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                tier.get_or_fetch(&42, || {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(Some(4242))
                })
                .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(4242));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(tier.size_in_bytes(), 16);
    assert_eq!(pool.used(), 16);
}

#[test_log::test]
fn test_concurrent_churn_stays_within_budget() {
    const THREADS: usize = 4;
    const OPS: usize = 2000;
    const CAPACITY: usize = 64 * 16;

    let pool = Pool::bounded(CAPACITY, Arc::new(FromLargestParticipant));
    let tier = Arc::new(pooled_tier(&pool));

    let handles: Vec<_> = (0..THREADS)
        .map(|seed| {
            let tier = tier.clone();
            thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(seed as u64);
                for _ in 0..OPS {
                    let key = rng.random_range(0..256u64);
                    match rng.random_range(0..4u8) {
                        0 => {
                            tier.insert(key, key).unwrap();
                        }
                        1 => {
                            tier.remove(&key);
                        }
                        _ => {
                            if let Some(value) = tier.get(&key) {
                                assert_eq!(value, key);
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(pool.used() <= CAPACITY);
    assert_eq!(pool.used(), tier.size_in_bytes());
    assert_eq!(tier.size_in_bytes(), tier.len() * 16);
}

#[test_log::test]
fn test_count_churn_respects_max_entries() {
    const CAPACITY: usize = 64;

    let tier = Arc::new(
        CacheBuilder::<u64, u64>::new()
            .with_shards(4)
            .with_max_entries(CAPACITY)
            .with_policy(Lfu::default())
            .build()
            .unwrap(),
    );

    let mut rng = SmallRng::seed_from_u64(114514);
    for _ in 0..10_000 {
        let key = rng.random_range(0..1024u64);
        if let Some(value) = tier.get(&key) {
            assert_eq!(value, key);
            continue;
        }
        tier.insert(key, key).unwrap();
    }
    assert_eq!(tier.len(), CAPACITY);
}
