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

pub use strata_common::{
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::{Error, ErrorKind, Result},
    event::{Event, EventListener},
    pool::{Candidate, FromLargestParticipant, Pool, PoolAccessor, PoolEvictor, PoolParticipant},
    size_of::{Measurable, Size, SizeOfConfig, SizeOfEngine, SizeOfFilter},
};

pub use crate::{
    builder::CacheBuilder,
    entry::Entry,
    map::{Admission, BackingMap},
    metrics::{Metrics, MetricsSnapshot},
    policy::{
        clock::Clock,
        fifo::Fifo,
        lfu::{Lfu, LfuConfig},
        lru::Lru,
        EvictionPolicy, DEFAULT_SAMPLE_SIZE,
    },
    tier::{CachingTier, Loader, OnHeapTier},
    tiering::TieredCache,
};
