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

use serde::{Deserialize, Serialize};
use strata_common::code::{Key, Value};

use super::{EvictionPolicy, DEFAULT_SAMPLE_SIZE};
use crate::entry::Entry;

/// Lfu eviction policy config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfuConfig {
    /// Entries inspected per victim selection.
    pub sample_size: usize,
}

impl Default for LfuConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

/// Least-frequently-used eviction over a bounded random sample.
///
/// The victim is the sampled entry with the lowest observed hit count. Among
/// equal hit counts the first entry encountered wins.
#[derive(Debug, Clone)]
pub struct Lfu {
    sample_size: usize,
}

impl Lfu {
    /// Create the policy with the given config.
    pub fn new(config: LfuConfig) -> Self {
        Self {
            sample_size: config.sample_size,
        }
    }
}

impl Default for Lfu {
    fn default() -> Self {
        Self::new(LfuConfig::default())
    }
}

impl<K, V> EvictionPolicy<K, V> for Lfu
where
    K: Key,
    V: Value,
{
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn prefer(&self, a: &Entry<K, V>, b: &Entry<K, V>) -> bool {
        a.hits() < b.hits()
    }
}
