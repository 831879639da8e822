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

use std::{any::type_name, collections::HashSet, mem, sync::Arc};

use serde::{Deserialize, Serialize};

/// The retained size computed for a key/value/container triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    /// Computed bytes. Partial if `exact` is false.
    pub bytes: usize,
    /// False when the traversal was aborted before completing.
    pub exact: bool,
}

/// A value whose retained heap footprint can be measured.
///
/// Storable types implement this directly instead of relying on reflective
/// field walking. The defaults describe a plain inline value: no owned heap
/// bytes and no children.
pub trait Measurable {
    /// Heap bytes owned directly by this value, excluding bytes owned by the
    /// values yielded from [`Measurable::visit_children`].
    fn owned_bytes(&self) -> usize {
        0
    }

    /// Visit the values reachable from this one whose footprint should be
    /// included in the measurement.
    #[expect(unused_variables)]
    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Measurable)) {}

    /// Identity of a shared allocation, if this value points into one.
    ///
    /// Values with the same identity are measured once per traversal. This is
    /// also what keeps the traversal finite on cyclic graphs.
    fn shared_identity(&self) -> Option<usize> {
        None
    }

    /// Label matched against the traversal filter.
    fn type_label(&self) -> &'static str {
        type_name::<Self>()
    }
}

macro_rules! measurable_plain {
    ($($t:ty),* $(,)?) => {
        $(
            impl Measurable for $t {}
        )*
    };
}

measurable_plain! {
    (), bool, char,
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
    f32, f64,
}

impl Measurable for String {
    fn owned_bytes(&self) -> usize {
        self.capacity()
    }
}

impl<T> Measurable for Vec<T>
where
    T: Measurable,
{
    fn owned_bytes(&self) -> usize {
        self.capacity() * mem::size_of::<T>()
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Measurable)) {
        for item in self {
            visit(item);
        }
    }
}

impl<T> Measurable for Box<T>
where
    T: Measurable,
{
    fn owned_bytes(&self) -> usize {
        mem::size_of::<T>()
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Measurable)) {
        visit(&**self);
    }
}

impl<T> Measurable for Arc<T>
where
    T: Measurable,
{
    fn owned_bytes(&self) -> usize {
        // The allocation holds the value plus the two reference counters.
        mem::size_of::<T>() + 2 * mem::size_of::<usize>()
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Measurable)) {
        visit(&**self);
    }

    fn shared_identity(&self) -> Option<usize> {
        Some(Arc::as_ptr(self) as usize)
    }
}

impl<T> Measurable for parking_lot::Mutex<T>
where
    T: Measurable,
{
    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Measurable)) {
        let guard = self.lock();
        visit(&*guard);
    }
}

impl<T> Measurable for Option<T>
where
    T: Measurable,
{
    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Measurable)) {
        if let Some(inner) = self {
            visit(inner);
        }
    }
}

impl<A, B> Measurable for (A, B)
where
    A: Measurable,
    B: Measurable,
{
    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Measurable)) {
        visit(&self.0);
        visit(&self.1);
    }
}

/// Configuration data listing type labels excluded from sizing.
///
/// Filtering avoids double-counting shared immutable data that is accounted
/// elsewhere, without baking the exclusions into the traversal engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeOfFilter {
    excluded_types: HashSet<String>,
}

impl SizeOfFilter {
    /// Exclude a type label from sizing. Filtered values contribute nothing
    /// and are not descended into.
    pub fn exclude(mut self, label: impl Into<String>) -> Self {
        self.excluded_types.insert(label.into());
        self
    }

    /// Whether the given type label is excluded.
    pub fn is_excluded(&self, label: &str) -> bool {
        !self.excluded_types.is_empty() && self.excluded_types.contains(label)
    }
}

/// Size-of engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeOfConfig {
    /// The maximum number of values to visit in one traversal.
    pub max_depth: usize,
    /// When true, exceeding `max_depth` stops the traversal and the partial
    /// size is reported with [`Size::exact`] unset. When false, the traversal
    /// runs to completion and the overrun is only logged.
    pub abort_when_max_depth_exceeded: bool,
    /// Type labels excluded from sizing.
    pub filter: SizeOfFilter,
}

impl Default for SizeOfConfig {
    fn default() -> Self {
        Self {
            max_depth: 1000,
            abort_when_max_depth_exceeded: false,
            filter: SizeOfFilter::default(),
        }
    }
}

/// Computes the retained size of a key/value/container triple by walking the
/// object graph from the three roots.
#[derive(Debug, Clone)]
pub struct SizeOfEngine {
    config: SizeOfConfig,
}

impl SizeOfEngine {
    /// Create an engine with the given configuration.
    pub fn new(config: SizeOfConfig) -> Self {
        Self { config }
    }

    /// Measure the retained size of an entry.
    ///
    /// `container` is the per-entry bookkeeping structure, if any.
    pub fn size_of(
        &self,
        key: &dyn Measurable,
        value: &dyn Measurable,
        container: Option<&dyn Measurable>,
    ) -> Size {
        let mut walker = Walker {
            filter: &self.config.filter,
            abort: self.config.abort_when_max_depth_exceeded,
            remaining: self.config.max_depth,
            visited: HashSet::new(),
            bytes: 0,
            aborted: false,
            warned: false,
        };

        // The roots' inline footprint lives in the owning entry.
        walker.bytes += mem::size_of_val(key) + mem::size_of_val(value);
        if let Some(container) = container {
            walker.bytes += mem::size_of_val(container);
        }

        walker.walk(key);
        walker.walk(value);
        if let Some(container) = container {
            walker.walk(container);
        }

        Size {
            bytes: walker.bytes,
            exact: !walker.aborted,
        }
    }
}

struct Walker<'a> {
    filter: &'a SizeOfFilter,
    abort: bool,
    remaining: usize,
    visited: HashSet<usize>,
    bytes: usize,
    aborted: bool,
    warned: bool,
}

impl Walker<'_> {
    fn walk(&mut self, node: &dyn Measurable) {
        if self.aborted {
            return;
        }
        if self.filter.is_excluded(node.type_label()) {
            return;
        }
        if let Some(identity) = node.shared_identity() {
            if !self.visited.insert(identity) {
                return;
            }
        }
        if self.remaining == 0 {
            if self.abort {
                self.aborted = true;
                return;
            }
            if !self.warned {
                tracing::warn!("size-of traversal exceeded its max depth, continuing");
                self.warned = true;
            }
        } else {
            self.remaining -= 1;
        }

        self.bytes += node.owned_bytes();
        node.visit_children(&mut |child| self.walk(child));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(config: SizeOfConfig) -> SizeOfEngine {
        SizeOfEngine::new(config)
    }

    #[test]
    fn test_plain_values() {
        let size = engine(SizeOfConfig::default()).size_of(&1u64, &2u64, None);
        assert_eq!(size.bytes, 16);
        assert!(size.exact);
    }

    #[test]
    fn test_string_capacity() {
        let value = String::with_capacity(64);
        let size = engine(SizeOfConfig::default()).size_of(&1u64, &value, None);
        assert_eq!(size.bytes, 8 + mem::size_of::<String>() + 64);
        assert!(size.exact);
    }

    #[test]
    fn test_vec_buffer() {
        let value: Vec<u64> = Vec::with_capacity(8);
        let size = engine(SizeOfConfig::default()).size_of(&1u64, &value, None);
        assert_eq!(size.bytes, 8 + mem::size_of::<Vec<u64>>() + 8 * 8);
        assert!(size.exact);
    }

    #[test]
    fn test_shared_allocation_counted_once() {
        let shared = Arc::new(String::from("shared"));
        let solo = engine(SizeOfConfig::default()).size_of(&(), &shared, None);
        let pair = engine(SizeOfConfig::default()).size_of(&(), &(shared.clone(), shared.clone()), None);
        // The second arc only adds its own inline footprint.
        assert_eq!(pair.bytes, solo.bytes + mem::size_of::<Arc<String>>());
    }

    #[test]
    fn test_filter_excludes_subgraph() {
        let config = SizeOfConfig {
            filter: SizeOfFilter::default().exclude(type_name::<String>()),
            ..Default::default()
        };
        let value = String::with_capacity(128);
        let size = engine(config).size_of(&1u64, &value, None);
        assert_eq!(size.bytes, 8 + mem::size_of::<String>());
        assert!(size.exact);
    }

    #[test]
    fn test_abort_on_max_depth() {
        let config = SizeOfConfig {
            max_depth: 2,
            abort_when_max_depth_exceeded: true,
            ..Default::default()
        };
        let value: Vec<Vec<u64>> = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let size = engine(config).size_of(&1u64, &value, None);
        assert!(!size.exact);

        // Without abort the same traversal completes.
        let config = SizeOfConfig {
            max_depth: 2,
            abort_when_max_depth_exceeded: false,
            ..Default::default()
        };
        let size = engine(config).size_of(&1u64, &value, None);
        assert!(size.exact);
    }
}
