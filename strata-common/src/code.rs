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

use std::hash::{BuildHasher, Hash};

/// Key trait for cached entries.
pub trait Key: Send + Sync + 'static + Hash + Eq {}
impl<T> Key for T where T: Send + Sync + 'static + Hash + Eq {}

/// Value trait for cached entries.
pub trait Value: Send + Sync + 'static {}
impl<T> Value for T where T: Send + Sync + 'static {}

/// Hash builder trait for the sharded maps.
pub trait HashBuilder: BuildHasher + Send + Sync + 'static {}
impl<T> HashBuilder for T where T: BuildHasher + Send + Sync + 'static {}

/// The default hash builder used when none is configured.
pub type DefaultHashBuilder = ahash::RandomState;
