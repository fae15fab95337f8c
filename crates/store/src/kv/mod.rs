// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Contract of the namespaced key-value store the state machine writes to.
//!
//! The engine itself is an external collaborator; [`MemoryKvService`] is a
//! complete in-process implementation used by tests and by embedders that
//! do not need durability.

mod memory;

use std::ops::ControlFlow;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::Snafu;

pub use self::memory::MemoryKvService;

/// Result type for KV operations.
pub type KvResult<T> = std::result::Result<T, KvError>;

/// Failures reported by a KV engine. Propagated verbatim by the state
/// machine, retry policy belongs to the caller.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum KvError {
    #[snafu(display("Storage engine failure: {message}"))]
    Storage {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Unknown snapshot version {version}"))]
    UnknownSnapshot {
        version: u64,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },
}

/// One mutation inside an atomic [`KvService::batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRequest {
    Put {
        namespace: String,
        key:       Bytes,
        value:     Bytes,
    },
    Delete {
        namespace: String,
        key:       Bytes,
    },
}

impl BatchRequest {
    pub fn put(namespace: &str, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::Put {
            namespace: namespace.to_owned(),
            key:       key.into(),
            value:     value.into(),
        }
    }

    pub fn delete(namespace: &str, key: impl Into<Bytes>) -> Self {
        Self::Delete {
            namespace: namespace.to_owned(),
            key:       key.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Put { namespace, .. } | Self::Delete { namespace, .. } => namespace,
        }
    }

    pub fn key(&self) -> &Bytes {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// Bounds for [`KvService::iterate`].
///
/// Keys are visited in ascending byte order. `start` is inclusive, `end` is
/// exclusive, and when `prefix` is set only keys starting with it are
/// visited. All three may be combined.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct IterOptions {
    #[builder(into)]
    pub prefix: Option<Bytes>,
    #[builder(into)]
    pub start:  Option<Bytes>,
    #[builder(into)]
    pub end:    Option<Bytes>,
}

impl IterOptions {
    pub fn with_prefix(prefix: impl Into<Bytes>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    /// Whether `key` falls inside these bounds.
    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = self.start.as_ref().is_none_or(|start| key >= start.as_ref());
        let before_end = self.end.as_ref().is_none_or(|end| key < end.as_ref());
        let matches_prefix = self
            .prefix
            .as_ref()
            .is_none_or(|prefix| key.starts_with(prefix));
        after_start && before_end && matches_prefix
    }
}

/// Visitor invoked for each key/value pair; return [`ControlFlow::Break`] to
/// stop the scan early.
pub type KvVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> ControlFlow<()> + Send + 'a;

#[async_trait]
pub trait KvService: Send + Sync {
    async fn get(&self, namespace: &str, key: &[u8]) -> KvResult<Option<Bytes>>;

    async fn put(&self, namespace: &str, key: &[u8], value: &[u8]) -> KvResult<()>;

    async fn delete(&self, namespace: &str, key: &[u8]) -> KvResult<()>;

    /// Applies every request, in order, or none of them.
    async fn batch(&self, requests: Vec<BatchRequest>) -> KvResult<()>;

    async fn iterate(
        &self,
        namespace: &str,
        options: &IterOptions,
        visitor: &mut KvVisitor<'_>,
    ) -> KvResult<()>;

    /// Captures a point-in-time view and returns its opaque version token.
    async fn take_snapshot(&self) -> KvResult<u64>;

    /// Drops the view held for `version`. Returns whether it existed.
    async fn release_snapshot(&self, version: u64) -> KvResult<bool>;
}
