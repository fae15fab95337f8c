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

use std::{
    collections::{BTreeMap, HashMap},
    ops::{Bound, ControlFlow},
    sync::{
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::OptionExt;
use tracing::debug;

use super::{
    BatchRequest, IterOptions, KvResult, KvService, KvVisitor, StorageSnafu, UnknownSnapshotSnafu,
};

type Namespace = BTreeMap<Bytes, Bytes>;
type Namespaces = HashMap<String, Namespace>;

/// In-process [`KvService`] keeping every namespace in an ordered map.
///
/// Snapshots are full copies taken under the write lock, addressable by the
/// version token returned from [`KvService::take_snapshot`].
#[derive(Default)]
pub struct MemoryKvService {
    namespaces:   RwLock<Namespaces>,
    snapshots:    RwLock<HashMap<u64, Arc<Namespaces>>>,
    next_version: AtomicU64,
}

impl MemoryKvService {
    pub fn new() -> Self { Self::default() }

    fn read(&self) -> KvResult<RwLockReadGuard<'_, Namespaces>> {
        self.namespaces.read().ok().context(StorageSnafu {
            message: "namespace lock poisoned",
        })
    }

    fn write(&self) -> KvResult<RwLockWriteGuard<'_, Namespaces>> {
        self.namespaces.write().ok().context(StorageSnafu {
            message: "namespace lock poisoned",
        })
    }

    /// Number of rows currently stored in `namespace`.
    pub fn row_count(&self, namespace: &str) -> KvResult<usize> {
        Ok(self.read()?.get(namespace).map_or(0, BTreeMap::len))
    }

    /// Copy of every row in `namespace`, in key order.
    pub fn dump(&self, namespace: &str) -> KvResult<Vec<(Bytes, Bytes)>> {
        Ok(self
            .read()?
            .get(namespace)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    /// Reads `key` as it was when snapshot `version` was taken.
    pub fn snapshot_get(
        &self,
        version: u64,
        namespace: &str,
        key: &[u8],
    ) -> KvResult<Option<Bytes>> {
        let snapshots = self.snapshots.read().ok().context(StorageSnafu {
            message: "snapshot lock poisoned",
        })?;
        let view = snapshots.get(&version).context(UnknownSnapshotSnafu { version })?;
        Ok(view.get(namespace).and_then(|rows| rows.get(key)).cloned())
    }

    /// Number of snapshot views currently held.
    pub fn retained_snapshots(&self) -> KvResult<usize> {
        Ok(self
            .snapshots
            .read()
            .ok()
            .context(StorageSnafu {
                message: "snapshot lock poisoned",
            })?
            .len())
    }

    fn apply(namespaces: &mut Namespaces, request: BatchRequest) {
        match request {
            BatchRequest::Put {
                namespace,
                key,
                value,
            } => {
                namespaces.entry(namespace).or_default().insert(key, value);
            }
            BatchRequest::Delete { namespace, key } => {
                if let Some(rows) = namespaces.get_mut(&namespace) {
                    rows.remove(&key);
                }
            }
        }
    }
}

#[async_trait]
impl KvService for MemoryKvService {
    async fn get(&self, namespace: &str, key: &[u8]) -> KvResult<Option<Bytes>> {
        Ok(self
            .read()?
            .get(namespace)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &[u8], value: &[u8]) -> KvResult<()> {
        let request = BatchRequest::put(
            namespace,
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
        );
        Self::apply(&mut *self.write()?, request);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &[u8]) -> KvResult<()> {
        let request = BatchRequest::delete(namespace, Bytes::copy_from_slice(key));
        Self::apply(&mut *self.write()?, request);
        Ok(())
    }

    async fn batch(&self, requests: Vec<BatchRequest>) -> KvResult<()> {
        // One write guard for the whole batch: readers never observe a
        // partially applied batch.
        let mut namespaces = self.write()?;
        for request in requests {
            Self::apply(&mut namespaces, request);
        }
        Ok(())
    }

    async fn iterate(
        &self,
        namespace: &str,
        options: &IterOptions,
        visitor: &mut KvVisitor<'_>,
    ) -> KvResult<()> {
        let lower = match (&options.start, &options.prefix) {
            (Some(start), Some(prefix)) => Some(start.clone().max(prefix.clone())),
            (Some(start), None) => Some(start.clone()),
            (None, Some(prefix)) => Some(prefix.clone()),
            (None, None) => None,
        };
        let lower = lower.map_or(Bound::Unbounded, Bound::Included);

        // The visitor runs under the read guard and must not call back into
        // this store.
        let namespaces = self.read()?;
        let Some(rows) = namespaces.get(namespace) else {
            return Ok(());
        };
        let in_bounds = rows.range((lower, Bound::Unbounded)).take_while(|(key, _)| {
            options.end.as_ref().is_none_or(|end| *key < end)
                && options
                    .prefix
                    .as_ref()
                    .is_none_or(|prefix| key.starts_with(prefix))
        });
        for (key, value) in in_bounds {
            if visitor(&key[..], &value[..]).is_break() {
                break;
            }
        }
        Ok(())
    }

    async fn take_snapshot(&self) -> KvResult<u64> {
        let view = Arc::new(self.read()?.clone());
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        self.snapshots
            .write()
            .ok()
            .context(StorageSnafu {
                message: "snapshot lock poisoned",
            })?
            .insert(version, view);
        debug!(version, "Took in-memory KV snapshot");
        Ok(version)
    }

    async fn release_snapshot(&self, version: u64) -> KvResult<bool> {
        let mut snapshots = self.snapshots.write().ok().context(StorageSnafu {
            message: "snapshot lock poisoned",
        })?;
        let released = snapshots.remove(&version).is_some();
        debug!(version, released, retained = snapshots.len(), "Released in-memory KV snapshot");
        Ok(released)
    }
}
