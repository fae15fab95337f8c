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

//! Arena of queue state machines, one per `(topic, queue)`.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    config::StateMachineConfig,
    error::Result,
    kv::KvService,
    state_machine::{DefaultLogicQueueStateMachine, MessageStateMachine},
};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[display("{topic_id}/{queue_id}")]
pub struct QueueKey {
    pub topic_id: u64,
    pub queue_id: u32,
}

impl QueueKey {
    pub const fn new(topic_id: u64, queue_id: u32) -> Self { Self { topic_id, queue_id } }
}

/// Owns the state machines of every queue served by one store.
///
/// Instances never share mutable state; the registry only hands out
/// `Arc`s to them.
pub struct StateMachineRegistry<K: ?Sized> {
    kv:       Arc<K>,
    config:   StateMachineConfig,
    machines: RwLock<HashMap<QueueKey, Arc<DefaultLogicQueueStateMachine<K>>>>,
}

impl<K: KvService + ?Sized> StateMachineRegistry<K> {
    pub fn new(kv: Arc<K>, config: StateMachineConfig) -> Self {
        Self {
            kv,
            config,
            machines: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the queue's state machine, creating an empty one on first use.
    pub async fn get_or_create(&self, key: QueueKey) -> Arc<DefaultLogicQueueStateMachine<K>> {
        if let Some(machine) = self.machines.read().await.get(&key) {
            return machine.clone();
        }
        let mut machines = self.machines.write().await;
        machines
            .entry(key)
            .or_insert_with(|| {
                info!(queue = %key, "Created queue state machine");
                Arc::new(DefaultLogicQueueStateMachine::new(
                    key.topic_id,
                    key.queue_id,
                    self.kv.clone(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    pub async fn get(&self, key: QueueKey) -> Option<Arc<DefaultLogicQueueStateMachine<K>>> {
        self.machines.read().await.get(&key).cloned()
    }

    /// Clears a queue and drops its state machine. Returns `false` when the
    /// queue was not registered. A failed clear leaves it registered.
    pub async fn retire(&self, key: QueueKey) -> Result<bool> {
        let Some(machine) = self.get(key).await else {
            return Ok(false);
        };
        machine.clear().await?;
        self.machines.write().await.remove(&key);
        info!(queue = %key, "Retired queue state machine");
        Ok(true)
    }

    /// Registered queues in key order.
    pub async fn queues(&self) -> Vec<QueueKey> {
        let mut keys: Vec<_> = self.machines.read().await.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub async fn len(&self) -> usize { self.machines.read().await.len() }

    pub async fn is_empty(&self) -> bool { self.machines.read().await.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvService;

    fn registry() -> StateMachineRegistry<MemoryKvService> {
        StateMachineRegistry::new(Arc::new(MemoryKvService::new()), StateMachineConfig::default())
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = registry();
        assert!(registry.is_empty().await);

        let first = registry.get_or_create(QueueKey::new(1, 0)).await;
        let again = registry.get_or_create(QueueKey::new(1, 0)).await;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!((first.topic_id(), first.queue_id()), (1, 0));

        registry.get_or_create(QueueKey::new(0, 3)).await;
        assert_eq!(registry.queues().await, vec![QueueKey::new(0, 3), QueueKey::new(1, 0)]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_retire_unknown_queue() {
        let registry = registry();
        assert!(!registry.retire(QueueKey::new(9, 9)).await.unwrap());
        assert!(registry.get(QueueKey::new(9, 9)).await.is_none());
        assert_eq!(QueueKey::new(9, 1).to_string(), "9/1");
    }
}
