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
    ops::ControlFlow,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tidemq_common_telemetry::init_default_ut_logging;
use tidemq_error::{ErrorExt, StatusCode};
use tidemq_store::{
    AckOperation, AckType, BatchRequest, ChangeInvisibleDurationOperation,
    DefaultLogicQueueStateMachine, IterOptions, KvService, MemoryKvService, MessageStateMachine,
    Operation, OperationSnapshot, PopOperation, PopType, QueueKey, ReceiptHandle,
    StateMachineConfig, StateMachineRegistry, TimerTagKey,
    codec::{check_point_key, order_index_key},
    kv::{KvResult, KvVisitor, StorageSnafu},
    scan_due_timer_tags,
};

const TOPIC: u64 = 1;
const QUEUE: u32 = 0;
const GROUP: u64 = 7;
const NOW: u64 = 1_000;
const INVISIBLE: u64 = 30_000;

/// Delegates to a [`MemoryKvService`], failing batches while armed.
#[derive(Default)]
struct FlakyKv {
    inner:        MemoryKvService,
    fail_batches: AtomicBool,
    batches:      AtomicUsize,
}

#[async_trait]
impl KvService for FlakyKv {
    async fn get(&self, namespace: &str, key: &[u8]) -> KvResult<Option<Bytes>> {
        self.inner.get(namespace, key).await
    }

    async fn put(&self, namespace: &str, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.inner.put(namespace, key, value).await
    }

    async fn delete(&self, namespace: &str, key: &[u8]) -> KvResult<()> {
        self.inner.delete(namespace, key).await
    }

    async fn batch(&self, requests: Vec<BatchRequest>) -> KvResult<()> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return StorageSnafu { message: "injected" }.fail();
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.batch(requests).await
    }

    async fn iterate(
        &self,
        namespace: &str,
        options: &IterOptions,
        visitor: &mut KvVisitor<'_>,
    ) -> KvResult<()> {
        self.inner.iterate(namespace, options, visitor).await
    }

    async fn take_snapshot(&self) -> KvResult<u64> { self.inner.take_snapshot().await }

    async fn release_snapshot(&self, version: u64) -> KvResult<bool> {
        self.inner.release_snapshot(version).await
    }
}

type Machine = DefaultLogicQueueStateMachine<FlakyKv>;

fn setup() -> (Arc<FlakyKv>, Machine) {
    init_default_ut_logging();
    let kv = Arc::new(FlakyKv::default());
    let machine = DefaultLogicQueueStateMachine::new(
        TOPIC,
        QUEUE,
        kv.clone(),
        StateMachineConfig::default(),
    );
    (kv, machine)
}

fn pop(pop_type: PopType, offset: u64, count: u32) -> PopOperation {
    PopOperation::builder()
        .topic_id(TOPIC)
        .queue_id(QUEUE)
        .consumer_group_id(GROUP)
        .offset(offset)
        .count(count)
        .pop_type(pop_type)
        .operation_timestamp(NOW)
        .invisible_duration(INVISIBLE)
        .build()
}

fn end_mark(pop_type: PopType, offset: u64, count: u32) -> PopOperation {
    PopOperation {
        is_end_mark: true,
        ..pop(pop_type, offset, count)
    }
}

fn ack(operation_id: u64, ack_type: AckType) -> AckOperation {
    AckOperation::builder()
        .topic_id(TOPIC)
        .queue_id(QUEUE)
        .operation_id(operation_id)
        .ack_type(ack_type)
        .build()
}

fn change_invisible(
    operation_id: u64,
    timestamp: u64,
    duration: u64,
) -> ChangeInvisibleDurationOperation {
    ChangeInvisibleDurationOperation::builder()
        .topic_id(TOPIC)
        .queue_id(QUEUE)
        .operation_id(operation_id)
        .operation_timestamp(timestamp)
        .invisible_duration(duration)
        .build()
}

/// Every row of the three namespaces, in key order.
fn rows(kv: &FlakyKv) -> Vec<Vec<(Bytes, Bytes)>> {
    let config = StateMachineConfig::default();
    [
        config.check_point_namespace,
        config.timer_tag_namespace,
        config.order_index_namespace,
    ]
    .iter()
    .map(|ns| kv.inner.dump(ns).unwrap())
    .collect()
}

async fn offsets(machine: &Machine, group: u64) -> [u64; 4] {
    [
        machine.consume_offset(group).await,
        machine.ack_offset(group).await,
        machine.retry_consume_offset(group).await,
        machine.retry_ack_offset(group).await,
    ]
}

#[tokio::test]
async fn test_pop_normal_advances_consume_offset() {
    let (kv, machine) = setup();
    for (operation_id, offset) in [(0, 3), (1, 4), (2, 9)] {
        machine
            .replay_pop_operation(operation_id, &pop(PopType::Normal, offset, 1))
            .await
            .unwrap();
    }

    assert_eq!(machine.consume_offset(GROUP).await, 10);
    assert_eq!(machine.ack_offset(GROUP).await, 0);
    assert_eq!(machine.check_point_count().await.unwrap(), 3);
    assert_eq!(machine.current_operation_id().await, Some(2));

    let all = rows(&kv);
    let [check_points, timers, order_index] = all.as_slice() else {
        panic!("three namespaces");
    };
    assert_eq!(check_points.len(), 3);
    assert_eq!(timers.len(), 3);
    assert!(order_index.is_empty());
}

#[tokio::test]
async fn test_batch_pop_then_ack_advances_watermark() {
    let (_kv, machine) = setup();
    machine
        .replay_pop_operation(0, &end_mark(PopType::Normal, 9, 10))
        .await
        .unwrap();
    assert_eq!(machine.ack_offset(GROUP).await, 10);

    machine
        .replay_pop_operation(1, &pop(PopType::Normal, 12, 3))
        .await
        .unwrap();
    let check_points = machine.list_check_points().await.unwrap();
    assert_eq!(check_points.len(), 1);
    assert_eq!(check_points[0].message_offset, 12);
    assert_eq!(check_points[0].count, 3);
    assert_eq!(check_points[0].operation_id, 1);

    machine
        .replay_ack_operation(2, &ack(1, AckType::Normal))
        .await
        .unwrap();
    assert_eq!(offsets(&machine, GROUP).await, [13, 13, 0, 0]);
    assert_eq!(machine.check_point_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ack_without_check_point_is_not_found() {
    let (kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Normal, 0, 1))
        .await
        .unwrap();
    let before = rows(&kv);
    let batches = kv.batches.load(Ordering::SeqCst);

    let err = machine
        .replay_ack_operation(1, &ack(42, AckType::Normal))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = machine
        .replay_change_invisible_duration_operation(2, &change_invisible(42, NOW, 5))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(rows(&kv), before);
    assert_eq!(kv.batches.load(Ordering::SeqCst), batches);
    assert_eq!(machine.current_operation_id().await, Some(0));
}

#[tokio::test]
async fn test_failed_batch_leaves_state_untouched() {
    let (kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Normal, 0, 1))
        .await
        .unwrap();

    kv.fail_batches.store(true, Ordering::SeqCst);
    assert!(
        machine
            .replay_pop_operation(1, &pop(PopType::Normal, 5, 1))
            .await
            .is_err()
    );
    let err = machine
        .replay_ack_operation(1, &ack(0, AckType::Normal))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::StorageIo);
    assert_eq!(offsets(&machine, GROUP).await, [1, 0, 0, 0]);
    assert_eq!(machine.current_operation_id().await, Some(0));

    // The same operation id applies cleanly once the store recovers.
    kv.fail_batches.store(false, Ordering::SeqCst);
    machine
        .replay_ack_operation(1, &ack(0, AckType::Normal))
        .await
        .unwrap();
    assert_eq!(offsets(&machine, GROUP).await, [1, 1, 0, 0]);
}

#[tokio::test]
async fn test_order_index_locks_until_ack() {
    let (kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Order, 4, 2))
        .await
        .unwrap();
    assert!(machine.is_locked(GROUP, 3).await.unwrap());
    assert!(machine.is_locked(GROUP, 4).await.unwrap());
    assert!(!machine.is_locked(GROUP, 5).await.unwrap());
    assert!(!machine.is_locked(GROUP + 1, 4).await.unwrap());

    // A second delivery of a locked offset is refused.
    let err = machine
        .replay_pop_operation(1, &pop(PopType::Order, 4, 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("locked by operation 0"));

    // Renewing keeps the lock.
    machine
        .replay_change_invisible_duration_operation(1, &change_invisible(0, NOW + 10, 100))
        .await
        .unwrap();
    assert!(machine.is_locked(GROUP, 4).await.unwrap());
    let config = StateMachineConfig::default();
    assert_eq!(kv.inner.row_count(&config.order_index_namespace).unwrap(), 2);

    machine
        .replay_ack_operation(2, &ack(0, AckType::Normal))
        .await
        .unwrap();
    assert!(!machine.is_locked(GROUP, 4).await.unwrap());
    assert_eq!(kv.inner.row_count(&config.order_index_namespace).unwrap(), 0);
    assert_eq!(offsets(&machine, GROUP).await, [5, 0, 0, 0]);

    machine
        .replay_pop_operation(3, &pop(PopType::Order, 4, 1))
        .await
        .unwrap();
    assert!(machine.is_locked(GROUP, 4).await.unwrap());
}

#[tokio::test]
async fn test_ordered_timeout_ack_releases_without_advancing() {
    let (_kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Order, 0, 1))
        .await
        .unwrap();
    machine
        .replay_ack_operation(1, &ack(0, AckType::Timeout))
        .await
        .unwrap();

    assert!(!machine.is_locked(GROUP, 0).await.unwrap());
    assert_eq!(offsets(&machine, GROUP).await, [1, 0, 0, 0]);

    machine
        .replay_pop_operation(2, &pop(PopType::Order, 0, 1))
        .await
        .unwrap();
    machine
        .replay_ack_operation(3, &ack(2, AckType::Normal))
        .await
        .unwrap();
    assert_eq!(offsets(&machine, GROUP).await, [1, 1, 0, 0]);
}

#[tokio::test]
async fn test_retry_path_uses_retry_counters() {
    let (_kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Retry, 1, 2))
        .await
        .unwrap();
    machine
        .replay_pop_operation(1, &end_mark(PopType::Retry, 3, 2))
        .await
        .unwrap();
    assert_eq!(offsets(&machine, GROUP).await, [0, 0, 4, 0]);

    machine
        .replay_ack_operation(2, &ack(0, AckType::Normal))
        .await
        .unwrap();
    assert_eq!(offsets(&machine, GROUP).await, [0, 0, 4, 4]);
}

#[tokio::test]
async fn test_change_invisible_duration_moves_timer() {
    let (kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Normal, 0, 1))
        .await
        .unwrap();

    machine
        .replay_change_invisible_duration_operation(1, &change_invisible(0, 2_000, 500))
        .await
        .unwrap();

    let check_points = machine.list_check_points().await.unwrap();
    assert_eq!(check_points[0].next_visible_timestamp, 2_500);
    assert_eq!(check_points[0].delivery_timestamp, NOW);

    let config = StateMachineConfig::default();
    let timers = kv.inner.dump(&config.timer_tag_namespace).unwrap();
    assert_eq!(timers.len(), 1);
    let key = TimerTagKey::decode(&timers[0].0).unwrap();
    assert_eq!(key.next_visible_timestamp, 2_500);
    assert_eq!(key.operation_id, 0);

    let due = scan_due_timer_tags(kv.as_ref(), &config, 2_501, 16).await.unwrap();
    assert_eq!(due.len(), 1);
    let handle = due[0].receipt_handle;
    assert_eq!(handle, check_points[0].receipt_handle());
    assert_eq!(handle.to_string().parse::<ReceiptHandle>().unwrap(), handle);
    assert!(scan_due_timer_tags(kv.as_ref(), &config, 2_500, 16).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_snapshot_then_load_reproduces_state() {
    let (kv, machine) = setup();
    let script: Vec<(u64, Operation)> = vec![
        (0, pop(PopType::Normal, 2, 3).into()),
        (1, pop(PopType::Order, 5, 2).into()),
        (2, pop(PopType::Retry, 0, 1).into()),
        (3, ack(0, AckType::Normal).into()),
        (4, pop(PopType::Normal, 8, 1).into()),
        (5, change_invisible(4, NOW, 1).into()),
        (6, end_mark(PopType::Normal, 7, 1).into()),
    ];
    for (operation_id, operation) in &script {
        machine.replay(*operation_id, operation).await.unwrap();
    }
    let before_offsets = offsets(&machine, GROUP).await;
    let before_rows = rows(&kv);

    let snapshot = machine.take_snapshot().await.unwrap();
    assert_eq!(snapshot.snapshot_end_offset, Some(6));
    assert_eq!(snapshot.check_points.len(), 3);
    let snapshot = OperationSnapshot::decode(&snapshot.encode().unwrap()).unwrap();

    machine.load_snapshot(snapshot.clone()).await.unwrap();
    assert_eq!(offsets(&machine, GROUP).await, before_offsets);
    assert_eq!(rows(&kv), before_rows);

    // A fresh owner on an empty store rebuilds the same rows.
    let fresh_kv = Arc::new(FlakyKv::default());
    let fresh = DefaultLogicQueueStateMachine::new(
        TOPIC,
        QUEUE,
        fresh_kv.clone(),
        StateMachineConfig::default(),
    );
    fresh.load_snapshot(snapshot).await.unwrap();
    assert_eq!(offsets(&fresh, GROUP).await, before_offsets);
    assert_eq!(rows(&fresh_kv), before_rows);
    assert_eq!(fresh.current_operation_id().await, Some(6));
    assert!(fresh.is_locked(GROUP, 4).await.unwrap());

    // Pending acks above the watermark survive the round trip.
    fresh
        .replay_ack_operation(7, &ack(1, AckType::Normal))
        .await
        .unwrap();
    assert_eq!(fresh.ack_offset(GROUP).await, 3);
    fresh
        .replay_pop_operation(8, &end_mark(PopType::Normal, 3, 1))
        .await
        .unwrap();
    assert_eq!(fresh.ack_offset(GROUP).await, 6);
    fresh
        .replay_pop_operation(9, &end_mark(PopType::Normal, 6, 1))
        .await
        .unwrap();
    assert_eq!(fresh.ack_offset(GROUP).await, 8);
}

#[tokio::test]
async fn test_load_snapshot_replaces_renewed_timer() {
    let (kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Order, 1, 2))
        .await
        .unwrap();
    let snapshot = machine.take_snapshot().await.unwrap();
    let at_snapshot = rows(&kv);

    machine
        .replay_change_invisible_duration_operation(1, &change_invisible(0, 5_000, 100))
        .await
        .unwrap();
    assert_ne!(rows(&kv), at_snapshot);

    machine.load_snapshot(snapshot).await.unwrap();
    assert_eq!(rows(&kv), at_snapshot);

    let config = StateMachineConfig::default();
    let timers = kv.inner.dump(&config.timer_tag_namespace).unwrap();
    assert_eq!(timers.len(), 1);
    let key = TimerTagKey::decode(&timers[0].0).unwrap();
    assert_eq!(key.next_visible_timestamp, NOW + INVISIBLE);
    assert!(machine.is_locked(GROUP, 0).await.unwrap());
    assert!(machine.is_locked(GROUP, 1).await.unwrap());
    assert_eq!(machine.current_operation_id().await, Some(0));
}

#[tokio::test]
async fn test_failed_load_snapshot_leaves_rows_untouched() {
    let (kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Normal, 0, 1))
        .await
        .unwrap();
    machine
        .replay_pop_operation(1, &pop(PopType::Order, 1, 1))
        .await
        .unwrap();
    let snapshot = machine.take_snapshot().await.unwrap();

    machine
        .replay_ack_operation(2, &ack(0, AckType::Normal))
        .await
        .unwrap();
    machine
        .replay_change_invisible_duration_operation(3, &change_invisible(1, 5_000, 100))
        .await
        .unwrap();
    machine
        .replay_pop_operation(4, &pop(PopType::Normal, 2, 1))
        .await
        .unwrap();
    let before_rows = rows(&kv);
    let before_offsets = offsets(&machine, GROUP).await;

    kv.fail_batches.store(true, Ordering::SeqCst);
    let err = machine.load_snapshot(snapshot.clone()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::StorageIo);
    assert_eq!(rows(&kv), before_rows);
    assert_eq!(offsets(&machine, GROUP).await, before_offsets);
    assert_eq!(machine.current_operation_id().await, Some(4));

    kv.fail_batches.store(false, Ordering::SeqCst);
    machine.load_snapshot(snapshot).await.unwrap();
    assert_eq!(machine.current_operation_id().await, Some(1));
    assert_eq!(machine.check_point_count().await.unwrap(), 2);
    assert_eq!(offsets(&machine, GROUP).await, [2, 0, 0, 0]);
}

#[tokio::test]
async fn test_release_snapshot_drops_kv_view() {
    let (kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Normal, 0, 1))
        .await
        .unwrap();
    let first = machine.take_snapshot().await.unwrap();
    let second = machine.take_snapshot().await.unwrap();
    assert_eq!(kv.inner.retained_snapshots().unwrap(), 2);

    assert!(machine.release_snapshot(&first).await.unwrap());
    assert!(!machine.release_snapshot(&first).await.unwrap());
    assert_eq!(kv.inner.retained_snapshots().unwrap(), 1);

    // Releasing the KV view does not invalidate the snapshot payload.
    assert!(machine.release_snapshot(&second).await.unwrap());
    assert_eq!(kv.inner.retained_snapshots().unwrap(), 0);
    machine.load_snapshot(second).await.unwrap();
    assert_eq!(machine.check_point_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_large_normal_batch_writes_two_rows() {
    let (kv, machine) = setup();
    let offset = u64::from(u32::MAX);
    machine
        .replay_pop_operation(0, &pop(PopType::Normal, offset, u32::MAX))
        .await
        .unwrap();

    assert_eq!(machine.consume_offset(GROUP).await, offset + 1);
    let all = rows(&kv);
    let [check_points, timers, order_index] = all.as_slice() else {
        panic!("three namespaces");
    };
    assert_eq!(check_points.len(), 1);
    assert_eq!(timers.len(), 1);
    assert!(order_index.is_empty());
    let listed = machine.list_check_points().await.unwrap();
    assert_eq!(listed[0].count, u32::MAX);
    assert_eq!(listed[0].offsets(), 1..=offset);
}

#[tokio::test]
async fn test_load_snapshot_rejects_corrupt_bitmap() {
    let (kv, machine) = setup();
    machine
        .replay_pop_operation(0, &pop(PopType::Normal, 0, 1))
        .await
        .unwrap();
    let mut snapshot = machine.take_snapshot().await.unwrap();
    snapshot.consumer_groups[0].ack_bitmap = vec![0xff; 3];
    snapshot.snapshot_end_offset = Some(99);
    let before = rows(&kv);

    let err = machine.load_snapshot(snapshot).await.unwrap_err();
    assert!(err.status_code().is_fatal());
    assert_eq!(machine.current_operation_id().await, Some(0));
    assert_eq!(rows(&kv), before);
}

#[tokio::test]
async fn test_clear_removes_every_row() {
    let (kv, machine) = setup();
    let other = DefaultLogicQueueStateMachine::new(
        TOPIC,
        QUEUE + 1,
        kv.clone(),
        StateMachineConfig::default(),
    );
    machine
        .replay_pop_operation(0, &pop(PopType::Order, 3, 2))
        .await
        .unwrap();
    machine
        .replay_pop_operation(1, &pop(PopType::Normal, 5, 1))
        .await
        .unwrap();
    machine
        .replay_pop_operation(2, &end_mark(PopType::Retry, 0, 1))
        .await
        .unwrap();
    let neighbour = PopOperation {
        queue_id: QUEUE + 1,
        ..pop(PopType::Order, 3, 1)
    };
    other.replay_pop_operation(0, &neighbour).await.unwrap();

    machine.clear().await.unwrap();

    assert_eq!(offsets(&machine, GROUP).await, [0, 0, 0, 0]);
    assert_eq!(machine.current_operation_id().await, None);
    assert_eq!(machine.check_point_count().await.unwrap(), 0);
    assert!(!machine.is_locked(GROUP, 3).await.unwrap());

    // Only the neighbour queue's rows remain.
    for namespace_rows in rows(&kv) {
        assert_eq!(namespace_rows.len(), 1);
    }
    let config = StateMachineConfig::default();
    assert!(
        kv.inner
            .get(&config.check_point_namespace, &check_point_key(TOPIC, QUEUE + 1, 0))
            .await
            .unwrap()
            .is_some()
    );
    assert!(other.is_locked(GROUP, 3).await.unwrap());
    assert!(
        kv.inner
            .get(&config.order_index_namespace, &order_index_key(GROUP, TOPIC, QUEUE, 3))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_replay_validation() {
    let (kv, machine) = setup();
    machine
        .replay_pop_operation(5, &pop(PopType::Normal, 0, 1))
        .await
        .unwrap();

    let stale = machine
        .replay_pop_operation(4, &pop(PopType::Normal, 1, 1))
        .await
        .unwrap_err();
    assert!(stale.to_string().contains("behind replay cursor 5"));

    let foreign = PopOperation {
        topic_id: TOPIC + 1,
        ..pop(PopType::Normal, 1, 1)
    };
    assert!(machine.replay_pop_operation(6, &foreign).await.is_err());
    assert!(machine.replay_pop_operation(6, &pop(PopType::Normal, 1, 3)).await.is_err());
    assert!(machine.replay_pop_operation(6, &pop(PopType::Normal, 1, 0)).await.is_err());

    assert_eq!(machine.check_point_count().await.unwrap(), 1);
    assert_eq!(kv.batches.load(Ordering::SeqCst), 1);
    // Unknown groups read as zero without being created.
    assert_eq!(offsets(&machine, GROUP + 5).await, [0, 0, 0, 0]);
    let snapshot = machine.take_snapshot().await.unwrap();
    assert_eq!(snapshot.consumer_groups.len(), 1);
}

#[tokio::test]
async fn test_registry_retire_clears_queue() {
    init_default_ut_logging();
    let kv = Arc::new(MemoryKvService::new());
    let registry = StateMachineRegistry::new(kv.clone(), StateMachineConfig::default());
    let key = QueueKey::new(TOPIC, QUEUE);

    let machine = registry.get_or_create(key).await;
    machine
        .replay_pop_operation(0, &pop(PopType::Normal, 0, 1))
        .await
        .unwrap();
    let config = StateMachineConfig::default();
    assert_eq!(kv.row_count(&config.check_point_namespace).unwrap(), 1);

    assert!(registry.retire(key).await.unwrap());
    assert!(registry.is_empty().await);
    assert_eq!(kv.row_count(&config.check_point_namespace).unwrap(), 0);
    assert_eq!(kv.row_count(&config.timer_tag_namespace).unwrap(), 0);

    let reborn = registry.get_or_create(key).await;
    assert_eq!(reborn.consume_offset(GROUP).await, 0);
    let mut seen = 0;
    kv.iterate(&config.check_point_namespace, &IterOptions::default(), &mut |_, _| {
        seen += 1;
        ControlFlow::Continue(())
    })
    .await
    .unwrap();
    assert_eq!(seen, 0);
}
