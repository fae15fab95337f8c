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

//! Per-queue consumption state machine.
//!
//! A [`DefaultLogicQueueStateMachine`] owns the consumer group counters and
//! ack committers of one `(topic, queue)` and materializes check points,
//! timer tags and order index rows in the KV store.
//!
//! Replays validate the operation, build one KV batch, submit it, and only
//! then touch in-memory state. A replay that fails therefore leaves the
//! queue as it was and may be retried at the same operation id.
//!
//! Replays share a fence with each other; snapshot, load and clear take it
//! exclusively so they never observe a replay half way.

use std::{
    collections::HashMap,
    future::Future,
    ops::ControlFlow,
    sync::Arc,
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::{ResultExt, ensure};
use tidemq_error::ErrorExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::{
    ack::AckCommitter,
    codec::{
        check_point_key, check_point_prefix, decode_order_index_value, order_index_key,
        order_index_value,
    },
    config::StateMachineConfig,
    error::{CheckPointNotFoundSnafu, IllegalArgumentSnafu, KvSnafu, Result},
    kv::{BatchRequest, IterOptions, KvService},
    metrics::{
        STATE_MACHINE_ADMIN, STATE_MACHINE_REPLAY, STATE_MACHINE_REPLAY_DURATION_SECONDS,
        STATE_MACHINE_REPLAY_ERRORS,
    },
    model::{
        AckOperation, AckType, ChangeInvisibleDurationOperation, CheckPoint,
        ConsumerGroupMetadata, ConsumerGroupSnapshot, Operation, OperationSnapshot, PopOperation,
        PopType,
    },
};

/// Operations a queue state machine exposes to the operation log and the
/// message-store facade.
#[async_trait]
pub trait MessageStateMachine: Send + Sync {
    fn topic_id(&self) -> u64;

    fn queue_id(&self) -> u32;

    /// Applies the operation logged at `operation_id`.
    async fn replay(&self, operation_id: u64, operation: &Operation) -> Result<()> {
        match operation {
            Operation::Pop(op) => self.replay_pop_operation(operation_id, op).await,
            Operation::Ack(op) => self.replay_ack_operation(operation_id, op).await,
            Operation::ChangeInvisibleDuration(op) => {
                self.replay_change_invisible_duration_operation(operation_id, op)
                    .await
            }
        }
    }

    async fn replay_pop_operation(&self, operation_id: u64, op: &PopOperation) -> Result<()>;

    async fn replay_ack_operation(&self, operation_id: u64, op: &AckOperation) -> Result<()>;

    async fn replay_change_invisible_duration_operation(
        &self,
        operation_id: u64,
        op: &ChangeInvisibleDurationOperation,
    ) -> Result<()>;

    async fn take_snapshot(&self) -> Result<OperationSnapshot>;

    async fn load_snapshot(&self, snapshot: OperationSnapshot) -> Result<()>;

    /// Drops every trace of the queue, in memory and in the KV store.
    async fn clear(&self) -> Result<()>;

    async fn consume_offset(&self, consumer_group_id: u64) -> u64;

    async fn ack_offset(&self, consumer_group_id: u64) -> u64;

    async fn retry_consume_offset(&self, consumer_group_id: u64) -> u64;

    async fn retry_ack_offset(&self, consumer_group_id: u64) -> u64;

    /// Whether ordered `offset` has an outstanding delivery to the group.
    async fn is_locked(&self, consumer_group_id: u64, offset: u64) -> Result<bool>;
}

/// Counters and committers of one consumer group.
#[derive(Debug)]
struct GroupState {
    metadata:  ConsumerGroupMetadata,
    ack:       AckCommitter,
    retry_ack: AckCommitter,
}

impl GroupState {
    fn new(consumer_group_id: u64, rebase_threshold: u64) -> Self {
        Self {
            metadata:  ConsumerGroupMetadata::new(consumer_group_id),
            ack:       AckCommitter::new(0, rebase_threshold),
            retry_ack: AckCommitter::new(0, rebase_threshold),
        }
    }

    fn restore(snapshot: &ConsumerGroupSnapshot, rebase_threshold: u64) -> Result<Self> {
        Ok(Self {
            metadata:  snapshot.metadata(),
            ack:       AckCommitter::restore(
                snapshot.ack_offset,
                snapshot.ack_base_offset,
                &snapshot.ack_bitmap,
                rebase_threshold,
            )?,
            retry_ack: AckCommitter::restore(
                snapshot.retry_ack_offset,
                snapshot.retry_ack_base_offset,
                &snapshot.retry_ack_bitmap,
                rebase_threshold,
            )?,
        })
    }

    fn snapshot(&self) -> Result<ConsumerGroupSnapshot> {
        let metadata = &self.metadata;
        Ok(ConsumerGroupSnapshot {
            consumer_group_id:     metadata.consumer_group_id,
            consume_offset:        metadata.consume_offset,
            ack_offset:            metadata.ack_offset,
            retry_consume_offset:  metadata.retry_consume_offset,
            retry_ack_offset:      metadata.retry_ack_offset,
            ack_base_offset:       self.ack.base_offset(),
            ack_bitmap:            self.ack.serialize_bitmap()?,
            retry_ack_base_offset: self.retry_ack.base_offset(),
            retry_ack_bitmap:      self.retry_ack.serialize_bitmap()?,
        })
    }

    const fn committer(&self, retry: bool) -> &AckCommitter {
        if retry { &self.retry_ack } else { &self.ack }
    }

    /// Feeds `offset` to the data or retry committer and mirrors an advanced
    /// watermark into the metadata.
    fn commit_ack(&mut self, retry: bool, offset: u64) -> Result<()> {
        let (committer, slot) = if retry {
            (&mut self.retry_ack, &mut self.metadata.retry_ack_offset)
        } else {
            (&mut self.ack, &mut self.metadata.ack_offset)
        };
        if let Some(watermark) = committer.commit_ack(offset)? {
            *slot = watermark;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    groups:               HashMap<u64, GroupState>,
    /// Operation id of the last successful replay.
    current_operation_id: Option<u64>,
}

impl QueueState {
    fn group_mut(&mut self, consumer_group_id: u64, rebase_threshold: u64) -> &mut GroupState {
        self.groups
            .entry(consumer_group_id)
            .or_insert_with(|| GroupState::new(consumer_group_id, rebase_threshold))
    }

    fn metadata(&self, consumer_group_id: u64) -> ConsumerGroupMetadata {
        self.groups
            .get(&consumer_group_id)
            .map_or_else(|| ConsumerGroupMetadata::new(consumer_group_id), |g| g.metadata)
    }

    /// Checks that every offset fits the committer window without creating
    /// the group.
    fn check_ack_window(
        &self,
        consumer_group_id: u64,
        retry: bool,
        mut offsets: impl Iterator<Item = u64>,
    ) -> Result<()> {
        match self.groups.get(&consumer_group_id) {
            Some(group) => {
                let committer = group.committer(retry);
                offsets.try_for_each(|offset| committer.check_window(offset))
            }
            None => {
                let committer = AckCommitter::new(0, u64::MAX);
                offsets.try_for_each(|offset| committer.check_window(offset))
            }
        }
    }
}

/// Which committer an acknowledged check point feeds. `None` when the ack
/// must not advance any watermark.
const fn ack_route(pop_type: PopType, ack_type: AckType) -> Option<bool> {
    match (pop_type, ack_type) {
        (PopType::Normal, _) | (PopType::Order, AckType::Normal) => Some(false),
        (PopType::Order, AckType::Timeout) => None,
        (PopType::Retry, _) => Some(true),
    }
}

/// Replays one queue's operation log into consumer state.
pub struct DefaultLogicQueueStateMachine<K: ?Sized> {
    topic_id: u64,
    queue_id: u32,
    kv:       Arc<K>,
    config:   StateMachineConfig,
    fence:    RwLock<()>,
    state:    Mutex<QueueState>,
}

impl<K: KvService + ?Sized> DefaultLogicQueueStateMachine<K> {
    pub fn new(topic_id: u64, queue_id: u32, kv: Arc<K>, config: StateMachineConfig) -> Self {
        Self {
            topic_id,
            queue_id,
            kv,
            config,
            fence: RwLock::new(()),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub const fn config(&self) -> &StateMachineConfig { &self.config }

    /// Operation id of the last applied replay, `None` before the first one.
    pub async fn current_operation_id(&self) -> Option<u64> {
        self.state.lock().await.current_operation_id
    }

    /// Full counters of a consumer group, zeroed when the group is unknown.
    pub async fn consumer_group_metadata(&self, consumer_group_id: u64) -> ConsumerGroupMetadata {
        self.state.lock().await.metadata(consumer_group_id)
    }

    /// Number of in-flight check points of this queue.
    pub async fn check_point_count(&self) -> Result<usize> {
        let _fence = self.fence.read().await;
        let mut count = 0;
        self.kv
            .iterate(
                &self.config.check_point_namespace,
                &self.queue_prefix(),
                &mut |_, _| {
                    count += 1;
                    ControlFlow::Continue(())
                },
            )
            .await
            .context(KvSnafu)?;
        Ok(count)
    }

    /// Decoded in-flight check points of this queue, by operation id.
    pub async fn list_check_points(&self) -> Result<Vec<CheckPoint>> {
        let _fence = self.fence.read().await;
        self.scan_check_points().await
    }

    /// Releases the KV view pinned by `snapshot` once its owner has
    /// persisted or discarded it.
    pub async fn release_snapshot(&self, snapshot: &OperationSnapshot) -> Result<bool> {
        let version = snapshot.kv_snapshot_version;
        let released = self.kv.release_snapshot(version).await.context(KvSnafu)?;
        debug!(
            topic_id = self.topic_id,
            queue_id = self.queue_id,
            kv_snapshot_version = version,
            released,
            "Released queue snapshot"
        );
        Ok(released)
    }

    fn queue_prefix(&self) -> IterOptions {
        IterOptions::with_prefix(check_point_prefix(self.topic_id, self.queue_id))
    }

    async fn scan_check_points(&self) -> Result<Vec<CheckPoint>> {
        let mut values = Vec::new();
        self.kv
            .iterate(
                &self.config.check_point_namespace,
                &self.queue_prefix(),
                &mut |_, value| {
                    values.push(Bytes::copy_from_slice(value));
                    ControlFlow::Continue(())
                },
            )
            .await
            .context(KvSnafu)?;
        values.iter().map(|value| CheckPoint::decode(value)).collect()
    }

    async fn find_check_point(&self, operation_id: u64) -> Result<CheckPoint> {
        let key = check_point_key(self.topic_id, self.queue_id, operation_id);
        let value = self
            .kv
            .get(&self.config.check_point_namespace, &key)
            .await
            .context(KvSnafu)?;
        match value {
            Some(value) => CheckPoint::decode(&value),
            None => CheckPointNotFoundSnafu {
                topic_id: self.topic_id,
                queue_id: self.queue_id,
                operation_id,
            }
            .fail(),
        }
    }

    async fn submit(&self, requests: Vec<BatchRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        self.kv.batch(requests).await.context(KvSnafu)
    }

    /// Rows that materialize `check_point` in all three namespaces.
    fn materialize(&self, check_point: &CheckPoint, requests: &mut Vec<BatchRequest>) {
        let config = &self.config;
        requests.push(BatchRequest::put(
            &config.check_point_namespace,
            check_point.key(),
            check_point.encode(),
        ));
        requests.push(BatchRequest::put(
            &config.timer_tag_namespace,
            check_point.timer_tag_key().encode(),
            check_point.receipt_handle().encode(),
        ));
        let owner = order_index_value(check_point.operation_id);
        requests.extend(check_point.order_index_keys().map(|key| {
            BatchRequest::put(&config.order_index_namespace, key, owner.clone())
        }));
    }

    /// Rows that remove `check_point` from all three namespaces.
    fn dematerialize(&self, check_point: &CheckPoint, requests: &mut Vec<BatchRequest>) {
        let config = &self.config;
        requests.push(BatchRequest::delete(
            &config.check_point_namespace,
            check_point.key(),
        ));
        requests.push(BatchRequest::delete(
            &config.timer_tag_namespace,
            check_point.timer_tag_key().encode(),
        ));
        requests.extend(
            check_point
                .order_index_keys()
                .map(|key| BatchRequest::delete(&config.order_index_namespace, key)),
        );
    }

    fn validate(
        &self,
        state: &QueueState,
        operation_id: u64,
        topic_id: u64,
        queue_id: u32,
    ) -> Result<()> {
        ensure!(
            topic_id == self.topic_id && queue_id == self.queue_id,
            IllegalArgumentSnafu {
                reason: format!(
                    "operation for queue {topic_id}/{queue_id} replayed into queue {}/{}",
                    self.topic_id, self.queue_id
                ),
            }
        );
        if let Some(cursor) = state.current_operation_id {
            ensure!(operation_id >= cursor, IllegalArgumentSnafu {
                reason: format!("operation id {operation_id} is behind replay cursor {cursor}"),
            });
        }
        Ok(())
    }

    /// Rejects an ordered pop whose offsets are held by another delivery.
    async fn ensure_unlocked(&self, operation_id: u64, op: &PopOperation) -> Result<()> {
        let check_point = CheckPoint::from_pop(operation_id, op);
        for key in check_point.order_index_keys() {
            let owner = self
                .kv
                .get(&self.config.order_index_namespace, &key)
                .await
                .context(KvSnafu)?;
            if let Some(owner) = owner {
                let owner = decode_order_index_value(&owner)?;
                ensure!(owner == operation_id, IllegalArgumentSnafu {
                    reason: format!(
                        "ordered offsets ending at {} are locked by operation {owner}",
                        op.offset
                    ),
                });
            }
        }
        Ok(())
    }

    async fn observe<T>(
        &self,
        kind: &'static str,
        operation_id: u64,
        replay: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        let start = Instant::now();
        let result = replay.await;
        STATE_MACHINE_REPLAY.with_label_values(&[kind]).inc();
        STATE_MACHINE_REPLAY_DURATION_SECONDS
            .with_label_values(&[kind])
            .observe(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            STATE_MACHINE_REPLAY_ERRORS.with_label_values(&[kind]).inc();
            error!(
                topic_id = self.topic_id,
                queue_id = self.queue_id,
                operation_id,
                operation = kind,
                error = %e.output_msg(),
                "Replay operation failed"
            );
        }
        result
    }
}

#[async_trait]
impl<K: KvService + ?Sized> MessageStateMachine for DefaultLogicQueueStateMachine<K> {
    fn topic_id(&self) -> u64 { self.topic_id }

    fn queue_id(&self) -> u32 { self.queue_id }

    async fn replay_pop_operation(&self, operation_id: u64, op: &PopOperation) -> Result<()> {
        self.observe("pop", operation_id, async {
            let _fence = self.fence.read().await;
            let mut state = self.state.lock().await;
            self.validate(&state, operation_id, op.topic_id, op.queue_id)?;
            op.validate()?;
            trace!(
                topic_id = op.topic_id,
                queue_id = op.queue_id,
                consumer_group_id = op.consumer_group_id,
                offset = op.offset,
                count = op.count,
                operation_id,
                pop_type = op.pop_type.as_str(),
                end_mark = op.is_end_mark,
                next_visible_timestamp = op.next_visible_timestamp(),
                "Replay pop operation"
            );

            let retry = op.pop_type == PopType::Retry;
            let threshold = self.config.ack_rebase_threshold;
            if op.is_end_mark {
                // Already acknowledged batch: only the counters move.
                state.check_ack_window(op.consumer_group_id, retry, op.offsets())?;
                let group = state.group_mut(op.consumer_group_id, threshold);
                group
                    .metadata
                    .advance_consume_offset(retry, op.offset.saturating_add(1));
                for offset in op.offsets() {
                    group.commit_ack(retry, offset)?;
                }
            } else {
                if op.pop_type == PopType::Order {
                    self.ensure_unlocked(operation_id, op).await?;
                }
                let check_point = CheckPoint::from_pop(operation_id, op);
                let order_rows = if op.pop_type == PopType::Order { op.count as usize } else { 0 };
                let mut requests = Vec::with_capacity(2 + order_rows);
                self.materialize(&check_point, &mut requests);
                self.submit(requests).await?;

                state
                    .group_mut(op.consumer_group_id, threshold)
                    .metadata
                    .advance_consume_offset(retry, op.offset.saturating_add(1));
            }
            state.current_operation_id = Some(operation_id);
            Ok(())
        })
        .await
    }

    async fn replay_ack_operation(&self, operation_id: u64, op: &AckOperation) -> Result<()> {
        self.observe("ack", operation_id, async {
            let _fence = self.fence.read().await;
            let mut state = self.state.lock().await;
            self.validate(&state, operation_id, op.topic_id, op.queue_id)?;
            trace!(
                topic_id = op.topic_id,
                queue_id = op.queue_id,
                operation_id,
                target = op.operation_id,
                ack_type = ?op.ack_type,
                "Replay ack operation"
            );

            let check_point = self.find_check_point(op.operation_id).await?;
            let route = ack_route(check_point.pop_type, op.ack_type);
            if let Some(retry) = route {
                state.check_ack_window(
                    check_point.consumer_group_id,
                    retry,
                    check_point.offsets(),
                )?;
            }

            let mut requests = Vec::new();
            self.dematerialize(&check_point, &mut requests);
            self.submit(requests).await?;

            if let Some(retry) = route {
                let threshold = self.config.ack_rebase_threshold;
                let group = state.group_mut(check_point.consumer_group_id, threshold);
                for offset in check_point.offsets() {
                    group.commit_ack(retry, offset)?;
                }
            }
            state.current_operation_id = Some(operation_id);
            Ok(())
        })
        .await
    }

    async fn replay_change_invisible_duration_operation(
        &self,
        operation_id: u64,
        op: &ChangeInvisibleDurationOperation,
    ) -> Result<()> {
        self.observe("change_invisible_duration", operation_id, async {
            let _fence = self.fence.read().await;
            let mut state = self.state.lock().await;
            self.validate(&state, operation_id, op.topic_id, op.queue_id)?;
            let next_visible_timestamp = op.next_visible_timestamp();
            trace!(
                topic_id = op.topic_id,
                queue_id = op.queue_id,
                operation_id,
                target = op.operation_id,
                invisible_duration = op.invisible_duration,
                next_visible_timestamp,
                "Replay change invisible duration operation"
            );

            let previous = self.find_check_point(op.operation_id).await?;
            let renewed = previous.with_next_visible_timestamp(next_visible_timestamp);
            let config = &self.config;
            let requests = vec![
                BatchRequest::delete(
                    &config.timer_tag_namespace,
                    previous.timer_tag_key().encode(),
                ),
                BatchRequest::put(&config.check_point_namespace, renewed.key(), renewed.encode()),
                BatchRequest::put(
                    &config.timer_tag_namespace,
                    renewed.timer_tag_key().encode(),
                    renewed.receipt_handle().encode(),
                ),
            ];
            self.submit(requests).await?;

            state.current_operation_id = Some(operation_id);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(topic_id = self.topic_id, queue_id = self.queue_id))]
    async fn take_snapshot(&self) -> Result<OperationSnapshot> {
        let _fence = self.fence.write().await;
        let state = self.state.lock().await;
        STATE_MACHINE_ADMIN.with_label_values(&["snapshot"]).inc();

        let mut consumer_groups = state
            .groups
            .values()
            .map(GroupState::snapshot)
            .collect::<Result<Vec<_>>>()?;
        consumer_groups.sort_by_key(|group| group.consumer_group_id);
        let check_points = self.scan_check_points().await?;
        let kv_snapshot_version = self.kv.take_snapshot().await.context(KvSnafu)?;

        info!(
            snapshot_end_offset = ?state.current_operation_id,
            kv_snapshot_version,
            consumer_groups = consumer_groups.len(),
            check_points = check_points.len(),
            "Took queue snapshot"
        );
        Ok(OperationSnapshot {
            snapshot_end_offset: state.current_operation_id,
            kv_snapshot_version,
            consumer_groups,
            check_points,
        })
    }

    #[tracing::instrument(
        skip_all,
        fields(
            topic_id = self.topic_id,
            queue_id = self.queue_id,
            snapshot_end_offset = ?snapshot.snapshot_end_offset
        )
    )]
    async fn load_snapshot(&self, snapshot: OperationSnapshot) -> Result<()> {
        let _fence = self.fence.write().await;
        let mut state = self.state.lock().await;
        STATE_MACHINE_ADMIN.with_label_values(&["load"]).inc();

        // Decode and validate everything before any write.
        let threshold = self.config.ack_rebase_threshold;
        let groups = snapshot
            .consumer_groups
            .iter()
            .map(|group| {
                GroupState::restore(group, threshold).map(|state| (group.consumer_group_id, state))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        for check_point in &snapshot.check_points {
            ensure!(
                check_point.topic_id == self.topic_id && check_point.queue_id == self.queue_id,
                IllegalArgumentSnafu {
                    reason: format!(
                        "snapshot check point {} belongs to queue {}/{}",
                        check_point.operation_id, check_point.topic_id, check_point.queue_id
                    ),
                }
            );
        }

        // Existing rows the snapshot does not hold verbatim are removed in
        // the same batch that writes the snapshot's rows.
        let live: HashMap<u64, &CheckPoint> = snapshot
            .check_points
            .iter()
            .map(|check_point| (check_point.operation_id, check_point))
            .collect();
        let mut requests = Vec::new();
        for existing in self.scan_check_points().await? {
            let kept = live.get(&existing.operation_id);
            if kept.is_none_or(|check_point| **check_point != existing) {
                self.dematerialize(&existing, &mut requests);
            }
        }
        if !requests.is_empty() {
            warn!(rows = requests.len(), "Dropping check point rows that differ from snapshot");
        }
        for check_point in &snapshot.check_points {
            self.materialize(check_point, &mut requests);
        }
        self.submit(requests).await?;

        state.groups = groups;
        state.current_operation_id = snapshot.snapshot_end_offset;
        info!(
            consumer_groups = state.groups.len(),
            check_points = snapshot.check_points.len(),
            "Loaded queue snapshot"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(topic_id = self.topic_id, queue_id = self.queue_id))]
    async fn clear(&self) -> Result<()> {
        let _fence = self.fence.write().await;
        let mut state = self.state.lock().await;
        STATE_MACHINE_ADMIN.with_label_values(&["clear"]).inc();

        let check_points = self.scan_check_points().await?;
        let mut requests = Vec::new();
        for check_point in &check_points {
            self.dematerialize(check_point, &mut requests);
        }
        self.submit(requests).await?;

        *state = QueueState::default();
        info!(check_points = check_points.len(), "Cleared queue state");
        Ok(())
    }

    async fn consume_offset(&self, consumer_group_id: u64) -> u64 {
        self.consumer_group_metadata(consumer_group_id).await.consume_offset
    }

    async fn ack_offset(&self, consumer_group_id: u64) -> u64 {
        self.consumer_group_metadata(consumer_group_id).await.ack_offset
    }

    async fn retry_consume_offset(&self, consumer_group_id: u64) -> u64 {
        self.consumer_group_metadata(consumer_group_id)
            .await
            .retry_consume_offset
    }

    async fn retry_ack_offset(&self, consumer_group_id: u64) -> u64 {
        self.consumer_group_metadata(consumer_group_id)
            .await
            .retry_ack_offset
    }

    async fn is_locked(&self, consumer_group_id: u64, offset: u64) -> Result<bool> {
        let _fence = self.fence.read().await;
        let key = order_index_key(consumer_group_id, self.topic_id, self.queue_id, offset);
        let owner = self
            .kv
            .get(&self.config.order_index_namespace, &key)
            .await
            .context(KvSnafu)?;
        Ok(owner.is_some())
    }
}
