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

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::{PopOperation, PopType, ReceiptHandle, batch_offsets};

/// Durable record of one delivered, unacknowledged batch.
///
/// Keyed by `(topic_id, queue_id, operation_id)`. `message_offset` is the
/// last offset of the batch, so the batch covers
/// `message_offset - count + 1 ..= message_offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPoint {
    pub topic_id:               u64,
    pub queue_id:               u32,
    pub message_offset:         u64,
    pub count:                  u32,
    pub consumer_group_id:      u64,
    pub operation_id:           u64,
    pub pop_type:               PopType,
    pub delivery_timestamp:     u64,
    pub next_visible_timestamp: u64,
    pub reconsume_count:        u32,
}

impl CheckPoint {
    pub fn from_pop(operation_id: u64, op: &PopOperation) -> Self {
        Self {
            topic_id: op.topic_id,
            queue_id: op.queue_id,
            message_offset: op.offset,
            count: op.count,
            consumer_group_id: op.consumer_group_id,
            operation_id,
            pop_type: op.pop_type,
            delivery_timestamp: op.operation_timestamp,
            next_visible_timestamp: op.next_visible_timestamp(),
            reconsume_count: op.reconsume_count,
        }
    }

    pub fn offsets(&self) -> RangeInclusive<u64> { batch_offsets(self.message_offset, self.count) }

    pub const fn receipt_handle(&self) -> ReceiptHandle {
        ReceiptHandle {
            consumer_group_id: self.consumer_group_id,
            topic_id:          self.topic_id,
            queue_id:          self.queue_id,
            message_offset:    self.message_offset,
            operation_id:      self.operation_id,
        }
    }

    /// Same check point, redeliverable from `next_visible_timestamp`.
    pub fn with_next_visible_timestamp(&self, next_visible_timestamp: u64) -> Self {
        Self {
            next_visible_timestamp,
            ..self.clone()
        }
    }
}
