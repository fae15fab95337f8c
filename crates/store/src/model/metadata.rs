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

use serde::{Deserialize, Serialize};

/// Consumption counters of one consumer group on one queue.
///
/// Every counter only grows, and each ack offset stays at or below its
/// consume offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerGroupMetadata {
    pub consumer_group_id:    u64,
    pub consume_offset:       u64,
    pub ack_offset:           u64,
    pub retry_consume_offset: u64,
    pub retry_ack_offset:     u64,
}

impl ConsumerGroupMetadata {
    pub fn new(consumer_group_id: u64) -> Self {
        Self {
            consumer_group_id,
            ..Default::default()
        }
    }

    /// Raises the consume offset of the data or retry path to `next`.
    pub fn advance_consume_offset(&mut self, retry: bool, next: u64) {
        let slot = if retry {
            &mut self.retry_consume_offset
        } else {
            &mut self.consume_offset
        };
        *slot = (*slot).max(next);
    }
}
