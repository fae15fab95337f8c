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

//! Byte layouts of the three state machine tables.
//!
//! Every integer is big-endian and fixed width, so the lexicographic order of
//! a key equals the numeric order of its fields.
//!
//! ```text
//! check point key   ┌─────────────┬─────────────┬──────────────────┐
//!                   │ topic (8B)  │ queue (4B)  │ operation id (8B)│
//!                   └─────────────┴─────────────┴──────────────────┘
//! timer tag key     ┌───────────────────┬────────────┬────────────┬──────────────────┐
//!                   │ next visible (8B) │ topic (8B) │ queue (4B) │ operation id (8B)│
//!                   └───────────────────┴────────────┴────────────┴──────────────────┘
//! order index key   ┌────────────┬────────────┬────────────┬─────────────┐
//!                   │ group (8B) │ topic (8B) │ queue (4B) │ offset (8B) │
//!                   └────────────┴────────────┴────────────┴─────────────┘
//! ```
//!
//! Values: a check point row holds a versioned [`CheckPoint`] record, a timer
//! tag holds the [`ReceiptHandle`] of the delivery, an order index row holds
//! the owning operation id.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::ensure;

use crate::{
    error::{DecodeSnafu, Result},
    model::{CheckPoint, PopType, ReceiptHandle},
};

/// Length of a `(topic, queue)` key prefix.
pub const QUEUE_PREFIX_LEN: usize = 8 + 4;
pub const CHECK_POINT_KEY_LEN: usize = QUEUE_PREFIX_LEN + 8;
pub const TIMER_TAG_KEY_LEN: usize = 8 + QUEUE_PREFIX_LEN + 8;
pub const ORDER_INDEX_KEY_LEN: usize = 8 + QUEUE_PREFIX_LEN + 8;

const CHECK_POINT_FORMAT_VERSION: u8 = 1;
const CHECK_POINT_VALUE_LEN: usize = 1 + 8 + 4 + 8 + 4 + 8 + 8 + 1 + 8 + 8 + 4;

/// Prefix shared by every check point row of one queue.
pub fn check_point_prefix(topic_id: u64, queue_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(QUEUE_PREFIX_LEN);
    buf.put_u64(topic_id);
    buf.put_u32(queue_id);
    buf.freeze()
}

pub fn check_point_key(topic_id: u64, queue_id: u32, operation_id: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHECK_POINT_KEY_LEN);
    buf.put_u64(topic_id);
    buf.put_u32(queue_id);
    buf.put_u64(operation_id);
    buf.freeze()
}

pub fn order_index_key(consumer_group_id: u64, topic_id: u64, queue_id: u32, offset: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ORDER_INDEX_KEY_LEN);
    buf.put_u64(consumer_group_id);
    buf.put_u64(topic_id);
    buf.put_u32(queue_id);
    buf.put_u64(offset);
    buf.freeze()
}

pub fn order_index_value(operation_id: u64) -> Bytes {
    Bytes::copy_from_slice(&operation_id.to_be_bytes())
}

pub fn decode_order_index_value(mut value: &[u8]) -> Result<u64> {
    ensure_len("order index value", value, 8)?;
    Ok(value.get_u64())
}

fn ensure_len(what: &'static str, buf: &[u8], expected: usize) -> Result<()> {
    ensure!(buf.len() == expected, DecodeSnafu {
        what,
        reason: format!("expected {expected} bytes, got {}", buf.len()),
    });
    Ok(())
}

/// Decoded key of a timer tag row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerTagKey {
    pub next_visible_timestamp: u64,
    pub topic_id:               u64,
    pub queue_id:               u32,
    pub operation_id:           u64,
}

impl TimerTagKey {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TIMER_TAG_KEY_LEN);
        buf.put_u64(self.next_visible_timestamp);
        buf.put_u64(self.topic_id);
        buf.put_u32(self.queue_id);
        buf.put_u64(self.operation_id);
        buf.freeze()
    }

    pub fn decode(mut key: &[u8]) -> Result<Self> {
        ensure_len("timer tag key", key, TIMER_TAG_KEY_LEN)?;
        Ok(Self {
            next_visible_timestamp: key.get_u64(),
            topic_id:               key.get_u64(),
            queue_id:               key.get_u32(),
            operation_id:           key.get_u64(),
        })
    }
}

impl ReceiptHandle {
    pub const ENCODED_LEN: usize = 8 + 8 + 4 + 8 + 8;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        buf.put_u64(self.consumer_group_id);
        buf.put_u64(self.topic_id);
        buf.put_u32(self.queue_id);
        buf.put_u64(self.message_offset);
        buf.put_u64(self.operation_id);
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        ensure_len("receipt handle", buf, Self::ENCODED_LEN)?;
        Ok(Self {
            consumer_group_id: buf.get_u64(),
            topic_id:          buf.get_u64(),
            queue_id:          buf.get_u32(),
            message_offset:    buf.get_u64(),
            operation_id:      buf.get_u64(),
        })
    }
}

impl CheckPoint {
    pub fn key(&self) -> Bytes { check_point_key(self.topic_id, self.queue_id, self.operation_id) }

    pub const fn timer_tag_key(&self) -> TimerTagKey {
        TimerTagKey {
            next_visible_timestamp: self.next_visible_timestamp,
            topic_id:               self.topic_id,
            queue_id:               self.queue_id,
            operation_id:           self.operation_id,
        }
    }

    /// Order index keys of every offset in the batch. Empty unless the check
    /// point is ordered.
    pub fn order_index_keys(&self) -> impl Iterator<Item = Bytes> + '_ {
        let rows = if self.pop_type == PopType::Order { usize::MAX } else { 0 };
        self.offsets()
            .take(rows)
            .map(|offset| {
                order_index_key(self.consumer_group_id, self.topic_id, self.queue_id, offset)
            })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHECK_POINT_VALUE_LEN);
        buf.put_u8(CHECK_POINT_FORMAT_VERSION);
        buf.put_u64(self.topic_id);
        buf.put_u32(self.queue_id);
        buf.put_u64(self.message_offset);
        buf.put_u32(self.count);
        buf.put_u64(self.consumer_group_id);
        buf.put_u64(self.operation_id);
        buf.put_u8(self.pop_type.as_u8());
        buf.put_u64(self.delivery_timestamp);
        buf.put_u64(self.next_visible_timestamp);
        buf.put_u32(self.reconsume_count);
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        ensure_len("check point", buf, CHECK_POINT_VALUE_LEN)?;
        let version = buf.get_u8();
        ensure!(version == CHECK_POINT_FORMAT_VERSION, DecodeSnafu {
            what:   "check point",
            reason: format!("unsupported format version {version}"),
        });
        let topic_id = buf.get_u64();
        let queue_id = buf.get_u32();
        let message_offset = buf.get_u64();
        let count = buf.get_u32();
        let consumer_group_id = buf.get_u64();
        let operation_id = buf.get_u64();
        let tag = buf.get_u8();
        let pop_type = PopType::try_from(tag).map_err(|_| {
            DecodeSnafu {
                what:   "check point",
                reason: format!("unknown pop type tag {tag}"),
            }
            .build()
        })?;
        Ok(Self {
            topic_id,
            queue_id,
            message_offset,
            count,
            consumer_group_id,
            operation_id,
            pop_type,
            delivery_timestamp: buf.get_u64(),
            next_visible_timestamp: buf.get_u64(),
            reconsume_count: buf.get_u32(),
        })
    }
}
