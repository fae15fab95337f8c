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
use snafu::ensure;

use super::batch_offsets;
use crate::error::{IllegalArgumentSnafu, Result};

/// Delivery path of a pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PopType {
    /// At-least-once delivery from the data stream.
    Normal = 0,
    /// Strictly ordered delivery; holds the order index while in flight.
    Order = 1,
    /// Redelivery from the retry stream.
    Retry = 2,
}

impl PopType {
    pub const fn as_u8(self) -> u8 { self as u8 }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Order => "order",
            Self::Retry => "retry",
        }
    }
}

impl TryFrom<u8> for PopType {
    type Error = crate::error::Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Order),
            2 => Ok(Self::Retry),
            _ => IllegalArgumentSnafu {
                reason: format!("unknown pop type tag {tag}"),
            }
            .fail(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckType {
    /// The consumer processed the message.
    #[default]
    Normal,
    /// The delivery expired and the message goes back for redelivery.
    Timeout,
}

/// Delivery of `count` messages ending at `offset` to one consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct PopOperation {
    pub topic_id:            u64,
    pub queue_id:            u32,
    pub consumer_group_id:   u64,
    /// Last offset of the batch.
    pub offset:              u64,
    #[builder(default = 1)]
    pub count:               u32,
    pub pop_type:            PopType,
    /// Wall clock of the pop in milliseconds.
    pub operation_timestamp: u64,
    pub invisible_duration:  u64,
    /// The batch is already acknowledged; only offsets move.
    #[builder(default)]
    pub is_end_mark:         bool,
    #[builder(default)]
    pub reconsume_count:     u32,
}

impl PopOperation {
    pub fn offsets(&self) -> RangeInclusive<u64> { batch_offsets(self.offset, self.count) }

    pub const fn next_visible_timestamp(&self) -> u64 {
        self.operation_timestamp.saturating_add(self.invisible_duration)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(self.count >= 1, IllegalArgumentSnafu {
            reason: "pop count must be at least 1",
        });
        ensure!(
            u64::from(self.count) <= self.offset.saturating_add(1),
            IllegalArgumentSnafu {
                reason: format!(
                    "pop count {} exceeds the offsets ending at {}",
                    self.count, self.offset
                ),
            }
        );
        Ok(())
    }
}

/// Acknowledgment of the check point written by pop `operation_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct AckOperation {
    pub topic_id:            u64,
    pub queue_id:            u32,
    /// Operation id of the pop being acknowledged.
    pub operation_id:        u64,
    #[builder(default)]
    pub ack_type:            AckType,
    #[builder(default)]
    pub operation_timestamp: u64,
}

/// Moves the redelivery time of the check point written by `operation_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct ChangeInvisibleDurationOperation {
    pub topic_id:            u64,
    pub queue_id:            u32,
    pub operation_id:        u64,
    pub operation_timestamp: u64,
    pub invisible_duration:  u64,
}

impl ChangeInvisibleDurationOperation {
    pub const fn next_visible_timestamp(&self) -> u64 {
        self.operation_timestamp.saturating_add(self.invisible_duration)
    }
}

/// One entry of a queue's operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_more::From)]
pub enum Operation {
    Pop(PopOperation),
    Ack(AckOperation),
    ChangeInvisibleDuration(ChangeInvisibleDurationOperation),
}

impl Operation {
    pub const fn topic_id(&self) -> u64 {
        match self {
            Self::Pop(op) => op.topic_id,
            Self::Ack(op) => op.topic_id,
            Self::ChangeInvisibleDuration(op) => op.topic_id,
        }
    }

    pub const fn queue_id(&self) -> u32 {
        match self {
            Self::Pop(op) => op.queue_id,
            Self::Ack(op) => op.queue_id,
            Self::ChangeInvisibleDuration(op) => op.queue_id,
        }
    }

    /// Short name used in logs and metric labels.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pop(_) => "pop",
            Self::Ack(_) => "ack",
            Self::ChangeInvisibleDuration(_) => "change_invisible_duration",
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn pop(offset: u64, count: u32) -> PopOperation {
        PopOperation::builder()
            .topic_id(1)
            .queue_id(2)
            .consumer_group_id(3)
            .offset(offset)
            .count(count)
            .pop_type(PopType::Normal)
            .operation_timestamp(1_000)
            .invisible_duration(500)
            .build()
    }

    #[test_case(0 => Ok(PopType::Normal) ; "normal")]
    #[test_case(1 => Ok(PopType::Order) ; "order")]
    #[test_case(2 => Ok(PopType::Retry) ; "retry")]
    #[test_case(3 => Err(()) ; "unknown")]
    fn test_pop_type_tag(tag: u8) -> std::result::Result<PopType, ()> {
        PopType::try_from(tag).map_err(|_| ())
    }

    #[test]
    fn test_pop_type_round_trip() {
        for ty in [PopType::Normal, PopType::Order, PopType::Retry] {
            assert_eq!(PopType::try_from(ty.as_u8()).unwrap(), ty);
        }
    }

    #[test_case(12, 3, true ; "batch")]
    #[test_case(0, 1, true ; "first offset")]
    #[test_case(5, 0, false ; "empty batch")]
    #[test_case(1, 3, false ; "batch before zero")]
    fn test_pop_validation(offset: u64, count: u32, valid: bool) {
        assert_eq!(pop(offset, count).validate().is_ok(), valid);
    }

    #[test]
    fn test_pop_derived_fields() {
        let op = pop(12, 3);
        assert_eq!(op.offsets(), 10..=12);
        assert_eq!(op.next_visible_timestamp(), 1_500);

        let op: Operation = op.into();
        assert_eq!(op.kind(), "pop");
        assert_eq!((op.topic_id(), op.queue_id()), (1, 2));
    }
}
