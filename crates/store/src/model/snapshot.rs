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
use snafu::ResultExt;

use super::{CheckPoint, ConsumerGroupMetadata};
use crate::error::{Result, SnapshotDecodeSnafu, SnapshotEncodeSnafu};

/// Counters and serialized ack bitmaps of one consumer group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerGroupSnapshot {
    pub consumer_group_id:     u64,
    pub consume_offset:        u64,
    pub ack_offset:            u64,
    pub retry_consume_offset:  u64,
    pub retry_ack_offset:      u64,
    pub ack_base_offset:       u64,
    pub ack_bitmap:            Vec<u8>,
    pub retry_ack_base_offset: u64,
    pub retry_ack_bitmap:      Vec<u8>,
}

impl ConsumerGroupSnapshot {
    pub const fn metadata(&self) -> ConsumerGroupMetadata {
        ConsumerGroupMetadata {
            consumer_group_id:    self.consumer_group_id,
            consume_offset:       self.consume_offset,
            ack_offset:           self.ack_offset,
            retry_consume_offset: self.retry_consume_offset,
            retry_ack_offset:     self.retry_ack_offset,
        }
    }
}

/// Unit of recovery for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    /// Last operation id applied before the snapshot, `None` when nothing
    /// was replayed yet.
    pub snapshot_end_offset: Option<u64>,
    /// Token of the KV engine snapshot taken alongside.
    pub kv_snapshot_version: u64,
    pub consumer_groups:     Vec<ConsumerGroupSnapshot>,
    /// Check points still in flight at the snapshot.
    pub check_points:        Vec<CheckPoint>,
}

impl OperationSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .context(SnapshotEncodeSnafu)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (snapshot, _) =
            bincode::serde::decode_from_slice(buf, bincode::config::standard())
                .context(SnapshotDecodeSnafu)?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PopType;

    #[test]
    fn test_snapshot_bytes() {
        let snapshot = OperationSnapshot {
            snapshot_end_offset: Some(41),
            kv_snapshot_version: 3,
            consumer_groups:     vec![ConsumerGroupSnapshot {
                consumer_group_id: 9,
                consume_offset: 13,
                ack_offset: 10,
                ack_base_offset: 8,
                ack_bitmap: vec![1, 2, 3],
                ..Default::default()
            }],
            check_points:        vec![CheckPoint {
                topic_id:               1,
                queue_id:               2,
                message_offset:         12,
                count:                  3,
                consumer_group_id:      9,
                operation_id:           40,
                pop_type:               PopType::Order,
                delivery_timestamp:     100,
                next_visible_timestamp: 200,
                reconsume_count:        0,
            }],
        };

        let bytes = snapshot.encode().unwrap();
        assert_eq!(OperationSnapshot::decode(&bytes).unwrap(), snapshot);
        assert_eq!(snapshot.consumer_groups[0].metadata().ack_offset, 10);

        let err = OperationSnapshot::decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(err.to_string().contains("operation snapshot"));
    }
}
