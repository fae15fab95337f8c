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

//! Storage core of a per-queue message broker.
//!
//! Consumption of each `(topic, queue)` is driven by an ordered log of pop,
//! ack and change-invisible-duration operations. Replaying that log through a
//! [`DefaultLogicQueueStateMachine`] yields consumer group offsets and three
//! KV tables: in-flight check points, redelivery timer tags and order index
//! locks.
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use tidemq_store::{
//!     DefaultLogicQueueStateMachine, MemoryKvService, MessageStateMachine, PopOperation, PopType,
//!     StateMachineConfig,
//! };
//!
//! let kv = Arc::new(MemoryKvService::new());
//! let machine = DefaultLogicQueueStateMachine::new(1, 0, kv, StateMachineConfig::default());
//! let pop = PopOperation::builder()
//!     .topic_id(1)
//!     .queue_id(0)
//!     .consumer_group_id(7)
//!     .offset(0)
//!     .pop_type(PopType::Normal)
//!     .operation_timestamp(now)
//!     .invisible_duration(30_000)
//!     .build();
//! machine.replay_pop_operation(0, &pop).await?;
//! assert_eq!(machine.consume_offset(7).await, 1);
//! ```

pub mod ack;
pub mod codec;
pub mod config;
pub mod error;
pub mod kv;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod revive;
mod state_machine;

pub use ack::AckCommitter;
pub use codec::TimerTagKey;
pub use config::StateMachineConfig;
pub use error::{Error, Result};
pub use kv::{BatchRequest, IterOptions, KvError, KvService, MemoryKvService};
pub use model::{
    AckOperation, AckType, ChangeInvisibleDurationOperation, CheckPoint, ConsumerGroupMetadata,
    ConsumerGroupSnapshot, Operation, OperationSnapshot, PopOperation, PopType, ReceiptHandle,
};
pub use registry::{QueueKey, StateMachineRegistry};
pub use revive::{DueTimerTag, scan_due_timer_tags};
pub use state_machine::{DefaultLogicQueueStateMachine, MessageStateMachine};
