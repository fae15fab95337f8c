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
use smart_default::SmartDefault;

/// Namespace holding one row per in-flight check point.
pub const DEFAULT_CHECK_POINT_NAMESPACE: &str = "check_point";
/// Namespace holding redelivery timer tags, ordered by visibility time.
pub const DEFAULT_TIMER_TAG_NAMESPACE: &str = "timer_tag";
/// Namespace holding the exclusivity rows of strictly ordered deliveries.
pub const DEFAULT_ORDER_INDEX_NAMESPACE: &str = "fifo_index";
/// Distance between the ack watermark and the bitmap base that triggers a
/// rebase.
pub const DEFAULT_ACK_REBASE_THRESHOLD: u64 = 1 << 16;

/// Options shared by every queue state machine of a store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct StateMachineConfig {
    #[default(_code = "DEFAULT_CHECK_POINT_NAMESPACE.to_owned()")]
    #[builder(default = DEFAULT_CHECK_POINT_NAMESPACE.to_owned(), into)]
    pub check_point_namespace: String,
    #[default(_code = "DEFAULT_TIMER_TAG_NAMESPACE.to_owned()")]
    #[builder(default = DEFAULT_TIMER_TAG_NAMESPACE.to_owned(), into)]
    pub timer_tag_namespace:   String,
    #[default(_code = "DEFAULT_ORDER_INDEX_NAMESPACE.to_owned()")]
    #[builder(default = DEFAULT_ORDER_INDEX_NAMESPACE.to_owned(), into)]
    pub order_index_namespace: String,
    /// Once an ack watermark is this far past its bitmap base, acknowledged
    /// bits below the watermark are dropped.
    #[default(_code = "DEFAULT_ACK_REBASE_THRESHOLD")]
    #[builder(default = DEFAULT_ACK_REBASE_THRESHOLD)]
    pub ack_rebase_threshold:  u64,
}
