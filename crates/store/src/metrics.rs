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

use std::sync::LazyLock;

use prometheus::{
    HistogramVec, IntCounter, IntCounterVec, register_histogram_vec, register_int_counter,
    register_int_counter_vec,
};

pub const OPERATION_LABEL: &str = "operation";
pub const ACTION_LABEL: &str = "action";

pub static STATE_MACHINE_REPLAY: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "state_machine_replay_total",
        "Total number of operations replayed into queue state machines",
        &[OPERATION_LABEL]
    )
    .unwrap()
});

pub static STATE_MACHINE_REPLAY_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "state_machine_replay_errors_total",
        "Total number of failed operation replays",
        &[OPERATION_LABEL]
    )
    .unwrap()
});

pub static STATE_MACHINE_REPLAY_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "state_machine_replay_duration_seconds",
        "Operation replay duration in seconds",
        &[OPERATION_LABEL]
    )
    .unwrap()
});

pub static STATE_MACHINE_ADMIN: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "state_machine_admin_total",
        "Total number of snapshot, load and clear runs",
        &[ACTION_LABEL]
    )
    .unwrap()
});

pub static ACK_COMMITTER_REBASE: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "ack_committer_rebase_total",
        "Total number of ack bitmap rebases"
    )
    .unwrap()
});
