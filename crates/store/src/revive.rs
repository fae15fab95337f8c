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

//! Read side of the timer tags, consumed by the redelivery scanner.

use std::ops::ControlFlow;

use bytes::Bytes;
use snafu::ResultExt;

use crate::{
    codec::TimerTagKey,
    config::StateMachineConfig,
    error::{KvSnafu, Result},
    kv::{IterOptions, KvService},
    model::ReceiptHandle,
};

/// A timer tag whose visibility time has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTimerTag {
    pub key:            TimerTagKey,
    pub receipt_handle: ReceiptHandle,
}

/// Returns up to `limit` timer tags with a visibility time before `now`,
/// earliest first.
pub async fn scan_due_timer_tags<K: KvService + ?Sized>(
    kv: &K,
    config: &StateMachineConfig,
    now: u64,
    limit: usize,
) -> Result<Vec<DueTimerTag>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let options = IterOptions::builder()
        .end(Bytes::copy_from_slice(&now.to_be_bytes()))
        .build();
    let mut rows = Vec::new();
    kv.iterate(&config.timer_tag_namespace, &options, &mut |key, value| {
        rows.push((Bytes::copy_from_slice(key), Bytes::copy_from_slice(value)));
        if rows.len() >= limit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .await
    .context(KvSnafu)?;

    rows.iter()
        .map(|(key, value)| -> Result<DueTimerTag> {
            Ok(DueTimerTag {
                key:            TimerTagKey::decode(key)?,
                receipt_handle: ReceiptHandle::decode(value)?,
            })
        })
        .collect()
}
