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

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{DecodeSnafu, Error, Result};

/// Token addressing one in-flight delivery, handed to the consumer for ack
/// and invisibility renewal.
///
/// Stored as the value of the delivery's timer tag. Renders as lowercase hex
/// of [`ReceiptHandle::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle {
    pub consumer_group_id: u64,
    pub topic_id:          u64,
    pub queue_id:          u32,
    pub message_offset:    u64,
    pub operation_id:      u64,
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.encode() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ReceiptHandle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ensure!(
            s.len() == Self::ENCODED_LEN * 2 && s.is_ascii(),
            DecodeSnafu {
                what:   "receipt handle",
                reason: format!("expected {} hex digits", Self::ENCODED_LEN * 2),
            }
        );
        let bytes = (0..s.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| {
                    DecodeSnafu {
                        what:   "receipt handle",
                        reason: e.to_string(),
                    }
                    .build()
                })
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::decode(&bytes)
    }
}
