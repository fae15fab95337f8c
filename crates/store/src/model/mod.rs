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

//! Value types flowing through the state machine.

mod check_point;
mod metadata;
mod operation;
mod receipt;
mod snapshot;

use std::ops::RangeInclusive;

pub use self::{
    check_point::CheckPoint,
    metadata::ConsumerGroupMetadata,
    operation::{
        AckOperation, AckType, ChangeInvisibleDurationOperation, Operation, PopOperation, PopType,
    },
    receipt::ReceiptHandle,
    snapshot::{ConsumerGroupSnapshot, OperationSnapshot},
};

/// Offsets covered by a batch whose last offset is `offset`.
///
/// Callers validate `1 <= count <= offset + 1` first; out of range counts are
/// clamped so the range never wraps.
pub(crate) fn batch_offsets(offset: u64, count: u32) -> RangeInclusive<u64> {
    offset.saturating_sub(u64::from(count.max(1)) - 1)..=offset
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(12, 3, 10..=12 ; "batch of three")]
    #[test_case(0, 1, 0..=0 ; "single at zero")]
    #[test_case(5, 1, 5..=5 ; "single")]
    #[test_case(2, 9, 0..=2 ; "count clamped at zero")]
    fn test_batch_offsets(offset: u64, count: u32, expected: RangeInclusive<u64>) {
        assert_eq!(batch_offsets(offset, count), expected);
    }
}
