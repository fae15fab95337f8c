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

//! Aggregation of out-of-order acknowledgments into a low-water mark.
//!
//! An [`AckCommitter`] tracks one delivery path of one consumer group. Acked
//! offsets are recorded as bits relative to `base_offset`; the watermark
//! `ack_offset` advances over every contiguous set bit. Bits below the
//! watermark are never read again, so once the watermark is
//! `rebase_threshold` past the base the bitmap is rebuilt relative to the
//! watermark. This keeps every index inside the bitmap's `u32` range.

use std::fmt;

use roaring::RoaringBitmap;
use snafu::{ResultExt, ensure};
use tracing::trace;

use crate::{
    error::{AckWindowOverflowSnafu, BitmapSnafu, Result},
    metrics,
};

/// Callback invoked with the new watermark after an advancing commit.
pub type AckListener = Box<dyn FnMut(u64) + Send>;

pub struct AckCommitter {
    ack_offset:       u64,
    base_offset:      u64,
    bitmap:           RoaringBitmap,
    rebase_threshold: u64,
    listener:         Option<AckListener>,
}

impl fmt::Debug for AckCommitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckCommitter")
            .field("ack_offset", &self.ack_offset)
            .field("base_offset", &self.base_offset)
            .field("pending", &self.bitmap.len())
            .field("rebase_threshold", &self.rebase_threshold)
            .finish_non_exhaustive()
    }
}

impl AckCommitter {
    /// Empty committer whose watermark and base start at `ack_offset`.
    pub fn new(ack_offset: u64, rebase_threshold: u64) -> Self {
        Self::from_parts(ack_offset, ack_offset, RoaringBitmap::new(), rebase_threshold)
    }

    pub const fn from_parts(
        ack_offset: u64,
        base_offset: u64,
        bitmap: RoaringBitmap,
        rebase_threshold: u64,
    ) -> Self {
        Self {
            ack_offset,
            base_offset,
            bitmap,
            rebase_threshold,
            listener: None,
        }
    }

    /// Rebuilds a committer from a buffer produced by
    /// [`AckCommitter::serialize_bitmap`].
    pub fn restore(
        ack_offset: u64,
        base_offset: u64,
        bitmap: &[u8],
        rebase_threshold: u64,
    ) -> Result<Self> {
        let bitmap = RoaringBitmap::deserialize_from(bitmap).context(BitmapSnafu)?;
        Ok(Self::from_parts(ack_offset, base_offset, bitmap, rebase_threshold))
    }

    #[must_use]
    pub fn with_listener(mut self, listener: impl FnMut(u64) + Send + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub const fn ack_offset(&self) -> u64 { self.ack_offset }

    pub const fn base_offset(&self) -> u64 { self.base_offset }

    /// Whether `offset` is acknowledged, either below the watermark or as a
    /// pending bit above it.
    pub fn is_acked(&self, offset: u64) -> bool {
        offset < self.ack_offset
            || offset
                .checked_sub(self.base_offset)
                .and_then(|index| u32::try_from(index).ok())
                .is_some_and(|index| self.bitmap.contains(index))
    }

    /// Number of acknowledged offsets still waiting above the watermark.
    pub fn pending(&self) -> u64 { self.bitmap.len() }

    /// Fails when `offset` cannot be recorded even after a rebase.
    pub fn check_window(&self, offset: u64) -> Result<()> {
        if offset < self.ack_offset {
            return Ok(());
        }
        ensure!(offset - self.ack_offset <= u64::from(u32::MAX), AckWindowOverflowSnafu {
            offset,
            ack_offset: self.ack_offset,
        });
        Ok(())
    }

    /// Records an acknowledgment of `offset`.
    ///
    /// Stale offsets below the watermark are ignored. Returns the new
    /// watermark when it advanced; the listener sees the same value once.
    pub fn commit_ack(&mut self, offset: u64) -> Result<Option<u64>> {
        if offset < self.ack_offset {
            return Ok(None);
        }
        self.check_window(offset)?;
        if offset - self.base_offset > u64::from(u32::MAX) {
            self.rebase();
        }
        let index = u32::try_from(offset - self.base_offset).map_err(|_| {
            AckWindowOverflowSnafu {
                offset,
                ack_offset: self.ack_offset,
            }
            .build()
        })?;
        self.bitmap.insert(index);

        let before = self.ack_offset;
        while u32::try_from(self.ack_offset - self.base_offset)
            .is_ok_and(|index| self.bitmap.contains(index))
        {
            self.ack_offset += 1;
        }
        if self.ack_offset == before {
            return Ok(None);
        }

        trace!(from = before, to = self.ack_offset, "Ack watermark advanced");
        if self.ack_offset - self.base_offset >= self.rebase_threshold {
            self.rebase();
        }
        if let Some(listener) = self.listener.as_mut() {
            listener(self.ack_offset);
        }
        Ok(Some(self.ack_offset))
    }

    /// Drops every bit below the watermark and re-anchors the bitmap at it.
    fn rebase(&mut self) {
        let shift = self.ack_offset - self.base_offset;
        self.bitmap = match u32::try_from(shift) {
            Ok(shift) => self
                .bitmap
                .iter()
                .filter(|&index| index >= shift)
                .map(|index| index - shift)
                .collect(),
            // Every representable index lies below the watermark.
            Err(_) => RoaringBitmap::new(),
        };
        self.base_offset = self.ack_offset;
        metrics::ACK_COMMITTER_REBASE.inc();
    }

    /// Portable serialization of the pending bits, relative to
    /// [`AckCommitter::base_offset`].
    pub fn serialize_bitmap(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.bitmap.serialized_size());
        self.bitmap.serialize_into(&mut buf).context(BitmapSnafu)?;
        Ok(buf)
    }
}
