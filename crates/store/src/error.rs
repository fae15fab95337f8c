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

use std::any::Any;

use snafu::Snafu;
use tidemq_error::{ErrorExt, StackError, StatusCode};

use crate::kv::KvError;

/// Result type for state machine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the consumption state machine.
///
/// Nothing here is retried internally. See [`StatusCode`] for how callers
/// should treat each class.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Illegal argument: {reason}"))]
    IllegalArgument {
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display(
        "Check point not found: topic_id={topic_id}, queue_id={queue_id}, \
         operation_id={operation_id}"
    ))]
    CheckPointNotFound {
        topic_id:     u64,
        queue_id:     u32,
        operation_id: u64,
        #[snafu(implicit)]
        loc:          snafu::Location,
    },

    #[snafu(display("Ack offset {offset} is out of the bitmap window at ack offset {ack_offset}"))]
    AckWindowOverflow {
        offset:     u64,
        ack_offset: u64,
        #[snafu(implicit)]
        loc:        snafu::Location,
    },

    #[snafu(display("KV store failure"))]
    Kv {
        source: KvError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to decode {what}: {reason}"))]
    Decode {
        what:   &'static str,
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to (de)serialize ack bitmap"))]
    Bitmap {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to encode operation snapshot"))]
    SnapshotEncode {
        source: bincode::error::EncodeError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to decode operation snapshot"))]
    SnapshotDecode {
        source: bincode::error::DecodeError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

impl Error {
    /// True when the addressed check point does not exist. The message-store
    /// facade reports this as an invalid or expired receipt handle.
    pub fn is_not_found(&self) -> bool { self.status_code() == StatusCode::NotFound }

    fn location(&self) -> &snafu::Location {
        match self {
            Self::IllegalArgument { loc, .. }
            | Self::CheckPointNotFound { loc, .. }
            | Self::AckWindowOverflow { loc, .. }
            | Self::Kv { loc, .. }
            | Self::Decode { loc, .. }
            | Self::Bitmap { loc, .. }
            | Self::SnapshotEncode { loc, .. }
            | Self::SnapshotDecode { loc, .. } => loc,
        }
    }
}

impl StackError for Error {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        buf.push(format!("{layer}: {self}, at {}", self.location()));
        if let Self::Kv { source, .. } = self {
            buf.push(format!("{}: {source}", layer + 1));
        }
    }

    fn next(&self) -> Option<&dyn StackError> { None }
}

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::IllegalArgument { .. } | Self::AckWindowOverflow { .. } => {
                StatusCode::IllegalArgument
            }
            Self::CheckPointNotFound { .. } => StatusCode::NotFound,
            Self::Kv { .. } => StatusCode::StorageIo,
            Self::Decode { .. }
            | Self::Bitmap { .. }
            | Self::SnapshotEncode { .. }
            | Self::SnapshotDecode { .. } => StatusCode::Serialization,
        }
    }

    fn as_any(&self) -> &dyn Any { self }
}
