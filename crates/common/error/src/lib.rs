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

//! Error taxonomy shared by every tidemq crate.
//!
//! Concrete error enums live next to the code that raises them (they are
//! `snafu` enums carrying a [`snafu::Location`]); this crate only defines the
//! [`StatusCode`] each of them maps onto and the traits used to walk a chain
//! of layered errors.

use std::{any::Any, error::Error as StdError, sync::Arc};

use serde::Serialize;
use strum::EnumProperty;

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusCode {
    /// The caller handed over something the receiver cannot interpret, e.g.
    /// an operation for another queue or an unknown subtype tag. Indicates a
    /// protocol or version mismatch.
    #[strum(props(retryable = "false", fatal = "true"))]
    IllegalArgument,
    /// The addressed record does not exist (duplicate replay, expired
    /// receipt handle).
    #[strum(props(retryable = "false", fatal = "false"))]
    NotFound,
    /// The storage engine failed.
    #[strum(props(retryable = "true", fatal = "false"))]
    StorageIo,
    /// Persisted bytes could not be decoded.
    #[strum(props(retryable = "false", fatal = "true"))]
    Serialization,
    #[strum(props(retryable = "false", fatal = "true"))]
    Internal,
    #[strum(props(retryable = "false", fatal = "false"))]
    Unknown,
}

impl StatusCode {
    fn flag(self, name: &str) -> bool {
        self.get_str(name)
            .and_then(|value| value.parse::<bool>().ok())
            .unwrap_or(false)
    }

    /// Whether the caller may resubmit the failed request as-is.
    pub fn is_retryable(self) -> bool { self.flag("retryable") }

    /// Whether the failure must take the owning component out of service.
    pub fn is_fatal(self) -> bool { self.flag("fatal") }
}

pub trait StackError: StdError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>);

    fn next(&self) -> Option<&dyn StackError>;

    fn last(&self) -> &dyn StackError
    where
        Self: Sized,
    {
        let Some(mut result) = self.next() else {
            return self;
        };
        while let Some(err) = result.next() {
            result = err;
        }
        result
    }

    fn transparent(&self) -> bool { false }
}

pub trait ErrorExt: StackError {
    fn status_code(&self) -> StatusCode { StatusCode::Unknown }

    fn as_any(&self) -> &dyn Any;

    fn output_msg(&self) -> String
    where
        Self: Sized,
    {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal => {
                format!("Internal error: {}", self.status_code())
            }
            _ => {
                let error = self.last();
                if let Some(external_error) = error.source() {
                    let mut root = external_error;
                    while let Some(source) = root.source() {
                        root = source;
                    }
                    if error.transparent() {
                        format!("{root}")
                    } else {
                        format!("{error}: {root}")
                    }
                } else {
                    format!("{error}")
                }
            }
        }
    }

    fn root_cause(&self) -> Option<&dyn StdError>
    where
        Self: Sized,
    {
        let error = self.last();
        let mut source = error.source()?;
        while let Some(next) = source.source() {
            source = next;
        }
        Some(source)
    }
}

impl<T: ?Sized + StackError> StackError for Arc<T> {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) { self.as_ref().debug_fmt(layer, buf) }

    fn next(&self) -> Option<&dyn StackError> { self.as_ref().next() }
}

impl<T: StackError> StackError for Box<T> {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) { self.as_ref().debug_fmt(layer, buf) }

    fn next(&self) -> Option<&dyn StackError> { self.as_ref().next() }
}

/// Renders the layered debug output of `err`, one line per layer.
pub fn format_stack(err: &dyn StackError) -> String {
    let mut buf = Vec::new();
    err.debug_fmt(0, &mut buf);
    buf.join("\n")
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;

    use super::*;

    #[test_case(StatusCode::IllegalArgument, false, true ; "illegal argument")]
    #[test_case(StatusCode::NotFound, false, false ; "not found")]
    #[test_case(StatusCode::StorageIo, true, false ; "storage io")]
    #[test_case(StatusCode::Serialization, false, true ; "serialization")]
    #[test_case(StatusCode::Unknown, false, false ; "unknown")]
    fn status_code_flags(code: StatusCode, retryable: bool, fatal: bool) {
        assert_eq!(code.is_retryable(), retryable);
        assert_eq!(code.is_fatal(), fatal);
    }

    #[test]
    fn status_code_round_trips_through_strings() {
        assert_eq!(StatusCode::StorageIo.to_string(), "storage_io");
        assert_eq!(
            StatusCode::from_str("not_found").unwrap(),
            StatusCode::NotFound
        );
    }
}
