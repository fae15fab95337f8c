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

//! Logging bootstrap for tidemq processes and tests.
//!
//! ```rust,no_run
//! use tidemq_common_telemetry::logging::{LoggingOptions, init_global_logging};
//!
//! let opts = LoggingOptions::builder().dir("logs").level("info").build();
//! let _guards = init_global_logging("tidemq", &opts);
//! tracing::info!("broker started");
//! ```

pub mod logging;

pub use logging::{LogFormat, LoggingOptions, init_default_ut_logging, init_global_logging};
