// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # cwlogger
//!
//! Batched, rate-limited shipping of log entries to a CloudWatch Logs style
//! sink that enforces ordered, token-gated appends.
//!
//! ## Architecture
//!
//! - [`logger`]: the engine application code writes to
//! - [`encoders`]: raw, JSON, error and HTTP round-trip entries
//! - [`buffer`]: pending entries, swapped out at every flush
//! - [`flusher`]: the background flush loop and shutdown
//! - [`uploader`]: sorting, request splitting and rate-limited sends
//! - [`sink`]: the remote sink trait and group/stream/token lifecycle
//! - [`http_sink`]: the CloudWatch Logs JSON protocol over `reqwest`

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod clock;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod encoders;
pub mod errors;
pub mod flusher;
pub mod http_sink;
pub mod logger;
pub mod rate_limiter;
pub mod retry;
pub mod sink;
pub mod uploader;

#[cfg(test)]
mod test_support;

pub use config::{HttpSinkConfig, LoggerConfig, RateBudget};
pub use encoders::{CallSite, RequestSummary, ResponseSummary};
pub use errors::{ConstructionError, EncodeError, FlushError, ShutdownError, SinkError};
pub use http_sink::HttpLogSink;
pub use logger::Logger;
pub use sink::{RemoteLogSink, SinkIdentity};
