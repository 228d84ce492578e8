// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for every stage of the engine.
//!
//! Errors local to one write ([`EncodeError`]) are returned to the writer.
//! Errors local to one batch ([`UploadError`], collected in [`FlushError`])
//! are only observable on the flush path.

use std::time::Duration;

/// Fatal errors raised while building a [`crate::logger::Logger`].
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid sink name: {0}")]
    InvalidSinkName(String),

    #[error("A tokio runtime is required: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// A value could not be serialized into a log entry. The buffer is untouched.
#[derive(Debug, thiserror::Error)]
#[error("Failed to encode log entry: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Errors reported by a [`crate::sink::RemoteLogSink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The upload token did not match. `expected` is the token the sink wants.
    #[error("Invalid upload token, sink expects {expected:?}")]
    InvalidToken { expected: Option<String> },

    /// The same batch was already accepted with the given token.
    #[error("Batch already accepted, sink expects {expected:?}")]
    AlreadyAccepted { expected: Option<String> },

    #[error("Group or stream not found")]
    NotFound,

    #[error("Resource already exists")]
    AlreadyExists,

    #[error("Request throttled by sink")]
    Throttled,

    #[error("{0}")]
    Other(String),
}

/// The group or stream could not be verified or created.
#[derive(Debug, thiserror::Error)]
pub enum SinkLifecycleError {
    #[error("Failed to describe streams of group {group}: {source}")]
    Describe { group: String, source: SinkError },

    #[error("Failed to create group {group}: {source}")]
    CreateGroup { group: String, source: SinkError },

    #[error("Failed to create stream {group}/{stream}: {source}")]
    CreateStream {
        group: String,
        stream: String,
        source: SinkError,
    },
}

/// A single entry or sub-batch that was dropped during upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Entry of {size} bytes exceeds the {max} byte limit")]
    EntryTooLarge {
        size: usize,
        max: usize,
        timestamp_millis: i64,
    },

    #[error("Dropped {entries} entries, sink unavailable: {source}")]
    Lifecycle {
        entries: usize,
        source: SinkLifecycleError,
    },

    #[error("Sink rejected {entries} entries after {attempts} attempts: {source}")]
    Rejected {
        entries: usize,
        attempts: usize,
        source: SinkError,
    },
}

impl UploadError {
    /// Number of entries lost because of this error.
    #[must_use]
    pub fn dropped_entries(&self) -> usize {
        match self {
            UploadError::EntryTooLarge { .. } => 1,
            UploadError::Lifecycle { entries, .. } | UploadError::Rejected { entries, .. } => {
                *entries
            }
        }
    }
}

/// Every failure of one flush. Returned by `Logger::shutdown` and
/// `Logger::flush_now`; logged and discarded by scheduled flushes.
#[derive(Debug, thiserror::Error)]
#[error("Flush dropped {dropped_entries} entries ({} failures)", .failures.len())]
pub struct FlushError {
    pub failures: Vec<UploadError>,
    pub dropped_entries: usize,
}

impl FlushError {
    /// Returns `None` when there is nothing to report.
    #[must_use]
    pub fn from_failures(failures: Vec<UploadError>) -> Option<Self> {
        if failures.is_empty() {
            return None;
        }
        let dropped_entries = failures.iter().map(UploadError::dropped_entries).sum();
        Some(FlushError {
            failures,
            dropped_entries,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("Final flush failed: {0}")]
    Flush(#[from] FlushError),

    #[error("Final flush did not finish within {0:?}")]
    Timeout(Duration),
}
