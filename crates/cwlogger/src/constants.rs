// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Limits enforced by CloudWatch Logs style sinks and engine defaults.
//!
//! The sink rejects a whole `PutLogEvents` request when any of these limits
//! is violated, so the uploader splits batches before sending.

use std::time::Duration;

/// Maximum cumulative size of one request, counted as the sum of every
/// message plus [`PER_ENTRY_OVERHEAD_BYTES`] per message.
pub const MAX_REQUEST_BYTES: usize = 1_048_576;

/// Maximum number of entries in one request.
pub const MAX_ENTRIES_PER_REQUEST: usize = 10_000;

/// Fixed accounting overhead the sink adds to every message.
pub const PER_ENTRY_OVERHEAD_BYTES: usize = 26;

/// Maximum size of a single message, overhead included.
pub const MAX_ENTRY_BYTES: usize = 262_144 - PER_ENTRY_OVERHEAD_BYTES;

/// Entries in one request may not span more than this.
pub const MAX_REQUEST_SPAN: Duration = Duration::from_secs(24 * 60 * 60);

/// Default time between scheduled flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of sink calls allowed per rate window.
///
/// CloudWatch Logs historically allowed five `PutLogEvents` calls per
/// second per stream.
pub const DEFAULT_RATE_LIMIT: usize = 5;

/// Default rate window.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Default bound on the final flush performed by `Logger::shutdown`.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts per sub-batch: the original send plus one retry.
pub const DEFAULT_APPEND_ATTEMPTS: usize = 2;

/// Maximum length of a group or stream name.
pub const MAX_SINK_NAME_LEN: usize = 512;

/// Default timeout for one HTTP request to the sink.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest accepted flush interval. Longer periods overflow the timer.
pub const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest accepted rate limit window.
pub const MAX_RATE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
