// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships a captured batch to the sink.
//!
//! The sink rejects appends that are out of timestamp order or exceed its
//! request limits, so a batch is first stable-sorted by timestamp and then
//! split into requests that respect:
//!
//! 1. **Count limit**: at most `max_entries_per_request` entries
//! 2. **Size limit**: payloads plus per-entry overhead within `max_request_bytes`
//! 3. **Span limit**: first and last timestamp at most `max_request_span` apart
//!
//! An entry that can never fit is rejected and reported, never truncated.
//! Each request waits for the rate limiter, and a request that still fails
//! after the sink manager's retry is dropped and reported. There is no outer
//! retry loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::buffer::LogEntry;
use crate::constants;
use crate::errors::{FlushError, UploadError};
use crate::rate_limiter::RateLimiter;
use crate::sink::SinkLifecycleManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_entries_per_request: usize,
    /// Largest accepted payload for a single entry, overhead excluded.
    pub max_entry_bytes: usize,
    pub max_request_bytes: usize,
    pub per_entry_overhead_bytes: usize,
    pub max_request_span: Duration,
}

impl Default for UploadLimits {
    fn default() -> Self {
        UploadLimits {
            max_entries_per_request: constants::MAX_ENTRIES_PER_REQUEST,
            max_entry_bytes: constants::MAX_ENTRY_BYTES,
            max_request_bytes: constants::MAX_REQUEST_BYTES,
            per_entry_overhead_bytes: constants::PER_ENTRY_OVERHEAD_BYTES,
            max_request_span: constants::MAX_REQUEST_SPAN,
        }
    }
}

impl UploadLimits {
    fn entry_ceiling(&self) -> usize {
        self.max_entry_bytes.min(
            self.max_request_bytes
                .saturating_sub(self.per_entry_overhead_bytes),
        )
    }
}

/// Sorts `batch` by timestamp and splits it into requests within `limits`.
/// Entries over the single-entry ceiling come back as errors.
pub fn split_batch(
    mut batch: Vec<LogEntry>,
    limits: &UploadLimits,
) -> (Vec<Vec<LogEntry>>, Vec<UploadError>) {
    batch.sort_by_key(LogEntry::timestamp_millis);

    let entry_ceiling = limits.entry_ceiling();
    let max_entries = limits.max_entries_per_request.max(1);
    let span_millis = i64::try_from(limits.max_request_span.as_millis()).unwrap_or(i64::MAX);

    let mut requests = Vec::new();
    let mut rejected = Vec::new();
    let mut current: Vec<LogEntry> = Vec::new();
    let mut current_bytes = 0;

    for entry in batch {
        if entry.len() > entry_ceiling {
            rejected.push(UploadError::EntryTooLarge {
                size: entry.len(),
                max: entry_ceiling,
                timestamp_millis: entry.timestamp_millis(),
            });
            continue;
        }

        let size = entry.len() + limits.per_entry_overhead_bytes;
        if let Some(first) = current.first() {
            let too_long = entry.timestamp_millis().saturating_sub(first.timestamp_millis()) > span_millis;
            if current.len() >= max_entries
                || current_bytes + size > limits.max_request_bytes
                || too_long
            {
                requests.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
        }

        current_bytes += size;
        current.push(entry);
    }

    if !current.is_empty() {
        requests.push(current);
    }

    (requests, rejected)
}

#[derive(Debug, Default)]
pub struct UploadReport {
    pub requests_sent: usize,
    pub entries_sent: usize,
    pub failures: Vec<UploadError>,
}

impl UploadReport {
    pub fn into_result(self) -> Result<(), FlushError> {
        match FlushError::from_failures(self.failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct BatchUploader {
    manager: Arc<SinkLifecycleManager>,
    rate_limiter: Arc<RateLimiter>,
    limits: UploadLimits,
}

impl BatchUploader {
    #[must_use]
    pub fn new(
        manager: Arc<SinkLifecycleManager>,
        rate_limiter: Arc<RateLimiter>,
        limits: UploadLimits,
    ) -> Self {
        BatchUploader {
            manager,
            rate_limiter,
            limits,
        }
    }

    pub async fn upload(&self, batch: Vec<LogEntry>) -> UploadReport {
        let total = batch.len();
        let (requests, rejected) = split_batch(batch, &self.limits);

        for err in &rejected {
            warn!("CWLOGS | Rejecting entry: {}", err);
        }

        let mut report = UploadReport {
            failures: rejected,
            ..Default::default()
        };

        let mut pending = requests.into_iter();
        while let Some(request) = pending.next() {
            self.rate_limiter.ready().await;

            match self.manager.append(&request).await {
                Ok(_) => {
                    report.requests_sent += 1;
                    report.entries_sent += request.len();
                }
                Err(UploadError::Lifecycle { entries, source }) => {
                    // No point sending the rest until the sink can be set up again.
                    let remaining: usize = pending.by_ref().map(|r| r.len()).sum();
                    error!(
                        "CWLOGS | Dropping {} entries, {} is unavailable: {}",
                        entries + remaining,
                        self.manager.identity(),
                        source
                    );
                    report.failures.push(UploadError::Lifecycle {
                        entries: entries + remaining,
                        source,
                    });
                }
                Err(err) => report.failures.push(err),
            }
        }

        debug!(
            "CWLOGS | Uploaded {} of {} entries in {} requests",
            report.entries_sent, total, report.requests_sent
        );
        report
    }
}
