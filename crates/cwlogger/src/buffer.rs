// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pending entries between flushes.
//!
//! Writers append under a short-lived mutex. The flusher swaps the whole
//! batch out in one step, so an entry appended concurrently with a flush
//! lands either in the captured batch or in the fresh one, never both.

use std::sync::Mutex;

/// One log line as shipped to the sink. The payload is always valid UTF-8,
/// so its length is the length of the message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    timestamp_millis: i64,
    payload: String,
}

impl LogEntry {
    /// Returns `None` for an empty payload; the sink rejects empty messages.
    /// Invalid UTF-8 sequences are replaced with U+FFFD.
    #[must_use]
    pub fn new(timestamp_millis: i64, payload: Vec<u8>) -> Option<Self> {
        if payload.is_empty() {
            return None;
        }
        let payload = match String::from_utf8(payload) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Some(LogEntry {
            timestamp_millis,
            payload,
        })
    }

    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload.into_bytes()
    }

    /// Payload size in bytes.
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.payload.len()
    }
}

#[derive(Debug, Default)]
pub struct EntryBuffer {
    entries: Mutex<Vec<LogEntry>>,
}

impl EntryBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: LogEntry) {
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("lock poisoned");
        entries.push(entry);
    }

    /// Takes every pending entry, in append order, and leaves an empty batch behind.
    pub fn swap(&self) -> Vec<LogEntry> {
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("lock poisoned");
        std::mem::take(&mut *entries)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let entries = self.entries.lock().expect("lock poisoned");
        entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
