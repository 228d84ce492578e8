// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory sink and clock shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::buffer::LogEntry;
use crate::clock::Clock;
use crate::errors::SinkError;
use crate::sink::{RemoteLogSink, StreamDescription};

#[derive(Debug)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

pub fn entries(timestamps: &[i64]) -> Vec<LogEntry> {
    timestamps
        .iter()
        .map(|&ts| LogEntry::new(ts, format!("entry {ts}").into_bytes()).unwrap())
        .collect()
}

#[derive(Debug, Clone)]
pub struct PutCall {
    pub token: Option<String>,
    pub timestamps: Vec<i64>,
    pub payloads: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    // None until the group exists
    streams: Option<Vec<StreamDescription>>,
    describe_calls: usize,
    groups_created: usize,
    streams_created: usize,
    create_error: Option<SinkError>,
    put_results: VecDeque<Result<Option<String>, SinkError>>,
    puts: Vec<PutCall>,
    put_delay: Option<Duration>,
}

/// Records every call and replays scripted `put_events` results. Without a
/// script, appends succeed and hand out `token-<n>`.
#[derive(Debug, Default)]
pub struct RecordingSink {
    inner: Mutex<Inner>,
}

impl RecordingSink {
    pub fn with_stream(name: &str, token: Option<&str>) -> Self {
        let sink = Self::default();
        sink.inner.lock().unwrap().streams = Some(vec![StreamDescription {
            name: name.to_string(),
            upload_token: token.map(str::to_string),
        }]);
        sink
    }

    pub fn fail_creates_with(&self, error: SinkError) {
        self.inner.lock().unwrap().create_error = Some(error);
    }

    pub fn push_put_result(&self, result: Result<Option<String>, SinkError>) {
        self.inner.lock().unwrap().put_results.push_back(result);
    }

    pub fn set_put_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().put_delay = Some(delay);
    }

    pub fn describe_calls(&self) -> usize {
        self.inner.lock().unwrap().describe_calls
    }

    /// (groups created, streams created)
    pub fn created(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.groups_created, inner.streams_created)
    }

    pub fn puts(&self) -> Vec<PutCall> {
        self.inner.lock().unwrap().puts.clone()
    }

    pub fn shipped_timestamps(&self) -> Vec<i64> {
        self.puts()
            .into_iter()
            .flat_map(|put| put.timestamps)
            .collect()
    }
}

#[async_trait]
impl RemoteLogSink for RecordingSink {
    async fn describe_streams(
        &self,
        _group: &str,
        stream_prefix: &str,
    ) -> Result<Vec<StreamDescription>, SinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner.describe_calls += 1;
        match &inner.streams {
            Some(streams) => Ok(streams
                .iter()
                .filter(|s| s.name.starts_with(stream_prefix))
                .cloned()
                .collect()),
            None => Err(SinkError::NotFound),
        }
    }

    async fn create_group(&self, _group: &str) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.create_error.clone() {
            return Err(err);
        }
        inner.groups_created += 1;
        inner.streams.get_or_insert_with(Vec::new);
        Ok(())
    }

    async fn create_stream(&self, _group: &str, stream: &str) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.create_error.clone() {
            return Err(err);
        }
        inner.streams_created += 1;
        inner
            .streams
            .get_or_insert_with(Vec::new)
            .push(StreamDescription {
                name: stream.to_string(),
                upload_token: None,
            });
        Ok(())
    }

    async fn put_events(
        &self,
        _group: &str,
        _stream: &str,
        token: Option<&str>,
        entries: &[LogEntry],
    ) -> Result<Option<String>, SinkError> {
        let delay = self.inner.lock().unwrap().put_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.puts.push(PutCall {
            token: token.map(str::to_string),
            timestamps: entries.iter().map(LogEntry::timestamp_millis).collect(),
            payloads: entries.iter().map(|e| e.payload().to_vec()).collect(),
        });
        let n = inner.puts.len();
        inner
            .put_results
            .pop_front()
            .unwrap_or_else(|| Ok(Some(format!("token-{n}"))))
    }
}
