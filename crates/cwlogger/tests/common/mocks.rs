// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory sink that enforces upload tokens and ordering like the real service

use async_trait::async_trait;
use cwlogger::buffer::LogEntry;
use cwlogger::sink::{RemoteLogSink, StreamDescription};
use cwlogger::SinkError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct Stream {
    token: Option<String>,
    events: Vec<(i64, String)>,
    appends: usize,
}

#[derive(Debug, Default)]
struct State {
    groups: HashMap<String, HashMap<String, Stream>>,
    put_calls: usize,
    put_delay: Option<Duration>,
}

/// Mock sink: rejects stale tokens with the expected one and unsorted batches
#[derive(Debug, Default)]
pub struct MockLogSink {
    state: Mutex<State>,
}

#[allow(dead_code)]
impl MockLogSink {
    /// Sink where `group/stream` already exists with `token`
    pub fn with_stream(group: &str, stream: &str, token: Option<&str>) -> Self {
        let sink = Self::default();
        sink.state
            .lock()
            .unwrap()
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(
                stream.to_string(),
                Stream {
                    token: token.map(str::to_string),
                    ..Default::default()
                },
            );
        sink
    }

    /// Simulates another writer appending to the stream
    pub fn advance_token(&self, group: &str, stream: &str, token: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(s) = state.groups.get_mut(group).and_then(|g| g.get_mut(stream)) {
            s.token = Some(token.to_string());
        }
    }

    pub fn delete_group(&self, group: &str) {
        self.state.lock().unwrap().groups.remove(group);
    }

    pub fn messages(&self, group: &str, stream: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .get(group)
            .and_then(|g| g.get(stream))
            .map(|s| s.events.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    pub fn timestamps(&self, group: &str, stream: &str) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .get(group)
            .and_then(|g| g.get(stream))
            .map(|s| s.events.iter().map(|(ts, _)| *ts).collect())
            .unwrap_or_default()
    }

    /// Every append sleeps for `delay` before it lands
    pub fn set_put_delay(&self, delay: Duration) {
        self.state.lock().unwrap().put_delay = Some(delay);
    }

    pub fn put_calls(&self) -> usize {
        self.state.lock().unwrap().put_calls
    }
}

#[async_trait]
impl RemoteLogSink for MockLogSink {
    async fn describe_streams(
        &self,
        group: &str,
        stream_prefix: &str,
    ) -> Result<Vec<StreamDescription>, SinkError> {
        let state = self.state.lock().unwrap();
        let streams = state.groups.get(group).ok_or(SinkError::NotFound)?;
        Ok(streams
            .iter()
            .filter(|(name, _)| name.starts_with(stream_prefix))
            .map(|(name, s)| StreamDescription {
                name: name.clone(),
                upload_token: s.token.clone(),
            })
            .collect())
    }

    async fn create_group(&self, group: &str) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        if state.groups.contains_key(group) {
            return Err(SinkError::AlreadyExists);
        }
        state.groups.insert(group.to_string(), HashMap::new());
        Ok(())
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        let streams = state.groups.get_mut(group).ok_or(SinkError::NotFound)?;
        if streams.contains_key(stream) {
            return Err(SinkError::AlreadyExists);
        }
        streams.insert(stream.to_string(), Stream::default());
        Ok(())
    }

    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        token: Option<&str>,
        entries: &[LogEntry],
    ) -> Result<Option<String>, SinkError> {
        let delay = self.state.lock().unwrap().put_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.put_calls += 1;
        let s = state
            .groups
            .get_mut(group)
            .and_then(|g| g.get_mut(stream))
            .ok_or(SinkError::NotFound)?;

        if s.token.as_deref() != token {
            return Err(SinkError::InvalidToken {
                expected: s.token.clone(),
            });
        }
        if entries
            .windows(2)
            .any(|w| w[0].timestamp_millis() > w[1].timestamp_millis())
        {
            return Err(SinkError::Other(
                "InvalidParameterException: events not in chronological order".to_string(),
            ));
        }

        s.events.extend(
            entries
                .iter()
                .map(|e| (e.timestamp_millis(), e.message().to_string())),
        );
        s.appends += 1;
        s.token = Some(format!("seq-{}", s.appends));
        Ok(s.token.clone())
    }
}
