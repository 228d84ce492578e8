// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote sink abstraction and the lifecycle around it.
//!
//! [`SinkLifecycleManager`] makes sure the group and stream exist before the
//! first append, owns the rotating upload token, and applies the
//! [`RetryPolicy`] when an append fails. Appends are serialized: the token
//! lock is held across the network call because the sink only accepts the
//! token returned by the previous append.

use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Display;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::LogEntry;
use crate::constants::MAX_SINK_NAME_LEN;
use crate::errors::{ConstructionError, SinkError, SinkLifecycleError, UploadError};
use crate::retry::{RetryDecision, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub name: String,
    pub upload_token: Option<String>,
}

/// Destination that stores log batches in group → stream containers.
#[async_trait]
pub trait RemoteLogSink: Send + Sync {
    /// Lists streams of `group` whose name starts with `stream_prefix`.
    /// Returns [`SinkError::NotFound`] when the group does not exist.
    async fn describe_streams(
        &self,
        group: &str,
        stream_prefix: &str,
    ) -> Result<Vec<StreamDescription>, SinkError>;

    async fn create_group(&self, group: &str) -> Result<(), SinkError>;

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), SinkError>;

    /// Appends `entries`, already sorted by timestamp, and returns the token
    /// for the next append.
    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        token: Option<&str>,
        entries: &[LogEntry],
    ) -> Result<Option<String>, SinkError>;
}

/// Group and stream the engine writes to.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{group}/{stream}")]
pub struct SinkIdentity {
    group: String,
    stream: String,
}

impl SinkIdentity {
    /// Validates names the way CloudWatch Logs does: groups use
    /// `[A-Za-z0-9._-/#]`, streams may contain anything except `:` and `*`,
    /// both are 1 to 512 characters long.
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Result<Self, ConstructionError> {
        let group = group.into();
        let stream = stream.into();

        if group.is_empty() || group.chars().count() > MAX_SINK_NAME_LEN {
            return Err(ConstructionError::InvalidSinkName(format!(
                "group name must be 1 to {MAX_SINK_NAME_LEN} characters, got {}",
                group.chars().count()
            )));
        }
        if let Some(invalid) = group
            .chars()
            .find(|&ch| !ch.is_ascii_alphanumeric() && !matches!(ch, '.' | '_' | '-' | '/' | '#'))
        {
            return Err(ConstructionError::InvalidSinkName(format!(
                "group name '{group}' contains invalid character '{invalid}'"
            )));
        }

        if stream.is_empty() || stream.chars().count() > MAX_SINK_NAME_LEN {
            return Err(ConstructionError::InvalidSinkName(format!(
                "stream name must be 1 to {MAX_SINK_NAME_LEN} characters, got {}",
                stream.chars().count()
            )));
        }
        if let Some(invalid) = stream.chars().find(|&ch| ch == ':' || ch == '*') {
            return Err(ConstructionError::InvalidSinkName(format!(
                "stream name '{stream}' contains invalid character '{invalid}'"
            )));
        }

        Ok(SinkIdentity { group, stream })
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[derive(Debug, Default)]
struct SinkState {
    ensured: bool,
    token: Option<String>,
}

pub struct SinkLifecycleManager {
    sink: Arc<dyn RemoteLogSink>,
    identity: SinkIdentity,
    retry_policy: Arc<dyn RetryPolicy>,
    state: Mutex<SinkState>,
}

impl std::fmt::Debug for SinkLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkLifecycleManager")
            .field("identity", &self.identity)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl SinkLifecycleManager {
    #[must_use]
    pub fn new(
        sink: Arc<dyn RemoteLogSink>,
        identity: SinkIdentity,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        SinkLifecycleManager {
            sink,
            identity,
            retry_policy,
            state: Mutex::new(SinkState::default()),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &SinkIdentity {
        &self.identity
    }

    /// Token the next append will carry.
    pub async fn upload_token(&self) -> Option<String> {
        self.state.lock().await.token.clone()
    }

    /// Verifies the group and stream exist, creating them if needed.
    /// Only the first successful call talks to the sink.
    pub async fn ensure_sink(&self) -> Result<(), SinkLifecycleError> {
        let mut state = self.state.lock().await;
        self.ensure_locked(&mut state).await
    }

    async fn ensure_locked(&self, state: &mut SinkState) -> Result<(), SinkLifecycleError> {
        if state.ensured {
            return Ok(());
        }

        let group = self.identity.group();
        let stream = self.identity.stream();

        match self.sink.describe_streams(group, stream).await {
            Ok(streams) => {
                if let Some(found) = streams.into_iter().find(|s| s.name == stream) {
                    debug!("CWLOGS | Found existing stream {}", self.identity);
                    state.token = found.upload_token;
                    state.ensured = true;
                    return Ok(());
                }
            }
            Err(SinkError::NotFound) => {}
            Err(source) => {
                return Err(SinkLifecycleError::Describe {
                    group: group.to_string(),
                    source,
                });
            }
        }

        info!("CWLOGS | Group or stream not found, creating {}", self.identity);

        match self.sink.create_group(group).await {
            Ok(()) | Err(SinkError::AlreadyExists) => {}
            Err(source) => {
                return Err(SinkLifecycleError::CreateGroup {
                    group: group.to_string(),
                    source,
                });
            }
        }

        match self.sink.create_stream(group, stream).await {
            Ok(()) | Err(SinkError::AlreadyExists) => {}
            Err(source) => {
                return Err(SinkLifecycleError::CreateStream {
                    group: group.to_string(),
                    stream: stream.to_string(),
                    source,
                });
            }
        }

        // A fresh stream takes no token. If another process won the creation
        // race, the first append fails with the expected token and is retried.
        state.token = None;
        state.ensured = true;
        Ok(())
    }

    /// Appends `entries` with the current token and stores the next one.
    ///
    /// Failures go through the retry policy; once it gives up, the entries
    /// are reported as rejected and never retried again.
    pub async fn append(&self, entries: &[LogEntry]) -> Result<Option<String>, UploadError> {
        let mut state = self.state.lock().await;

        self.ensure_locked(&mut state)
            .await
            .map_err(|source| UploadError::Lifecycle {
                entries: entries.len(),
                source,
            })?;

        let max_attempts = self.retry_policy.max_attempts().max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = self
                .sink
                .put_events(
                    self.identity.group(),
                    self.identity.stream(),
                    state.token.as_deref(),
                    entries,
                )
                .await;

            let err = match result {
                Ok(next_token) => {
                    state.token.clone_from(&next_token);
                    return Ok(next_token);
                }
                Err(err) => err,
            };

            let decision = self.retry_policy.classify(&err);
            if let RetryDecision::AcceptWithToken(token) = decision {
                warn!(
                    "CWLOGS | {} entries were already accepted by {}",
                    entries.len(),
                    self.identity
                );
                state.token.clone_from(&token);
                return Ok(token);
            }

            if decision == RetryDecision::Permanent || attempts >= max_attempts {
                error!(
                    "CWLOGS | Dropping {} entries for {} after {} attempts: {}",
                    entries.len(),
                    self.identity,
                    attempts,
                    err
                );
                return Err(UploadError::Rejected {
                    entries: entries.len(),
                    attempts,
                    source: err,
                });
            }

            if let RetryDecision::RetryWithToken(token) = decision {
                warn!("CWLOGS | Stale upload token for {}, retrying: {}", self.identity, err);
                state.token = token;
            } else {
                warn!("CWLOGS | {} disappeared, recreating: {}", self.identity, err);
                state.ensured = false;
                self.ensure_locked(&mut state)
                    .await
                    .map_err(|source| UploadError::Lifecycle {
                        entries: entries.len(),
                        source,
                    })?;
            }
        }
    }
}
