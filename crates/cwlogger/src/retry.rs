// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! How a failed append is handled.
//!
//! Sinks with ordering tokens reject an append made with a stale token and
//! report the token they expect. A [`RetryPolicy`] decides, per error,
//! whether to resend with a corrected token, recreate the destination, or
//! give up, and caps the total number of attempts.

use std::fmt::Debug;

use crate::constants::DEFAULT_APPEND_ATTEMPTS;
use crate::errors::SinkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resend the same entries with this token.
    RetryWithToken(Option<String>),
    /// The sink already holds these entries; adopt the token and stop.
    AcceptWithToken(Option<String>),
    /// Verify or recreate the group and stream, then resend.
    Reinitialize,
    Permanent,
}

pub trait RetryPolicy: Debug + Send + Sync {
    /// Total attempts per append, the first one included.
    fn max_attempts(&self) -> usize;

    fn classify(&self, error: &SinkError) -> RetryDecision;
}

/// Retries stale-token and missing-destination errors, everything else is permanent.
#[derive(Debug, Clone)]
pub struct SequenceTokenRetry {
    max_attempts: usize,
}

impl SequenceTokenRetry {
    #[must_use]
    pub fn new(max_attempts: usize) -> Self {
        SequenceTokenRetry {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for SequenceTokenRetry {
    fn default() -> Self {
        Self::new(DEFAULT_APPEND_ATTEMPTS)
    }
}

impl RetryPolicy for SequenceTokenRetry {
    fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn classify(&self, error: &SinkError) -> RetryDecision {
        match error {
            SinkError::InvalidToken { expected } => RetryDecision::RetryWithToken(expected.clone()),
            SinkError::AlreadyAccepted { expected } => {
                RetryDecision::AcceptWithToken(expected.clone())
            }
            SinkError::NotFound => RetryDecision::Reinitialize,
            SinkError::AlreadyExists | SinkError::Throttled | SinkError::Other(_) => {
                RetryDecision::Permanent
            }
        }
    }
}
