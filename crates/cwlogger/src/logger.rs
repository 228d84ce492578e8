// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The engine handed to application code.
//!
//! A [`Logger`] owns the pending buffer, the rate limiter, the sink manager
//! and the background flush loop. Writes only append to memory and return
//! immediately; shipping happens on the flush interval, on
//! [`Logger::flush_now`] and once more during [`Logger::shutdown`].
//!
//! ```rust,no_run
//! # async fn example(sink: std::sync::Arc<dyn cwlogger::sink::RemoteLogSink>) -> Result<(), Box<dyn std::error::Error>> {
//! use cwlogger::config::LoggerConfig;
//! use cwlogger::logger::Logger;
//! use cwlogger::sink::SinkIdentity;
//!
//! let config = LoggerConfig::new(SinkIdentity::new("myapp", "host-1")?);
//! let logger = Logger::new(config, sink)?;
//! logger.write(b"service started")?;
//! logger.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::error::Error;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::debug;

use crate::buffer::EntryBuffer;
use crate::clock::{Clock, SystemClock};
use crate::config::LoggerConfig;
use crate::encoders::{CallSite, EntryWriter, RequestSummary, ResponseSummary};
use crate::errors::{ConstructionError, EncodeError, FlushError, ShutdownError};
use crate::flusher::FlushScheduler;
use crate::rate_limiter::RateLimiter;
use crate::retry::{RetryPolicy, SequenceTokenRetry};
use crate::sink::{RemoteLogSink, SinkIdentity, SinkLifecycleManager};
use crate::uploader::BatchUploader;

pub struct Logger {
    identity: SinkIdentity,
    sink: Arc<dyn RemoteLogSink>,
    buffer: Arc<EntryBuffer>,
    writer: EntryWriter,
    scheduler: FlushScheduler,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("identity", &self.identity)
            .field("buffer", &self.buffer)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Starts the flush loop on the current tokio runtime. The sink is not
    /// contacted until the first flush.
    pub fn new(config: LoggerConfig, sink: Arc<dyn RemoteLogSink>) -> Result<Self, ConstructionError> {
        let retry_policy = Arc::new(SequenceTokenRetry::new(config.retry_attempts));
        Self::with_parts(config, sink, retry_policy, Arc::new(SystemClock))
    }

    /// Like [`Logger::new`] with a custom retry policy and clock.
    pub fn with_parts(
        config: LoggerConfig,
        sink: Arc<dyn RemoteLogSink>,
        retry_policy: Arc<dyn RetryPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConstructionError> {
        config.validate()?;
        let runtime = Handle::try_current()?;

        let buffer = Arc::new(EntryBuffer::new());
        let manager = Arc::new(SinkLifecycleManager::new(
            Arc::clone(&sink),
            config.identity.clone(),
            retry_policy,
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_budget.capacity,
            config.rate_budget.window,
        ));
        let uploader = Arc::new(BatchUploader::new(manager, rate_limiter, config.limits));
        let scheduler = FlushScheduler::start(
            &runtime,
            Arc::clone(&buffer),
            uploader,
            config.flush_interval,
            config.shutdown_timeout,
        );

        debug!(
            "CWLOGS | Logger started for {}, flushing every {:?}",
            config.identity, config.flush_interval
        );

        Ok(Logger {
            identity: config.identity,
            sink,
            writer: EntryWriter::new(Arc::clone(&buffer), clock),
            buffer,
            scheduler,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &SinkIdentity {
        &self.identity
    }

    /// The sink this logger ships to, for calls outside the engine such as
    /// reading a stream back.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn RemoteLogSink> {
        &self.sink
    }

    /// Entries waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffers `bytes` as a single entry and returns its length. Empty input
    /// is ignored and returns 0.
    pub fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        Ok(self.writer.write_raw(bytes))
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), EncodeError> {
        self.writer.write_json(value)
    }

    /// Buffers an error record. Use [`crate::call_site!`] to capture `site`.
    pub fn write_error(&self, err: &dyn Error, site: &CallSite) -> Result<(), EncodeError> {
        self.writer.write_error(err, site)
    }

    pub fn write_round_trip(
        &self,
        request: &RequestSummary,
        response: Option<&ResponseSummary>,
        duration: Duration,
    ) -> Result<(), EncodeError> {
        self.writer.write_round_trip(request, response, duration)
    }

    /// Ships everything buffered so far without waiting for the timer.
    pub async fn flush_now(&self) -> Result<(), FlushError> {
        self.scheduler.flush().await
    }

    /// Stops the flush loop and ships what is left. Only the first call
    /// flushes; later calls return `Ok(())`.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        self.scheduler.shutdown().await
    }
}

impl io::Write for &Logger {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Logger::write(self, buf)
    }

    /// Shipping is timer driven, nothing to do here.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for Logger {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Logger::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
