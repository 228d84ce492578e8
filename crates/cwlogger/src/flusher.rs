// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic flushing of the pending buffer.
//!
//! A single background task ticks at the flush interval. Each tick swaps the
//! buffer and uploads the captured batch; failures are logged and the loop
//! keeps going. [`FlushScheduler::shutdown`] stops the loop, waits for a tick
//! that is already uploading, then performs one final flush and returns its
//! result. Only the first call does any work; concurrent callers wait for it
//! to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::EntryBuffer;
use crate::errors::{FlushError, ShutdownError};
use crate::uploader::BatchUploader;

/// Swaps the buffer and uploads whatever was captured.
async fn flush_once(buffer: &EntryBuffer, uploader: &BatchUploader) -> Result<(), FlushError> {
    let batch = buffer.swap();
    if batch.is_empty() {
        return Ok(());
    }
    debug!("CWLOGS | Flushing {} entries", batch.len());
    uploader.upload(batch).await.into_result()
}

async fn run(
    buffer: Arc<EntryBuffer>,
    uploader: Arc<BatchUploader>,
    flush_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = flush_once(&buffer, &uploader).await {
                    error!("CWLOGS | Scheduled flush failed: {}", e);
                }
            }
        }
    }

    debug!("CWLOGS | Flush loop stopped");
}

#[derive(Debug)]
pub struct FlushScheduler {
    buffer: Arc<EntryBuffer>,
    uploader: Arc<BatchUploader>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
    /// Held for the whole shutdown; `true` once the final flush has run.
    finished: tokio::sync::Mutex<bool>,
    shutdown_timeout: Option<Duration>,
}

impl FlushScheduler {
    /// Spawns the flush loop on `runtime`. `flush_interval` must be non-zero.
    #[must_use]
    pub fn start(
        runtime: &Handle,
        buffer: Arc<EntryBuffer>,
        uploader: Arc<BatchUploader>,
        flush_interval: Duration,
        shutdown_timeout: Option<Duration>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = runtime.spawn(run(
            Arc::clone(&buffer),
            Arc::clone(&uploader),
            flush_interval,
            cancel.clone(),
        ));

        FlushScheduler {
            buffer,
            uploader,
            cancel,
            task: Mutex::new(Some(task)),
            stopped: AtomicBool::new(false),
            finished: tokio::sync::Mutex::new(false),
            shutdown_timeout,
        }
    }

    /// Flushes immediately, outside the timer.
    pub async fn flush(&self) -> Result<(), FlushError> {
        flush_once(&self.buffer, &self.uploader).await
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stops the loop and runs the final flush. Later or concurrent callers
    /// block until the first call completes, then return `Ok(())`.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let mut finished = self.finished.lock().await;
        if *finished {
            debug!("CWLOGS | Already shut down");
            return Ok(());
        }
        self.stopped.store(true, Ordering::Release);

        self.cancel.cancel();
        let task = {
            #[allow(clippy::expect_used)]
            let mut task = self.task.lock().expect("lock poisoned");
            task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("CWLOGS | Flush loop ended abnormally: {}", e);
            }
        }

        let final_flush = flush_once(&self.buffer, &self.uploader);
        let result = match self.shutdown_timeout {
            Some(limit) => match tokio::time::timeout(limit, final_flush).await {
                Ok(flushed) => flushed.map_err(ShutdownError::from),
                Err(_) => Err(ShutdownError::Timeout(limit)),
            },
            None => final_flush.await.map_err(ShutdownError::from),
        };
        *finished = true;

        debug!("CWLOGS | Shut down");
        result
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
        if !self.is_stopped() && !self.buffer.is_empty() {
            warn!(
                "CWLOGS | Dropped without shutdown, losing {} pending entries",
                self.buffer.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LogEntry;
    use crate::errors::SinkError;
    use crate::rate_limiter::RateLimiter;
    use crate::retry::SequenceTokenRetry;
    use crate::sink::{RemoteLogSink, SinkIdentity, SinkLifecycleManager};
    use crate::test_support::RecordingSink;
    use crate::uploader::UploadLimits;
    use tokio::time::sleep;

    const INTERVAL: Duration = Duration::from_secs(10);

    fn scheduler(sink: &Arc<RecordingSink>, shutdown_timeout: Option<Duration>) -> FlushScheduler {
        let manager = SinkLifecycleManager::new(
            Arc::clone(sink) as Arc<dyn RemoteLogSink>,
            SinkIdentity::new("test_group", "test_stream").unwrap(),
            Arc::new(SequenceTokenRetry::default()),
        );
        let uploader = BatchUploader::new(
            Arc::new(manager),
            Arc::new(RateLimiter::new(0, Duration::ZERO)),
            UploadLimits::default(),
        );
        FlushScheduler::start(
            &Handle::current(),
            Arc::new(EntryBuffer::new()),
            Arc::new(uploader),
            INTERVAL,
            shutdown_timeout,
        )
    }

    fn append(scheduler: &FlushScheduler, ts: i64) {
        scheduler
            .buffer
            .append(LogEntry::new(ts, format!("entry {ts}").into_bytes()).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_uploads_pending_entries() {
        let sink = Arc::new(RecordingSink::with_stream("test_stream", None));
        let scheduler = scheduler(&sink, None);
        append(&scheduler, 1);
        append(&scheduler, 2);

        sleep(INTERVAL / 2).await;
        assert!(sink.puts().is_empty());

        sleep(INTERVAL).await;
        assert_eq!(sink.shipped_timestamps(), vec![1, 2]);
        assert!(scheduler.buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_tick_does_not_call_sink() {
        let sink = Arc::new(RecordingSink::with_stream("test_stream", None));
        let _scheduler = scheduler(&sink, None);

        sleep(INTERVAL * 3).await;

        assert!(sink.puts().is_empty());
        assert_eq!(sink.describe_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_loop_running() {
        let sink = Arc::new(RecordingSink::with_stream("test_stream", None));
        sink.push_put_result(Err(SinkError::Other("InternalFailure".into())));
        let scheduler = scheduler(&sink, None);

        append(&scheduler, 1);
        sleep(INTERVAL + Duration::from_millis(1)).await;
        append(&scheduler, 2);
        sleep(INTERVAL).await;

        let puts = sink.puts();
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[1].timestamps, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_then_is_idempotent() {
        let sink = Arc::new(RecordingSink::with_stream("test_stream", None));
        let scheduler = scheduler(&sink, None);
        append(&scheduler, 1);

        scheduler.shutdown().await.unwrap();
        assert_eq!(sink.shipped_timestamps(), vec![1]);
        assert!(scheduler.is_stopped());

        append(&scheduler, 2);
        scheduler.shutdown().await.unwrap();
        assert_eq!(sink.puts().len(), 1);

        // the loop is gone: no further ticks ship anything
        sleep(INTERVAL * 2).await;
        assert_eq!(sink.puts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_returns_flush_error() {
        let sink = Arc::new(RecordingSink::with_stream("test_stream", None));
        sink.push_put_result(Err(SinkError::Other("InternalFailure".into())));
        let scheduler = scheduler(&sink, None);
        append(&scheduler, 1);

        let err = scheduler.shutdown().await.unwrap_err();

        assert!(matches!(err, ShutdownError::Flush(ref e) if e.dropped_entries == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out() {
        let sink = Arc::new(RecordingSink::with_stream("test_stream", None));
        sink.set_put_delay(Duration::from_secs(60));
        let scheduler = scheduler(&sink, Some(Duration::from_secs(5)));
        append(&scheduler, 1);

        let err = scheduler.shutdown().await.unwrap_err();

        assert!(matches!(err, ShutdownError::Timeout(limit) if limit == Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_tick() {
        let sink = Arc::new(RecordingSink::with_stream("test_stream", None));
        sink.set_put_delay(Duration::from_secs(2));
        let scheduler = scheduler(&sink, None);

        append(&scheduler, 1);
        // the tick at 10s is still uploading at 11s
        sleep(INTERVAL + Duration::from_secs(1)).await;
        append(&scheduler, 2);

        scheduler.shutdown().await.unwrap();

        let puts = sink.puts();
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[0].timestamps, vec![1]);
        assert_eq!(puts[1].timestamps, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_shutdown_waits_for_final_flush() {
        let sink = Arc::new(RecordingSink::with_stream("test_stream", None));
        sink.set_put_delay(Duration::from_secs(2));
        let scheduler = Arc::new(scheduler(&sink, None));
        append(&scheduler, 1);

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.shutdown().await }
        });
        tokio::task::yield_now().await;

        scheduler.shutdown().await.unwrap();
        assert_eq!(sink.shipped_timestamps(), vec![1]);

        first.await.unwrap().unwrap();
        assert_eq!(sink.puts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_after_failed_flush_does_not_retry() {
        let sink = Arc::new(RecordingSink::with_stream("test_stream", None));
        sink.push_put_result(Err(SinkError::Other("InternalFailure".into())));
        let scheduler = scheduler(&sink, None);
        append(&scheduler, 1);

        assert!(scheduler.shutdown().await.is_err());
        scheduler.shutdown().await.unwrap();

        assert_eq!(sink.puts().len(), 1);
    }
}
