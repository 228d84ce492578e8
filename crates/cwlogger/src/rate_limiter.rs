// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide limit on sink calls per rolling window.
//!
//! The limiter hands out `capacity` permits per window. When they run out,
//! callers wait until the window that started the current budget has fully
//! elapsed, then the whole budget is restored at once (no trickle refill).
//! Waiters queue on a fair mutex, so they are released in arrival order.
//!
//! Time is read from [`tokio::time::Instant`], which lets tests drive the
//! limiter with a paused clock instead of real sleeps.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

#[derive(Debug)]
struct Window {
    remaining: usize,
    started_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    /// Creates a limiter whose first window starts now.
    ///
    /// A zero `capacity` or zero `window` produces a limiter that is always
    /// ready.
    #[must_use]
    pub fn new(capacity: usize, window: Duration) -> Self {
        RateLimiter {
            capacity,
            window,
            state: Mutex::new(Window {
                remaining: capacity,
                started_at: Instant::now(),
            }),
        }
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.capacity == 0 || self.window.is_zero()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits until a permit is available and consumes it.
    pub async fn ready(&self) {
        if self.is_unlimited() {
            return;
        }

        let mut state = self.state.lock().await;

        let boundary = state.started_at + self.window;
        if Instant::now() >= boundary {
            state.started_at = Instant::now();
            state.remaining = self.capacity;
        }

        if state.remaining == 0 {
            trace!(
                "CWLOGS | Rate budget of {} exhausted, waiting {:?}",
                self.capacity,
                boundary.saturating_duration_since(Instant::now())
            );
            // The lock stays held while sleeping so later callers keep their place in line.
            sleep_until(boundary).await;
            state.started_at = Instant::now();
            state.remaining = self.capacity;
        }

        state.remaining -= 1;
    }
}
