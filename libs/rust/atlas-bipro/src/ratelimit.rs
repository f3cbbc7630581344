//! Adaptive per-carrier rate limiting
//!
//! Token bucket whose width adapts AIMD-style to carrier feedback: halve on
//! throttling, shrink on transient failures, additively recover after quiet
//! probe intervals. One limiter per carrier; the bucket width doubles as the
//! burst capacity.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransferError;

/// Tuning knobs with the documented defaults.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Initial bucket width in requests/second.
    pub initial: f64,
    pub min_width: f64,
    pub max_width: f64,
    /// Additive increase applied after a quiet probe interval.
    pub increase: f64,
    /// Quiet time required before the width grows again.
    pub probe_interval: Duration,
    /// Pause applied on throttling when the carrier sent no `Retry-After`.
    pub default_backoff: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            initial: 2.0,
            min_width: 0.5,
            max_width: 10.0,
            increase: 0.25,
            probe_interval: Duration::from_secs(10),
            default_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    width: f64,
    tokens: f64,
    last_refill: Instant,
    /// Hard pause until this instant after a throttle response.
    resume_at: Option<Instant>,
    /// Last adverse feedback or probe increase; gates additive recovery.
    last_adjustment: Instant,
}

/// Observable limiter state for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterSnapshot {
    pub width: f64,
    pub tokens: f64,
    pub paused: bool,
}

/// Per-carrier AIMD token bucket.
pub struct RateLimiter {
    config: RateLimiterConfig,
    carrier: String,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(carrier: impl Into<String>, config: RateLimiterConfig) -> Self {
        let now = Instant::now();
        let initial = config.initial.clamp(config.min_width, config.max_width);
        Self {
            config,
            carrier: carrier.into(),
            state: Mutex::new(BucketState {
                width: initial,
                tokens: initial,
                last_refill: now,
                resume_at: None,
                last_adjustment: now,
            }),
        }
    }

    /// Take one token, waiting until the bucket allows it. Returns
    /// `Cancelled` when the token fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), TransferError> {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("rate limiter poisoned");
                let now = Instant::now();
                self.refill(&mut state, now);

                if let Some(resume_at) = state.resume_at {
                    if now < resume_at {
                        resume_at - now
                    } else {
                        state.resume_at = None;
                        continue;
                    }
                } else if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                } else {
                    let deficit = 1.0 - state.tokens;
                    Duration::from_secs_f64(deficit / state.width)
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Carrier said 429: halve the width and pause until `Retry-After`.
    pub fn on_throttled(&self, retry_after: Option<Duration>) {
        let mut state = self.state.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        state.width = (state.width * 0.5).max(self.config.min_width);
        state.tokens = state.tokens.min(state.width);
        state.resume_at = Some(now + retry_after.unwrap_or(self.config.default_backoff));
        state.last_adjustment = now;
        debug!(carrier = %self.carrier, width = state.width, "throttled, halving rate");
    }

    /// Transport-level failure: shrink by a quarter.
    pub fn on_transient(&self) {
        let mut state = self.state.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        state.width = (state.width * 0.75).max(self.config.min_width);
        state.tokens = state.tokens.min(state.width);
        state.last_adjustment = now;
        debug!(carrier = %self.carrier, width = state.width, "transient failure, shrinking rate");
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let mut state = self.state.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        self.refill(&mut state, now);
        RateLimiterSnapshot {
            width: state.width,
            tokens: state.tokens,
            paused: state.resume_at.is_some_and(|at| now < at),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * state.width).min(state.width);
            state.last_refill = now;
        }
        // Additive increase after a full quiet probe interval.
        if now.saturating_duration_since(state.last_adjustment) >= self.config.probe_interval
            && state.width < self.config.max_width
        {
            state.width = (state.width + self.config.increase).min(self.config.max_width);
            state.last_adjustment = now;
            debug!(carrier = %self.carrier, width = state.width, "quiet interval, widening rate");
        }
    }
}
